//! The per-request search session.
//!
//! A session walks the stage sequence once, pushing one [`StageEvent`] onto its channel after each
//! completed stage. Stages behind a disabled guard are skipped without an event. A synthesis
//! failure or a panic inside the session ends the stream with a single `FAILED` event; every other
//! provider failure degrades the run instead.

use std::{panic::AssertUnwindSafe, path::Path, sync::Arc, time::Instant};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
	Error, Providers, Result,
	expansion::{self, Expansion},
	retrieval::{self, RetrievalGateway},
	selection, synthesis,
};
use sage_config::Config;
use sage_domain::{Personality, SearchAllStage, StageEvent, WebSearchDocument};
use sage_providers::report::{Report, ReportSource};

const PANIC_MESSAGE: &str = "Search session failed unexpectedly.";

/// Body of a search request. Only `user_prompt` is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
	pub user_prompt: Option<String>,
	/// Unset means `session.expand_by_default`.
	#[serde(default)]
	pub expand_query: Option<bool>,
	#[serde(default)]
	pub allow_web_search: Option<bool>,
	#[serde(default)]
	pub allow_local_search: Option<bool>,
}
impl SearchRequest {
	pub fn new(user_prompt: impl Into<String>) -> Self {
		Self { user_prompt: Some(user_prompt.into()), ..Default::default() }
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
	pub allow_local_search: bool,
	pub web_search_enabled: bool,
	pub expand_query: bool,
	pub personality: Personality,
	pub max_depth: u32,
}
impl SessionConfig {
	pub fn resolve(cfg: &Config, req: &SearchRequest) -> Self {
		let personality = cfg.session.personality.parse().unwrap_or_else(|err: String| {
			warn!(error = %err, "Falling back to the default personality.");

			Personality::default()
		});

		Self {
			allow_local_search: req.allow_local_search.unwrap_or(true),
			web_search_enabled: req.allow_web_search.unwrap_or(true),
			expand_query: req.expand_query.unwrap_or(cfg.session.expand_by_default),
			personality,
			max_depth: cfg.session.max_depth,
		}
	}

	fn searches_web(&self) -> bool {
		self.web_search_enabled && self.max_depth >= 1
	}
}

pub struct SearchSession {
	session_id: Uuid,
	query: String,
	enhanced_query: String,
	subqueries: Vec<String>,
	config: SessionConfig,
	web_results: Vec<WebSearchDocument>,
	local_results: Vec<WebSearchDocument>,
	num_tokens_used: u64,
	app: Arc<Config>,
	providers: Providers,
	cancel: CancellationToken,
}
impl SearchSession {
	pub fn new(app: Arc<Config>, providers: Providers, query: String, config: SessionConfig) -> Self {
		let enhanced_query = expansion::clean(&query);

		Self {
			session_id: Uuid::new_v4(),
			query,
			enhanced_query,
			subqueries: Vec::new(),
			config,
			web_results: Vec::new(),
			local_results: Vec::new(),
			num_tokens_used: 0,
			app,
			providers,
			cancel: CancellationToken::new(),
		}
	}

	pub fn session_id(&self) -> Uuid {
		self.session_id
	}

	pub fn query(&self) -> &str {
		&self.query
	}

	pub fn enhanced_query(&self) -> &str {
		&self.enhanced_query
	}

	pub fn config(&self) -> &SessionConfig {
		&self.config
	}

	/// Drives the session to completion, sending every event on `tx`. Consumes the session, so a
	/// session runs at most once. Returns without an error event when the receiver goes away.
	pub async fn run(mut self, tx: mpsc::Sender<StageEvent>) {
		let started = Instant::now();
		let watcher = watch_disconnect(tx.clone(), self.cancel.clone());

		let outcome = AssertUnwindSafe(self.drive(&tx)).catch_unwind().await;
		let failure = match outcome {
			Ok(Ok(())) => {
				info!(
					session_id = %self.session_id,
					tokens = self.num_tokens_used,
					web_documents = self.web_results.len(),
					local_documents = self.local_results.len(),
					elapsed_ms = elapsed_ms(started),
					"Search session completed."
				);

				None
			},
			Ok(Err(Error::Cancelled)) => {
				info!(
					session_id = %self.session_id,
					elapsed_ms = elapsed_ms(started),
					"Client disconnected; search session stopped."
				);

				None
			},
			Ok(Err(err)) => {
				error!(session_id = %self.session_id, error = %err, "Search session failed.");

				Some(err.to_string())
			},
			Err(panic) => {
				let reason = panic
					.downcast_ref::<String>()
					.map(String::as_str)
					.or_else(|| panic.downcast_ref::<&str>().copied())
					.unwrap_or("unknown");

				error!(session_id = %self.session_id, reason, "Search session panicked.");

				Some(PANIC_MESSAGE.to_string())
			},
		};

		if let Some(message) = failure
			&& tx.send(StageEvent::failed(self.num_tokens_used, message)).await.is_err()
		{
			debug!(session_id = %self.session_id, "Failure event dropped; client is gone.");
		}

		self.cancel.cancel();

		let _ = watcher.await;
	}

	async fn drive(&mut self, tx: &mpsc::Sender<StageEvent>) -> Result<()> {
		self.emit(tx, SearchAllStage::Starting).await?;

		self.ensure_live()?;

		let expanded = if self.config.expand_query {
			expansion::generate_subqueries(
				&self.app,
				self.providers.completion.as_ref(),
				&self.enhanced_query,
			)
			.await
		} else {
			Expansion::passthrough(&self.enhanced_query)
		};

		self.add_tokens(expanded.tokens_used);
		self.subqueries = expanded.subqueries;
		self.emit(tx, SearchAllStage::ExpandingQuery).await?;

		self.ensure_live()?;

		let selected = selection::maybe_monte_carlo(
			&self.app,
			self.providers.completion.as_ref(),
			std::mem::take(&mut self.subqueries),
			&self.enhanced_query,
		)
		.await;

		self.add_tokens(selected.tokens_used);
		self.subqueries = selected.subqueries;

		debug!(session_id = %self.session_id, subqueries = ?self.subqueries, "Subqueries selected.");

		self.emit(tx, SearchAllStage::SelectingSubqueries).await?;

		if self.config.searches_web() {
			self.emit(tx, SearchAllStage::SearchingWeb).await?;
			self.ensure_live()?;

			let gateway = RetrievalGateway::new(&self.app, &self.providers, &self.cancel);
			let mut docs = gateway.web_search(&self.subqueries).await;

			if self.app.retrieval.fetch_pages && !docs.is_empty() {
				self.ensure_live()?;

				docs = gateway.download_pages(docs).await;
			}
			if self.app.retrieval.index_web_results && !docs.is_empty() {
				self.ensure_live()?;
				gateway.index_documents(&docs, &self.session_id.to_string()).await;
			}

			self.web_results.extend(docs);
			self.emit(tx, SearchAllStage::DownloadedWebpages).await?;
		}
		if self.config.allow_local_search {
			self.emit(tx, SearchAllStage::SearchingLocal).await?;
			self.ensure_live()?;

			let gateway = RetrievalGateway::new(&self.app, &self.providers, &self.cancel);
			let docs = gateway.local_search(&self.subqueries).await;

			self.local_results.extend(docs);
			self.emit(tx, SearchAllStage::ReadingLocalKnowledge).await?;
		}

		self.emit(tx, SearchAllStage::ReadingWebpagesAndLocal).await?;
		self.ensure_live()?;

		let documents = self.all_documents();
		let answer = synthesis::synthesize_final_answer(
			&self.app,
			self.providers.completion.as_ref(),
			&self.enhanced_query,
			&documents,
			self.config.personality,
		)
		.await
		.map_err(|err| Error::Provider { message: format!("Final answer synthesis failed: {err}") })?;

		self.add_tokens(answer.tokens_used);
		self.save_report(&answer.text, &documents).await;

		tx.send(StageEvent::results_ready(self.num_tokens_used, documents, answer.text))
			.await
			.map_err(|_| Error::Cancelled)
	}

	async fn emit(&self, tx: &mpsc::Sender<StageEvent>, stage: SearchAllStage) -> Result<()> {
		debug!(
			session_id = %self.session_id,
			stage = stage.as_str(),
			tokens = self.num_tokens_used,
			"Stage reached."
		);

		tx.send(StageEvent::progress(stage, self.num_tokens_used)).await.map_err(|_| Error::Cancelled)
	}

	fn ensure_live(&self) -> Result<()> {
		if self.cancel.is_cancelled() { Err(Error::Cancelled) } else { Ok(()) }
	}

	fn add_tokens(&mut self, tokens: u64) {
		self.num_tokens_used = self.num_tokens_used.saturating_add(tokens);
	}

	/// Web documents first, then local ones, each source once.
	fn all_documents(&self) -> Vec<WebSearchDocument> {
		retrieval::merge_unique([self.web_results.clone(), self.local_results.clone()])
	}

	async fn save_report(&self, answer: &str, documents: &[WebSearchDocument]) {
		let reports = &self.app.reports;
		let Some(dir) = reports.dir.as_deref().filter(|_| reports.enabled) else {
			return;
		};

		if let Err(err) = self.write_report(dir, answer, documents).await {
			warn!(session_id = %self.session_id, error = %err, "Report was not saved.");
		}
	}

	async fn write_report(
		&self,
		dir: &Path,
		answer: &str,
		documents: &[WebSearchDocument],
	) -> Result<()> {
		let report = Report {
			session_id: self.session_id.to_string(),
			query: self.query.clone(),
			answer: answer.to_string(),
			sources: documents
				.iter()
				.map(|doc| ReportSource { title: doc.title().to_string(), url: doc.url().to_string() })
				.collect(),
			created_at: OffsetDateTime::now_utc(),
		};
		let path = self
			.providers
			.reports
			.save_report(dir, &report)
			.await
			.map_err(|err| Error::Report { message: err.to_string() })?;

		info!(session_id = %self.session_id, path = %path.display(), "Report saved.");

		Ok(())
	}
}

fn elapsed_ms(started: Instant) -> u64 {
	u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Trips `cancel` once every receiver of `tx` is gone. Exits when `cancel` fires for any other
/// reason, releasing its sender.
fn watch_disconnect(tx: mpsc::Sender<StageEvent>, cancel: CancellationToken) -> JoinHandle<()> {
	tokio::spawn(async move {
		tokio::select! {
			_ = tx.closed() => cancel.cancel(),
			_ = cancel.cancelled() => {},
		}
	})
}
