pub mod expansion;
pub mod retrieval;
pub mod selection;
pub mod session;
pub mod synthesis;

mod error;

pub use error::{Error, Result};
pub use session::{SearchRequest, SearchSession, SessionConfig};

use std::{future::Future, path::Path, path::PathBuf, pin::Pin, sync::Arc};

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use sage_config::{
	CompletionProviderConfig, Config, KnowledgeBaseProviderConfig, WebSearchProviderConfig,
};
use sage_domain::{StageEvent, text};
use sage_providers::{
	completion::{self, Completion},
	knowledge_base::{self, KnowledgeHit},
	report::{self, Report},
	web_search::{self, WebHit},
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const MISSING_PROMPT_MESSAGE: &str = "Please provide a user prompt.";

pub trait CompletionProvider
where
	Self: Send + Sync,
{
	fn complete<'a>(
		&'a self,
		cfg: &'a CompletionProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, sage_providers::Result<Completion>>;
}

pub trait WebSearchProvider
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		cfg: &'a WebSearchProviderConfig,
		query: &'a str,
		max_results: u32,
	) -> BoxFuture<'a, sage_providers::Result<Vec<WebHit>>>;

	fn fetch_page<'a>(
		&'a self,
		cfg: &'a WebSearchProviderConfig,
		url: &'a str,
	) -> BoxFuture<'a, sage_providers::Result<String>>;
}

pub trait KnowledgeBaseProvider
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		cfg: &'a KnowledgeBaseProviderConfig,
		query: &'a str,
		filter: Option<&'a Map<String, Value>>,
		top_k: u32,
	) -> BoxFuture<'a, sage_providers::Result<Vec<KnowledgeHit>>>;

	fn embed_and_index<'a>(
		&'a self,
		cfg: &'a KnowledgeBaseProviderConfig,
		text: &'a str,
		metadata: &'a Map<String, Value>,
	) -> BoxFuture<'a, sage_providers::Result<String>>;
}

pub trait ReportStore
where
	Self: Send + Sync,
{
	fn save_report<'a>(
		&'a self,
		dir: &'a Path,
		report: &'a Report,
	) -> BoxFuture<'a, sage_providers::Result<PathBuf>>;
}

/// Collaborators shared by every session. Cloning is cheap and hands each session its own
/// references to the same clients.
#[derive(Clone)]
pub struct Providers {
	pub completion: Arc<dyn CompletionProvider>,
	pub web_search: Arc<dyn WebSearchProvider>,
	pub knowledge_base: Arc<dyn KnowledgeBaseProvider>,
	pub reports: Arc<dyn ReportStore>,
}

pub struct SageService {
	pub cfg: Arc<Config>,
	pub providers: Providers,
}

struct DefaultProviders;

impl CompletionProvider for DefaultProviders {
	fn complete<'a>(
		&'a self,
		cfg: &'a CompletionProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, sage_providers::Result<Completion>> {
		Box::pin(completion::complete(cfg, messages))
	}
}

impl WebSearchProvider for DefaultProviders {
	fn search<'a>(
		&'a self,
		cfg: &'a WebSearchProviderConfig,
		query: &'a str,
		max_results: u32,
	) -> BoxFuture<'a, sage_providers::Result<Vec<WebHit>>> {
		Box::pin(web_search::search(cfg, query, max_results))
	}

	fn fetch_page<'a>(
		&'a self,
		cfg: &'a WebSearchProviderConfig,
		url: &'a str,
	) -> BoxFuture<'a, sage_providers::Result<String>> {
		Box::pin(web_search::fetch_page(cfg, url))
	}
}

impl KnowledgeBaseProvider for DefaultProviders {
	fn search<'a>(
		&'a self,
		cfg: &'a KnowledgeBaseProviderConfig,
		query: &'a str,
		filter: Option<&'a Map<String, Value>>,
		top_k: u32,
	) -> BoxFuture<'a, sage_providers::Result<Vec<KnowledgeHit>>> {
		Box::pin(knowledge_base::search(cfg, query, filter, top_k))
	}

	fn embed_and_index<'a>(
		&'a self,
		cfg: &'a KnowledgeBaseProviderConfig,
		text: &'a str,
		metadata: &'a Map<String, Value>,
	) -> BoxFuture<'a, sage_providers::Result<String>> {
		Box::pin(knowledge_base::embed_and_index(cfg, text, metadata))
	}
}

impl ReportStore for DefaultProviders {
	fn save_report<'a>(
		&'a self,
		dir: &'a Path,
		report: &'a Report,
	) -> BoxFuture<'a, sage_providers::Result<PathBuf>> {
		Box::pin(report::save_report(dir, report))
	}
}

impl Providers {
	pub fn new(
		completion: Arc<dyn CompletionProvider>,
		web_search: Arc<dyn WebSearchProvider>,
		knowledge_base: Arc<dyn KnowledgeBaseProvider>,
		reports: Arc<dyn ReportStore>,
	) -> Self {
		Self { completion, web_search, knowledge_base, reports }
	}
}

impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self {
			completion: provider.clone(),
			web_search: provider.clone(),
			knowledge_base: provider.clone(),
			reports: provider,
		}
	}
}

impl SageService {
	pub fn new(cfg: Config) -> Self {
		Self { cfg: Arc::new(cfg), providers: Providers::default() }
	}

	pub fn with_providers(cfg: Config, providers: Providers) -> Self {
		Self { cfg: Arc::new(cfg), providers }
	}

	/// Validates the request, starts a session on the runtime, and returns the receiving end of
	/// its event channel. Dropping the receiver stops the session before its next external call.
	pub fn stream_search(&self, req: SearchRequest) -> Result<mpsc::Receiver<StageEvent>> {
		let prompt = validate_prompt(&self.cfg, req.user_prompt.as_deref())?;
		let session_cfg = SessionConfig::resolve(&self.cfg, &req);
		let session =
			SearchSession::new(self.cfg.clone(), self.providers.clone(), prompt, session_cfg);
		let (tx, rx) = mpsc::channel(self.cfg.service.stream_channel_capacity);

		tracing::info!(
			session_id = %session.session_id(),
			web = session.config().web_search_enabled,
			local = session.config().allow_local_search,
			expand = session.config().expand_query,
			"Search session started."
		);

		tokio::spawn(session.run(tx));

		Ok(rx)
	}
}

/// Input errors are rejected here, before a session exists, so they never produce stage events.
pub fn validate_prompt(cfg: &Config, prompt: Option<&str>) -> Result<String> {
	let Some(prompt) = prompt.map(str::trim).filter(|prompt| !prompt.is_empty()) else {
		return Err(Error::InvalidRequest { message: MISSING_PROMPT_MESSAGE.to_string() });
	};

	if text::grapheme_len(prompt) > cfg.session.max_prompt_chars {
		return Err(Error::InvalidRequest {
			message: format!(
				"user_prompt must be at most {} characters.",
				cfg.session.max_prompt_chars
			),
		});
	}
	if text::clean_search_query(prompt).is_empty() {
		return Err(Error::InvalidRequest { message: MISSING_PROMPT_MESSAGE.to_string() });
	}

	Ok(prompt.to_string())
}
