//! Web and knowledge-base retrieval for one session.
//!
//! Every operation fans out one request per input with at most `retrieval.web_concurrency` in
//! flight, then restores input order before merging. A failing request contributes nothing; it
//! never fails the operation.

use std::{collections::HashSet, future::Future};

use futures::{StreamExt, stream};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Providers;
use sage_config::Config;
use sage_domain::{WebSearchDocument, text};
use sage_providers::knowledge_base::KnowledgeHit;

pub struct RetrievalGateway<'a> {
	cfg: &'a Config,
	providers: &'a Providers,
	cancel: &'a CancellationToken,
}
impl<'a> RetrievalGateway<'a> {
	pub fn new(cfg: &'a Config, providers: &'a Providers, cancel: &'a CancellationToken) -> Self {
		Self { cfg, providers, cancel }
	}

	/// One search per subquery, merged in first-seen order and deduplicated by normalized URL.
	pub async fn web_search(&self, subqueries: &[String]) -> Vec<WebSearchDocument> {
		let provider_cfg = &self.cfg.providers.web_search;
		let max_results = self.cfg.retrieval.web_results_per_query;
		let batches = self
			.fan_out(subqueries, |subquery| async move {
				match self.providers.web_search.search(provider_cfg, subquery, max_results).await {
					Ok(hits) => hits
						.iter()
						.map(|hit| WebSearchDocument::web(&hit.url, &hit.title, &hit.snippet))
						.collect(),
					Err(err) => {
						warn!(error = %err, subquery = %subquery, "Web search failed; skipping subquery.");

						Vec::new()
					},
				}
			})
			.await;
		let docs = merge_unique(batches);

		info!(subqueries = subqueries.len(), documents = docs.len(), "Web search finished.");

		docs
	}

	/// Replaces each document's content with the text of its page. A page that cannot be fetched
	/// or yields no text keeps the search snippet.
	pub async fn download_pages(&self, docs: Vec<WebSearchDocument>) -> Vec<WebSearchDocument> {
		let provider_cfg = &self.cfg.providers.web_search;
		let max_chars = self.cfg.retrieval.max_page_chars;
		let pages = self
			.fan_out(&docs, |doc| async move {
				match self.providers.web_search.fetch_page(provider_cfg, doc.url()).await {
					Ok(html) => {
						let page = text::html_to_text(&html);
						let (page, truncated) = text::truncate_graphemes(&page, max_chars);

						if truncated {
							debug!(url = doc.url(), max_chars, "Page text truncated.");
						}

						Some(page.to_string()).filter(|page| !page.is_empty())
					},
					Err(err) => {
						warn!(error = %err, url = doc.url(), "Page download failed; keeping snippet.");

						None
					},
				}
			})
			.await;

		docs.into_iter()
			.zip(pages)
			.map(|(doc, page)| match page {
				Some(page) => doc.with_content(page),
				None => doc,
			})
			.collect()
	}

	/// Writes downloaded pages back into the knowledge base tagged with the session id.
	pub async fn index_documents(&self, docs: &[WebSearchDocument], query_id: &str) -> usize {
		let provider_cfg = &self.cfg.providers.knowledge_base;
		let stored = self
			.fan_out(docs, |doc| async move {
				if doc.content().is_empty() {
					return false;
				}

				let metadata = index_metadata(doc, query_id);

				match self
					.providers
					.knowledge_base
					.embed_and_index(provider_cfg, doc.content(), &metadata)
					.await
				{
					Ok(doc_id) => {
						debug!(doc_id = %doc_id, url = doc.url(), "Indexed web document.");

						true
					},
					Err(err) => {
						warn!(error = %err, url = doc.url(), "Indexing web document failed.");

						false
					},
				}
			})
			.await
			.into_iter()
			.filter(|stored| *stored)
			.count();

		info!(documents = docs.len(), stored, "Web documents indexed.");

		stored
	}

	/// Similarity search per subquery, deduplicated by document id and ranked by relevance.
	pub async fn local_search(&self, subqueries: &[String]) -> Vec<WebSearchDocument> {
		let provider_cfg = &self.cfg.providers.knowledge_base;
		let top_k = self.cfg.retrieval.local_top_k;
		let batches = self
			.fan_out(subqueries, |subquery| async move {
				match self.providers.knowledge_base.search(provider_cfg, subquery, None, top_k).await
				{
					Ok(hits) => hits.iter().map(local_document).collect(),
					Err(err) => {
						warn!(error = %err, subquery = %subquery, "Local search failed; skipping subquery.");

						Vec::new()
					},
				}
			})
			.await;
		let mut docs = merge_unique(batches);

		docs.sort_by(|a, b| {
			let a = a.relevance_score().unwrap_or(f32::MIN);
			let b = b.relevance_score().unwrap_or(f32::MIN);

			b.total_cmp(&a)
		});

		info!(subqueries = subqueries.len(), documents = docs.len(), "Local search finished.");

		docs
	}

	/// Runs `f` over `items` with bounded concurrency and returns the outputs in input order.
	/// Items not yet started when the session is cancelled, and items still in flight at that
	/// moment, yield `T::default()`.
	async fn fan_out<'i, I, T, F, Fut>(&self, items: &'i [I], f: F) -> Vec<T>
	where
		F: Fn(&'i I) -> Fut,
		Fut: Future<Output = T>,
		T: Default,
	{
		let limit = self.cfg.retrieval.web_concurrency.max(1);
		let pending = items
			.iter()
			.enumerate()
			.map(|(idx, item)| {
				let work = f(item);

				async move {
					if self.cancel.is_cancelled() {
						return (idx, T::default());
					}

					tokio::select! {
						_ = self.cancel.cancelled() => (idx, T::default()),
						output = work => (idx, output),
					}
				}
			})
			.collect::<Vec<_>>();
		let mut outputs = stream::iter(pending).buffer_unordered(limit).collect::<Vec<_>>().await;

		outputs.sort_by_key(|(idx, _)| *idx);

		outputs.into_iter().map(|(_, output)| output).collect()
	}
}

/// Concatenates batches in order, keeping the first document seen for each source id.
pub fn merge_unique(
	batches: impl IntoIterator<Item = Vec<WebSearchDocument>>,
) -> Vec<WebSearchDocument> {
	let mut seen = HashSet::new();
	let mut out = Vec::new();

	for doc in batches.into_iter().flatten() {
		if seen.insert(doc.source_id().to_string()) {
			out.push(doc);
		}
	}

	out
}

fn local_document(hit: &KnowledgeHit) -> WebSearchDocument {
	let source = hit.source().unwrap_or_default();
	let title = hit
		.title()
		.map(str::to_string)
		.or_else(|| source.rsplit(['/', '\\']).next().map(str::to_string))
		.filter(|title| !title.is_empty())
		.unwrap_or_else(|| hit.doc_id.clone());
	let relevance = hit.score.or_else(|| hit.distance.map(|distance| 1.0 / (1.0 + distance.max(0.0))));

	WebSearchDocument::local(&hit.doc_id, source, &title, &hit.text, relevance)
}

fn index_metadata(doc: &WebSearchDocument, query_id: &str) -> Map<String, Value> {
	let mut metadata = Map::new();

	metadata.insert("source".to_string(), Value::String(doc.url().to_string()));
	metadata.insert("query_id".to_string(), Value::String(query_id.to_string()));
	metadata.insert("title".to_string(), Value::String(doc.title().to_string()));
	metadata.insert("snippet".to_string(), Value::String(doc.snippet().to_string()));

	metadata
}
