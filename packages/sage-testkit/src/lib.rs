//! Scripted collaborators and configuration for exercising search sessions without a network.

use std::{
	collections::HashSet,
	path::{Path, PathBuf},
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
};

use serde_json::{Map, Value};
use tokio::sync::Notify;

use sage_config::{
	CompletionProviderConfig, Config, Expansion, KnowledgeBaseProviderConfig,
	Providers as ProviderConfigs, Reports, Retrieval, Selection, Service, Session, Synthesis,
	WebSearchProviderConfig,
};
use sage_providers::{
	Error as ProviderError,
	completion::Completion,
	knowledge_base::KnowledgeHit,
	report::{self, Report},
	web_search::WebHit,
};
use sage_service::{
	BoxFuture, CompletionProvider, KnowledgeBaseProvider, Providers, ReportStore,
	WebSearchProvider,
};

pub const SYNTHESIZED_ANSWER: &str = "Entanglement links the states of two particles.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
	Expansion,
	Scoring,
	Synthesis,
}
impl CallKind {
	/// Classifies a request by its system prompt.
	pub fn of(messages: &[Value]) -> Self {
		let system = messages
			.first()
			.and_then(|message| message.get("content"))
			.and_then(|content| content.as_str())
			.unwrap_or_default();

		if system.contains("You plan web research") {
			Self::Expansion
		} else if system.contains("You judge web searches") {
			Self::Scoring
		} else {
			Self::Synthesis
		}
	}
}

/// Completion double that answers by request kind and records every request it sees.
pub struct SpyCompletion {
	pub expansion_reply: String,
	pub rating_reply: String,
	pub answer: String,
	pub tokens_per_call: u64,
	pub fail: HashSet<CallKind>,
	/// Requests of this kind panic instead of answering.
	pub panic_on: Option<CallKind>,
	/// When set, expansion waits for one permit before answering.
	pub expansion_gate: Option<Arc<Notify>>,
	pub calls: Arc<AtomicUsize>,
	pub requests: Arc<Mutex<Vec<(CallKind, Vec<Value>)>>>,
}
impl SpyCompletion {
	pub fn failing(kind: CallKind) -> Self {
		let mut completion = Self::default();

		completion.fail.insert(kind);

		completion
	}

	pub fn requests_of(&self, kind: CallKind) -> Vec<Vec<Value>> {
		lock(&self.requests)
			.iter()
			.filter(|(seen, _)| *seen == kind)
			.map(|(_, messages)| messages.clone())
			.collect()
	}
}

impl Default for SpyCompletion {
	fn default() -> Self {
		Self {
			expansion_reply: "1. quantum entanglement definition\n2. bell test experiments".to_string(),
			rating_reply: "7".to_string(),
			answer: SYNTHESIZED_ANSWER.to_string(),
			tokens_per_call: 10,
			fail: HashSet::new(),
			panic_on: None,
			expansion_gate: None,
			calls: Arc::new(AtomicUsize::new(0)),
			requests: Arc::new(Mutex::new(Vec::new())),
		}
	}
}

impl CompletionProvider for SpyCompletion {
	fn complete<'a>(
		&'a self,
		_cfg: &'a CompletionProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, sage_providers::Result<Completion>> {
		let kind = CallKind::of(messages);

		self.calls.fetch_add(1, Ordering::SeqCst);
		lock(&self.requests).push((kind, messages.to_vec()));

		Box::pin(async move {
			if kind == CallKind::Expansion {
				if let Some(gate) = &self.expansion_gate {
					gate.notified().await;
				}
			}
			if self.panic_on == Some(kind) {
				panic!("Scripted {kind:?} panic.");
			}
			if self.fail.contains(&kind) {
				return Err(ProviderError::InvalidResponse {
					message: format!("Scripted {kind:?} failure."),
				});
			}

			let text = match kind {
				CallKind::Expansion => self.expansion_reply.clone(),
				CallKind::Scoring => self.rating_reply.clone(),
				CallKind::Synthesis => self.answer.clone(),
			};

			Ok(Completion { text, tokens_used: self.tokens_per_call })
		})
	}
}

/// Web search double. Every query returns a page shared by all queries plus one of its own.
pub struct SpyWebSearch {
	pub failing_queries: HashSet<String>,
	pub fail_all: bool,
	pub search_calls: Arc<AtomicUsize>,
	pub fetch_calls: Arc<AtomicUsize>,
}
impl SpyWebSearch {
	pub const SHARED_URL: &'static str = "https://example.com/shared";

	pub fn page_url(query: &str) -> String {
		let slug = query
			.chars()
			.map(|ch| if ch.is_ascii_alphanumeric() { ch.to_ascii_lowercase() } else { '-' })
			.collect::<String>();

		format!("https://example.com/{slug}")
	}
}

impl Default for SpyWebSearch {
	fn default() -> Self {
		Self {
			failing_queries: HashSet::new(),
			fail_all: false,
			search_calls: Arc::new(AtomicUsize::new(0)),
			fetch_calls: Arc::new(AtomicUsize::new(0)),
		}
	}
}

impl WebSearchProvider for SpyWebSearch {
	fn search<'a>(
		&'a self,
		_cfg: &'a WebSearchProviderConfig,
		query: &'a str,
		_max_results: u32,
	) -> BoxFuture<'a, sage_providers::Result<Vec<WebHit>>> {
		self.search_calls.fetch_add(1, Ordering::SeqCst);

		let fails = self.fail_all || self.failing_queries.contains(query);
		let hits = vec![
			WebHit {
				url: Self::SHARED_URL.to_string(),
				title: "Shared overview".to_string(),
				snippet: "An overview every query finds.".to_string(),
			},
			WebHit {
				url: Self::page_url(query),
				title: format!("About {query}"),
				snippet: format!("Details on {query}."),
			},
		];

		Box::pin(async move {
			if fails {
				return Err(ProviderError::InvalidResponse {
					message: format!("Scripted search failure for {query:?}."),
				});
			}

			Ok(hits)
		})
	}

	fn fetch_page<'a>(
		&'a self,
		_cfg: &'a WebSearchProviderConfig,
		url: &'a str,
	) -> BoxFuture<'a, sage_providers::Result<String>> {
		self.fetch_calls.fetch_add(1, Ordering::SeqCst);

		let html = format!("<html><body><p>Full text of {url}</p></body></html>");

		Box::pin(async move { Ok(html) })
	}
}

/// Knowledge-base double returning the same hits for every query.
pub struct SpyKnowledgeBase {
	pub hits: Vec<KnowledgeHit>,
	pub fail_all: bool,
	pub search_calls: Arc<AtomicUsize>,
	pub indexed: Arc<Mutex<Vec<(String, Map<String, Value>)>>>,
}
impl Default for SpyKnowledgeBase {
	fn default() -> Self {
		Self {
			hits: vec![knowledge_hit("kb-1", "handbook.pdf", "Internal notes on entanglement.", 0.25)],
			fail_all: false,
			search_calls: Arc::new(AtomicUsize::new(0)),
			indexed: Arc::new(Mutex::new(Vec::new())),
		}
	}
}

impl KnowledgeBaseProvider for SpyKnowledgeBase {
	fn search<'a>(
		&'a self,
		_cfg: &'a KnowledgeBaseProviderConfig,
		_query: &'a str,
		_filter: Option<&'a Map<String, Value>>,
		top_k: u32,
	) -> BoxFuture<'a, sage_providers::Result<Vec<KnowledgeHit>>> {
		self.search_calls.fetch_add(1, Ordering::SeqCst);

		let result = if self.fail_all {
			Err(ProviderError::InvalidResponse {
				message: "Scripted knowledge base failure.".to_string(),
			})
		} else {
			Ok(self.hits.iter().take(top_k as usize).cloned().collect())
		};

		Box::pin(async move { result })
	}

	fn embed_and_index<'a>(
		&'a self,
		_cfg: &'a KnowledgeBaseProviderConfig,
		text: &'a str,
		metadata: &'a Map<String, Value>,
	) -> BoxFuture<'a, sage_providers::Result<String>> {
		lock(&self.indexed).push((text.to_string(), metadata.clone()));

		let source = metadata.get("source").and_then(|v| v.as_str()).unwrap_or(text);
		let doc_id = sage_providers::knowledge_base::document_id(source);

		Box::pin(async move { Ok(doc_id) })
	}
}

/// Report store that keeps reports in memory instead of writing files.
#[derive(Default)]
pub struct MemoryReportStore {
	pub fail: bool,
	pub saved: Arc<Mutex<Vec<Report>>>,
}

impl ReportStore for MemoryReportStore {
	fn save_report<'a>(
		&'a self,
		dir: &'a Path,
		report: &'a Report,
	) -> BoxFuture<'a, sage_providers::Result<PathBuf>> {
		let result = if self.fail {
			Err(ProviderError::InvalidConfig { message: "Scripted report failure.".to_string() })
		} else {
			lock(&self.saved).push(report.clone());

			Ok(dir.join(report::report_file_name(report)))
		};

		Box::pin(async move { result })
	}
}

/// Shared handles to the doubles wired into a [`Providers`].
pub struct Harness {
	pub completion: Arc<SpyCompletion>,
	pub web_search: Arc<SpyWebSearch>,
	pub knowledge_base: Arc<SpyKnowledgeBase>,
	pub reports: Arc<MemoryReportStore>,
}
impl Harness {
	pub fn new(
		completion: SpyCompletion,
		web_search: SpyWebSearch,
		knowledge_base: SpyKnowledgeBase,
		reports: MemoryReportStore,
	) -> Self {
		Self {
			completion: Arc::new(completion),
			web_search: Arc::new(web_search),
			knowledge_base: Arc::new(knowledge_base),
			reports: Arc::new(reports),
		}
	}

	pub fn providers(&self) -> Providers {
		Providers::new(
			self.completion.clone(),
			self.web_search.clone(),
			self.knowledge_base.clone(),
			self.reports.clone(),
		)
	}
}

impl Default for Harness {
	fn default() -> Self {
		Self::new(
			SpyCompletion::default(),
			SpyWebSearch::default(),
			SpyKnowledgeBase::default(),
			MemoryReportStore::default(),
		)
	}
}

pub fn knowledge_hit(doc_id: &str, source: &str, text: &str, distance: f32) -> KnowledgeHit {
	let mut metadata = Map::new();

	metadata.insert("source".to_string(), Value::String(source.to_string()));
	metadata.insert("filename".to_string(), Value::String(source.to_string()));

	KnowledgeHit {
		doc_id: doc_id.to_string(),
		text: text.to_string(),
		metadata,
		distance: Some(distance),
		score: None,
	}
}

/// A valid configuration pointing at unroutable providers, with reports enabled.
pub fn test_config() -> Config {
	Config {
		service: Service {
			http_bind: "127.0.0.1:0".to_string(),
			log_level: "info".to_string(),
			stream_channel_capacity: 16,
		},
		providers: ProviderConfigs {
			completion: dummy_completion_provider(),
			web_search: WebSearchProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: None,
				path: "/search".to_string(),
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			knowledge_base: KnowledgeBaseProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: None,
				search_path: "/query".to_string(),
				index_path: "/add".to_string(),
				collection: "documents".to_string(),
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
		},
		session: Session::default(),
		expansion: Expansion::default(),
		selection: Selection::default(),
		retrieval: Retrieval::default(),
		synthesis: Synthesis::default(),
		reports: Reports { enabled: true, dir: Some(PathBuf::from("reports")) },
	}
}

pub fn dummy_completion_provider() -> CompletionProviderConfig {
	CompletionProviderConfig {
		provider_id: "test".to_string(),
		api_base: "http://127.0.0.1:1".to_string(),
		api_key: "test-key".to_string(),
		path: "/chat/completions".to_string(),
		model: "test".to_string(),
		temperature: 0.2,
		max_tokens: None,
		timeout_ms: 1_000,
		default_headers: Map::new(),
	}
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|err| err.into_inner())
}
