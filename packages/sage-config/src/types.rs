use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub providers: Providers,
	#[serde(default)]
	pub session: Session,
	#[serde(default)]
	pub expansion: Expansion,
	#[serde(default)]
	pub selection: Selection,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub synthesis: Synthesis,
	pub reports: Reports,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
	#[serde(default = "default_stream_channel_capacity")]
	pub stream_channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub completion: CompletionProviderConfig,
	pub web_search: WebSearchProviderConfig,
	pub knowledge_base: KnowledgeBaseProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	/// Optional. Upper bound on generated tokens per call.
	pub max_tokens: Option<u32>,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSearchProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	/// Optional. Providers such as a self-hosted SearXNG need no key.
	pub api_key: Option<String>,
	pub path: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeBaseProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: Option<String>,
	pub search_path: String,
	pub index_path: String,
	pub collection: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Session {
	pub personality: String,
	pub max_depth: u32,
	pub max_prompt_chars: usize,
	/// Applied when a request leaves `expand_query` unset.
	pub expand_by_default: bool,
}
impl Default for Session {
	fn default() -> Self {
		Self {
			personality: "professional".to_string(),
			max_depth: 3,
			max_prompt_chars: 4_000,
			expand_by_default: true,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Expansion {
	pub max_subqueries: u32,
	pub include_original: bool,
}
impl Default for Expansion {
	fn default() -> Self {
		Self { max_subqueries: 5, include_original: true }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Selection {
	/// One of off, lexical, or llm.
	pub mode: String,
	pub top_n: u32,
	pub samples: u32,
	pub concurrency: usize,
}
impl Default for Selection {
	fn default() -> Self {
		Self { mode: "off".to_string(), top_n: 3, samples: 3, concurrency: 4 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub web_results_per_query: u32,
	pub web_concurrency: usize,
	pub fetch_pages: bool,
	pub max_page_chars: usize,
	pub local_top_k: u32,
	pub index_web_results: bool,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self {
			web_results_per_query: 5,
			web_concurrency: 4,
			fetch_pages: false,
			max_page_chars: 20_000,
			local_top_k: 3,
			index_web_results: false,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Synthesis {
	pub max_context_chars: usize,
	pub max_doc_chars: usize,
}
impl Default for Synthesis {
	fn default() -> Self {
		Self { max_context_chars: 24_000, max_doc_chars: 4_000 }
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct Reports {
	pub enabled: bool,
	pub dir: Option<PathBuf>,
}

fn default_stream_channel_capacity() -> usize {
	16
}
