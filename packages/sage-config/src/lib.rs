mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	CompletionProviderConfig, Config, Expansion, KnowledgeBaseProviderConfig, Providers, Reports,
	Retrieval, Selection, Service, Session, Synthesis, WebSearchProviderConfig,
};

use std::{fs, path::Path};

pub const SELECTION_MODES: [&str; 3] = ["off", "lexical", "llm"];
pub const PERSONALITIES: [&str; 3] = ["professional", "academic", "casual"];

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.service.stream_channel_capacity == 0 {
		return Err(Error::Validation {
			message: "service.stream_channel_capacity must be greater than zero.".to_string(),
		});
	}

	let completion = &cfg.providers.completion;

	if completion.api_key.trim().is_empty() {
		return Err(Error::Validation {
			message: "Provider completion api_key must be non-empty.".to_string(),
		});
	}
	if !completion.temperature.is_finite() {
		return Err(Error::Validation {
			message: "providers.completion.temperature must be a finite number.".to_string(),
		});
	}
	if !(0.0..=2.0).contains(&completion.temperature) {
		return Err(Error::Validation {
			message: "providers.completion.temperature must be in the range 0.0-2.0.".to_string(),
		});
	}

	for (label, api_base, timeout_ms) in [
		("completion", &completion.api_base, completion.timeout_ms),
		("web_search", &cfg.providers.web_search.api_base, cfg.providers.web_search.timeout_ms),
		(
			"knowledge_base",
			&cfg.providers.knowledge_base.api_base,
			cfg.providers.knowledge_base.timeout_ms,
		),
	] {
		if api_base.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} api_base must be non-empty."),
			});
		}
		if timeout_ms == 0 {
			return Err(Error::Validation {
				message: format!("Provider {label} timeout_ms must be greater than zero."),
			});
		}
	}

	if cfg.providers.knowledge_base.collection.trim().is_empty() {
		return Err(Error::Validation {
			message: "providers.knowledge_base.collection must be non-empty.".to_string(),
		});
	}
	if !PERSONALITIES.contains(&cfg.session.personality.as_str()) {
		return Err(Error::Validation {
			message: "session.personality must be one of professional, academic, or casual."
				.to_string(),
		});
	}
	if cfg.session.max_prompt_chars == 0 {
		return Err(Error::Validation {
			message: "session.max_prompt_chars must be greater than zero.".to_string(),
		});
	}
	if cfg.expansion.max_subqueries == 0 {
		return Err(Error::Validation {
			message: "expansion.max_subqueries must be greater than zero.".to_string(),
		});
	}
	if !SELECTION_MODES.contains(&cfg.selection.mode.as_str()) {
		return Err(Error::Validation {
			message: "selection.mode must be one of off, lexical, or llm.".to_string(),
		});
	}

	for (label, value) in [
		("selection.top_n", cfg.selection.top_n as usize),
		("selection.samples", cfg.selection.samples as usize),
		("selection.concurrency", cfg.selection.concurrency),
		("retrieval.web_results_per_query", cfg.retrieval.web_results_per_query as usize),
		("retrieval.web_concurrency", cfg.retrieval.web_concurrency),
		("retrieval.max_page_chars", cfg.retrieval.max_page_chars),
		("retrieval.local_top_k", cfg.retrieval.local_top_k as usize),
		("synthesis.max_context_chars", cfg.synthesis.max_context_chars),
		("synthesis.max_doc_chars", cfg.synthesis.max_doc_chars),
	] {
		if value == 0 {
			return Err(Error::Validation { message: format!("{label} must be greater than zero.") });
		}
	}

	if cfg.synthesis.max_doc_chars > cfg.synthesis.max_context_chars {
		return Err(Error::Validation {
			message: "synthesis.max_doc_chars must not exceed synthesis.max_context_chars."
				.to_string(),
		});
	}
	if cfg.reports.enabled && cfg.reports.dir.is_none() {
		return Err(Error::Validation {
			message: "reports.dir must be set when reports.enabled is true.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	for key in
		[&mut cfg.providers.web_search.api_key, &mut cfg.providers.knowledge_base.api_key]
	{
		if key.as_deref().map(|value| value.trim().is_empty()).unwrap_or(false) {
			*key = None;
		}
	}

	if cfg.reports.dir.as_deref().map(|dir| dir.as_os_str().is_empty()).unwrap_or(false) {
		cfg.reports.dir = None;
	}

	cfg.session.personality = cfg.session.personality.trim().to_lowercase();
	cfg.selection.mode = cfg.selection.mode.trim().to_lowercase();
}
