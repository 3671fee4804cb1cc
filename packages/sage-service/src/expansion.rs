//! Query cleaning and LLM-driven subquery generation.

use serde_json::Value;
use tracing::warn;

use crate::CompletionProvider;
use sage_config::Config;
use sage_domain::{subquery, text};

pub struct Expansion {
	pub subqueries: Vec<String>,
	pub tokens_used: u64,
}
impl Expansion {
	/// The list a session searches with when expansion is skipped or fails.
	pub fn passthrough(query: &str) -> Self {
		Self { subqueries: vec![query.to_string()], tokens_used: 0 }
	}
}

/// Normalizes a raw prompt into a search query. Idempotent: cleaning a cleaned query is a no-op.
pub fn clean(raw: &str) -> String {
	text::clean_search_query(raw)
}

/// Asks the completion model for focused variations of `query`.
///
/// Never fails: a provider error or an unusable answer degrades to `[query]`. Tokens reported by a
/// call that answered are still counted even when the answer is discarded.
pub async fn generate_subqueries(
	cfg: &Config,
	completion: &dyn CompletionProvider,
	query: &str,
) -> Expansion {
	let expansion_cfg = &cfg.expansion;
	let messages = build_expansion_messages(query, expansion_cfg.max_subqueries);
	let response = match completion.complete(&cfg.providers.completion, &messages).await {
		Ok(response) => response,
		Err(err) => {
			warn!(error = %err, "Subquery generation failed; falling back to the original query.");

			return Expansion::passthrough(query);
		},
	};
	let candidates = subquery::parse_subquery_list(&response.text)
		.into_iter()
		.map(|candidate| clean(&candidate))
		.collect::<Vec<_>>();
	let subqueries = subquery::normalize_subqueries(
		candidates,
		query,
		expansion_cfg.include_original,
		expansion_cfg.max_subqueries as usize,
	);

	if subqueries.is_empty() {
		warn!("Subquery generation returned no usable queries; falling back to the original query.");

		return Expansion { subqueries: vec![query.to_string()], tokens_used: response.tokens_used };
	}

	Expansion { subqueries, tokens_used: response.tokens_used }
}

fn build_expansion_messages(query: &str, max_subqueries: u32) -> Vec<Value> {
	let system_prompt = "You plan web research. Break the user's question into short, \
self-contained search engine queries that together cover what is needed to answer it. \
Reply with a JSON array of strings and nothing else.";
	let user_prompt = format!(
		"Write at most {max_subqueries} search queries for the question below.\nQuestion:\n{query}"
	);

	vec![
		serde_json::json!({ "role": "system", "content": system_prompt }),
		serde_json::json!({ "role": "user", "content": user_prompt }),
	]
}
