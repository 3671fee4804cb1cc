//! Optional pruning of the subquery list down to the most promising candidates.
//!
//! Scoring sits behind [`RelevanceScorer`]. [`LexicalScorer`] is deterministic and free;
//! [`CompletionScorer`] samples the completion model several times per candidate and averages the
//! ratings, which is where the randomness of the selection comes from.

use std::{cmp::Ordering, collections::HashSet};

use futures::{StreamExt, stream};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{BoxFuture, CompletionProvider};
use sage_config::{CompletionProviderConfig, Config};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
	Off,
	Lexical,
	Llm,
}
impl SelectionMode {
	pub fn from_config(cfg: &Config) -> Self {
		match cfg.selection.mode.as_str() {
			"lexical" => Self::Lexical,
			"llm" => Self::Llm,
			_ => Self::Off,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
	/// In `[0, 1]`, higher is more relevant. `None` when no usable rating came back.
	pub value: Option<f32>,
	/// Spent whether or not a rating came back.
	pub tokens_used: u64,
}

pub trait RelevanceScorer
where
	Self: Send + Sync,
{
	fn score<'a>(&'a self, query: &'a str, candidate: &'a str) -> BoxFuture<'a, Score>;
}

/// Fraction of the query's terms that the candidate repeats.
pub struct LexicalScorer;

impl RelevanceScorer for LexicalScorer {
	fn score<'a>(&'a self, query: &'a str, candidate: &'a str) -> BoxFuture<'a, Score> {
		Box::pin(async move { Score { value: Some(lexical_overlap(query, candidate)), tokens_used: 0 } })
	}
}

pub struct CompletionScorer<'c> {
	pub provider: &'c dyn CompletionProvider,
	pub cfg: &'c CompletionProviderConfig,
	pub samples: u32,
}

impl RelevanceScorer for CompletionScorer<'_> {
	fn score<'a>(&'a self, query: &'a str, candidate: &'a str) -> BoxFuture<'a, Score> {
		Box::pin(async move {
			let messages = build_rating_messages(query, candidate);
			let mut ratings = Vec::new();
			let mut tokens_used = 0;

			for _ in 0..self.samples.max(1) {
				match self.provider.complete(self.cfg, &messages).await {
					Ok(response) => {
						tokens_used += response.tokens_used;

						match parse_rating(&response.text) {
							Some(rating) => ratings.push(rating),
							None => debug!(reply = %response.text, "Relevance reply carried no rating."),
						}
					},
					Err(err) => debug!(error = %err, "Relevance sample failed."),
				}
			}

			let value = (!ratings.is_empty())
				.then(|| ratings.iter().sum::<f32>() / ratings.len() as f32 / 10.0);

			Score { value, tokens_used }
		})
	}
}

pub struct Selected {
	pub subqueries: Vec<String>,
	pub tokens_used: u64,
}

/// Keeps the `top_n` best subqueries for `query`, or returns the list unchanged when selection is
/// off or the list is already short enough. The result is never empty for a non-empty input.
pub async fn maybe_monte_carlo(
	cfg: &Config,
	completion: &dyn CompletionProvider,
	subqueries: Vec<String>,
	query: &str,
) -> Selected {
	let mode = SelectionMode::from_config(cfg);
	let top_n = cfg.selection.top_n.max(1) as usize;

	if mode == SelectionMode::Off || subqueries.len() <= top_n {
		return Selected { subqueries, tokens_used: 0 };
	}

	let concurrency = cfg.selection.concurrency.max(1);

	if mode == SelectionMode::Llm {
		let scorer = CompletionScorer {
			provider: completion,
			cfg: &cfg.providers.completion,
			samples: cfg.selection.samples,
		};
		let (selected, tokens_used) =
			select_top(&scorer, &subqueries, query, top_n, concurrency).await;

		if !selected.is_empty() {
			return Selected { subqueries: selected, tokens_used };
		}

		warn!("Every relevance rating failed; selecting subqueries lexically.");

		let (selected, _) = select_top(&LexicalScorer, &subqueries, query, top_n, concurrency).await;

		return Selected { subqueries: selected, tokens_used };
	}

	let (selected, tokens_used) =
		select_top(&LexicalScorer, &subqueries, query, top_n, concurrency).await;

	Selected { subqueries: selected, tokens_used }
}

/// Scores every candidate and returns the best `top_n` with every token spent scoring, including
/// tokens spent on candidates that got no rating. Unrated candidates are dropped; ties keep their
/// original order.
pub async fn select_top(
	scorer: &dyn RelevanceScorer,
	subqueries: &[String],
	query: &str,
	top_n: usize,
	concurrency: usize,
) -> (Vec<String>, u64) {
	let pending = subqueries
		.iter()
		.enumerate()
		.map(|(idx, candidate)| async move { (idx, scorer.score(query, candidate).await) })
		.collect::<Vec<_>>();
	let mut scored =
		stream::iter(pending).buffer_unordered(concurrency.max(1)).collect::<Vec<_>>().await;

	scored.sort_by_key(|(idx, _)| *idx);

	let mut tokens_used = 0;
	let mut ranked = Vec::new();

	for (idx, score) in scored {
		tokens_used += score.tokens_used;

		match score.value {
			Some(value) => ranked.push((idx, value)),
			None => debug!(subquery = %subqueries[idx], "Dropping unscored subquery."),
		}
	}

	ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

	let selected =
		ranked.into_iter().take(top_n).map(|(idx, _)| subqueries[idx].clone()).collect();

	(selected, tokens_used)
}

pub fn lexical_overlap(query: &str, candidate: &str) -> f32 {
	let query_terms = terms(query);

	if query_terms.is_empty() {
		return 0.0;
	}

	let candidate_terms = terms(candidate);
	let shared = query_terms.intersection(&candidate_terms).count();

	shared as f32 / query_terms.len() as f32
}

fn terms(text: &str) -> HashSet<String> {
	text.split(|ch: char| !ch.is_alphanumeric())
		.filter(|term| term.chars().count() > 1)
		.map(str::to_lowercase)
		.collect()
}

fn build_rating_messages(query: &str, candidate: &str) -> Vec<Value> {
	let system_prompt = "You judge web searches. Rate how useful running the search would be for \
answering the question, from 0 (useless) to 10 (essential). Reply with the number only.";
	let user_prompt = format!("Question:\n{query}\nSearch:\n{candidate}");

	vec![
		serde_json::json!({ "role": "system", "content": system_prompt }),
		serde_json::json!({ "role": "user", "content": user_prompt }),
	]
}

/// First number in the reply, clamped to the 0..=10 scale.
fn parse_rating(reply: &str) -> Option<f32> {
	reply
		.split(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
		.map(|token| token.trim_matches('.'))
		.find(|token| !token.is_empty())
		.and_then(|token| token.parse::<f32>().ok())
		.filter(|rating| rating.is_finite())
		.map(|rating| rating.clamp(0.0, 10.0))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rating_parser_reads_first_number() {
		assert_eq!(parse_rating("8"), Some(8.0));
		assert_eq!(parse_rating("Rating: 7.5/10"), Some(7.5));
		assert_eq!(parse_rating("42"), Some(10.0));
		assert_eq!(parse_rating("not sure"), None);
	}

	#[test]
	fn overlap_counts_shared_terms() {
		assert_eq!(lexical_overlap("rust async runtime", "comparing async runtime crates"), 2.0 / 3.0);
		assert_eq!(lexical_overlap("rust", "python"), 0.0);
		assert_eq!(lexical_overlap("", "anything"), 0.0);
	}

	#[tokio::test]
	async fn lexical_selection_is_stable_on_ties() {
		let subqueries = vec![
			"weather today".to_string(),
			"tokio runtime internals".to_string(),
			"tokio scheduler".to_string(),
			"tokio io driver".to_string(),
		];
		let (selected, tokens) =
			select_top(&LexicalScorer, &subqueries, "tokio runtime", 2, 2).await;

		assert_eq!(selected, vec!["tokio runtime internals".to_string(), "tokio scheduler".to_string()]);
		assert_eq!(tokens, 0);
	}

	struct CostlyScorer;
	impl RelevanceScorer for CostlyScorer {
		fn score<'a>(&'a self, _: &'a str, candidate: &'a str) -> BoxFuture<'a, Score> {
			let value = candidate.starts_with("rated").then_some(0.5);

			Box::pin(async move { Score { value, tokens_used: 7 } })
		}
	}

	#[tokio::test]
	async fn unrated_candidates_still_cost_tokens() {
		let subqueries =
			vec!["unrated one".to_string(), "rated two".to_string(), "unrated three".to_string()];
		let (selected, tokens) = select_top(&CostlyScorer, &subqueries, "anything", 3, 2).await;

		assert_eq!(selected, vec!["rated two".to_string()]);
		assert_eq!(tokens, 21);
	}
}
