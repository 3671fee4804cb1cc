use serde_json::Value;

use crate::{CompletionProvider, retrieval};
use sage_config::{Config, Synthesis};
use sage_domain::{Personality, WebSearchDocument, text};
use sage_providers::completion::Completion;

/// Below this many characters of remaining budget a partially fitting excerpt is dropped rather
/// than cut.
const MIN_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct SynthesisPrompt {
	pub messages: Vec<Value>,
	/// How many documents made it into the context, counted from the top of the ranking.
	pub included_docs: usize,
}

pub async fn synthesize_final_answer(
	cfg: &Config,
	completion: &dyn CompletionProvider,
	query: &str,
	docs: &[WebSearchDocument],
	personality: Personality,
) -> sage_providers::Result<Completion> {
	let prompt = build_synthesis_prompt(query, docs, personality, &cfg.synthesis);

	tracing::debug!(
		documents = docs.len(),
		included = prompt.included_docs,
		"Synthesizing final answer."
	);

	completion.complete(&cfg.providers.completion, &prompt.messages).await
}

/// Assembles the answer prompt. The query is always present in full; documents are deduplicated,
/// each excerpt is capped at `max_doc_chars`, and excerpts are dropped from the bottom of the
/// ranking once `max_context_chars` is spent.
pub fn build_synthesis_prompt(
	query: &str,
	docs: &[WebSearchDocument],
	personality: Personality,
	budget: &Synthesis,
) -> SynthesisPrompt {
	let docs = retrieval::merge_unique([docs.to_vec()]);
	let mut context = String::new();
	let mut remaining = budget.max_context_chars;
	let mut included_docs = 0;

	for doc in &docs {
		let body = if doc.content().is_empty() { doc.snippet() } else { doc.content() };
		let (body, _) = text::truncate_graphemes(body, budget.max_doc_chars);
		let excerpt = format_excerpt(included_docs + 1, doc, body);
		let excerpt_len = text::grapheme_len(&excerpt);

		if excerpt_len <= remaining {
			remaining -= excerpt_len;
		} else if remaining >= MIN_EXCERPT_CHARS {
			let (cut, _) = text::truncate_graphemes(&excerpt, remaining);

			context.push_str(cut);
			context.push_str("\n\n");

			included_docs += 1;

			break;
		} else {
			break;
		}

		context.push_str(&excerpt);
		context.push_str("\n\n");

		included_docs += 1;
	}

	let system_prompt = format!(
		"You are a research assistant. Answer the user's question using the numbered sources \
when they are relevant and cite them as [n]. {}",
		personality.tone_instruction()
	);
	let mut user_prompt = format!("Question:\n{query}\n\n");

	if docs.is_empty() {
		user_prompt.push_str(
			"No sources were retrieved. Answer from general knowledge and say that no sources were consulted.",
		);
	} else if included_docs == 0 {
		user_prompt.push_str(&format!(
			"Sources were retrieved ({}) but none fit in the context window. Answer from general \
knowledge and say that the sources could not be read.",
			docs.len()
		));
	} else {
		user_prompt.push_str(&format!("Sources:\n{}", context.trim_end()));
	}

	SynthesisPrompt {
		messages: vec![
			serde_json::json!({ "role": "system", "content": system_prompt }),
			serde_json::json!({ "role": "user", "content": user_prompt }),
		],
		included_docs,
	}
}

fn format_excerpt(n: usize, doc: &WebSearchDocument, body: &str) -> String {
	let title = if doc.title().is_empty() { doc.source_id() } else { doc.title() };

	if doc.url().is_empty() {
		format!("[{n}] {title}\n{body}")
	} else {
		format!("[{n}] {title} ({})\n{body}", doc.url())
	}
}
