use serde::{Deserialize, Serialize};

use crate::text;

const LOCAL_SNIPPET_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentOrigin {
	Web,
	Local,
}

/// One piece of retrieved evidence. Values are never mutated after construction; page download
/// produces a new document through [`WebSearchDocument::with_content`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSearchDocument {
	source_id: String,
	url: String,
	title: String,
	snippet: String,
	content: String,
	origin: DocumentOrigin,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	relevance_score: Option<f32>,
}
impl WebSearchDocument {
	/// A web search hit. The source id is derived from the normalized URL so two hits for the
	/// same page collapse to one identity.
	pub fn web(url: &str, title: &str, snippet: &str) -> Self {
		let normalized = normalize_url(url);

		Self {
			source_id: blake3::hash(normalized.as_bytes()).to_hex().to_string(),
			url: url.trim().to_string(),
			title: title.trim().to_string(),
			snippet: snippet.trim().to_string(),
			content: snippet.trim().to_string(),
			origin: DocumentOrigin::Web,
			relevance_score: None,
		}
	}

	/// A knowledge-base hit keyed by the store's document id.
	pub fn local(
		doc_id: &str,
		source: &str,
		title: &str,
		text: &str,
		relevance_score: Option<f32>,
	) -> Self {
		Self {
			source_id: doc_id.to_string(),
			url: source.to_string(),
			title: title.to_string(),
			snippet: local_snippet(text),
			content: text.to_string(),
			origin: DocumentOrigin::Local,
			relevance_score: relevance_score.filter(|score| score.is_finite()),
		}
	}

	pub fn with_content(self, content: String) -> Self {
		Self { content, ..self }
	}

	pub fn source_id(&self) -> &str {
		&self.source_id
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	pub fn title(&self) -> &str {
		&self.title
	}

	pub fn snippet(&self) -> &str {
		&self.snippet
	}

	pub fn content(&self) -> &str {
		&self.content
	}

	pub fn origin(&self) -> DocumentOrigin {
		self.origin
	}

	pub fn relevance_score(&self) -> Option<f32> {
		self.relevance_score
	}
}

/// Canonical form used for deduplication: lowercase scheme and host, no fragment, no default
/// port, no trailing slash on the path.
pub fn normalize_url(raw: &str) -> String {
	let trimmed = raw.trim();
	let without_fragment = trimmed.split_once('#').map(|(head, _)| head).unwrap_or(trimmed);
	let Some((scheme, rest)) = without_fragment.split_once("://") else {
		return without_fragment.trim_end_matches('/').to_string();
	};
	let scheme = scheme.to_ascii_lowercase();
	let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
	let (authority, tail) = rest.split_at(authority_end);
	let mut host = authority.to_ascii_lowercase();

	for (default_scheme, port) in [("http", ":80"), ("https", ":443")] {
		if scheme == default_scheme && host.ends_with(port) {
			host.truncate(host.len() - port.len());
		}
	}

	let (path, query) = match tail.split_once('?') {
		Some((path, query)) => (path, Some(query)),
		None => (tail, None),
	};
	let path = path.trim_end_matches('/');

	match query.filter(|query| !query.is_empty()) {
		Some(query) => format!("{scheme}://{host}{path}?{query}"),
		None => format!("{scheme}://{host}{path}"),
	}
}

/// First characters of a stored document with line breaks flattened.
pub fn local_snippet(text: &str) -> String {
	let (head, truncated) = text::truncate_graphemes(text, LOCAL_SNIPPET_CHARS);
	let flat = head.replace(['\r', '\n'], " ");

	if truncated { format!("{flat}...") } else { flat }
}
