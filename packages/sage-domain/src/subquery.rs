use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;
use serde::Deserialize;

static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^(?:\(?\d{1,2}\s*[.):]|[-*+\u{2022}])\s+").expect("list marker pattern is valid")
});

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonList {
	Plain(Vec<String>),
	Wrapped { queries: Vec<String> },
}

/// Extracts candidate searches from a completion response.
///
/// JSON arrays (bare or under a `queries` key) are accepted first. Otherwise, when any line
/// carries a list marker only marked lines count, so a preamble such as "Here are some queries:"
/// is dropped. Unmarked lines ending in a colon are treated as preamble, and a single remaining
/// line is split on semicolons.
pub fn parse_subquery_list(response: &str) -> Vec<String> {
	if let Some(items) = parse_json_list(response) {
		return items.iter().map(|item| strip_decoration(item)).filter(|item| !item.is_empty()).collect();
	}

	let lines: Vec<&str> =
		response.lines().map(str::trim).filter(|line| !line.is_empty()).collect();
	let marked: Vec<&str> = lines.iter().copied().filter(|line| LIST_MARKER.is_match(line)).collect();
	let picked: Vec<String> = if !marked.is_empty() {
		marked.iter().map(|line| LIST_MARKER.replace(line, "").into_owned()).collect()
	} else {
		let content: Vec<&str> =
			lines.iter().copied().filter(|line| !line.ends_with(':')).collect();

		match content.as_slice() {
			[single] => single.split(';').map(str::to_string).collect(),
			_ => content.iter().map(|line| line.to_string()).collect(),
		}
	};

	picked.iter().map(|item| strip_decoration(item)).filter(|item| !item.is_empty()).collect()
}

/// Dedupes case-insensitively in first-seen order, optionally leads with `original`, and caps the
/// list at `max`.
pub fn normalize_subqueries(
	candidates: Vec<String>,
	original: &str,
	include_original: bool,
	max: usize,
) -> Vec<String> {
	let mut out = Vec::new();
	let mut seen = HashSet::new();

	if include_original {
		push_subquery(&mut out, &mut seen, original);
	}

	for candidate in candidates {
		if out.len() >= max {
			break;
		}

		push_subquery(&mut out, &mut seen, &candidate);
	}

	out.truncate(max);

	out
}

fn push_subquery(out: &mut Vec<String>, seen: &mut HashSet<String>, value: &str) {
	let trimmed = value.trim();

	if trimmed.is_empty() {
		return;
	}

	if seen.insert(trimmed.to_lowercase()) {
		out.push(trimmed.to_string());
	}
}

fn parse_json_list(response: &str) -> Option<Vec<String>> {
	let trimmed = response.trim();
	let start = trimmed.find(['[', '{'])?;
	let end = trimmed.rfind([']', '}'])?;

	if end < start {
		return None;
	}

	match serde_json::from_str::<JsonList>(&trimmed[start..=end]).ok()? {
		JsonList::Plain(items) | JsonList::Wrapped { queries: items } => Some(items),
	}
}

fn strip_decoration(item: &str) -> String {
	item.trim()
		.trim_matches(|ch| matches!(ch, '"' | '\'' | '`' | '*'))
		.trim()
		.to_string()
}
