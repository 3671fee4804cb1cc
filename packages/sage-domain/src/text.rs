use std::sync::LazyLock;

use regex::{Captures, Regex};
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

static EMBEDDED_CODE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(
		r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>|<noscript\b.*?</noscript\s*>|<!--.*?-->",
	)
	.expect("embedded code pattern is valid")
});
static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"&(#[xX][0-9a-fA-F]{1,6}|#[0-9]{1,7}|[a-zA-Z]{2,8});")
		.expect("entity pattern is valid")
});

/// Strips formatting artifacts from a prompt or page without touching its wording.
///
/// Entities are decoded, markup tags dropped, invisible and control characters removed, the text
/// NFKC-normalized, and whitespace collapsed. Each pass can expose new artifacts (for example a
/// doubly escaped `&amp;lt;`), so passes repeat until the output stops changing, which makes
/// `clean_search_query(clean_search_query(x)) == clean_search_query(x)`. Past the first pass every
/// change removes an entity, a tag, or whitespace, so the loop terminates.
pub fn clean_search_query(raw: &str) -> String {
	let mut current = clean_once(raw);

	loop {
		let next = clean_once(&current);

		if next == current {
			return current;
		}

		current = next;
	}
}

/// Reduces a downloaded HTML page to readable text. Script, style, and comment bodies are
/// dropped before the page goes through [`clean_search_query`].
pub fn html_to_text(html: &str) -> String {
	clean_search_query(&EMBEDDED_CODE.replace_all(html, " "))
}

/// Returns the first `max` grapheme clusters of `text` and whether anything was cut.
pub fn truncate_graphemes(text: &str, max: usize) -> (&str, bool) {
	match text.grapheme_indices(true).nth(max) {
		Some((offset, _)) => (&text[..offset], true),
		None => (text, false),
	}
}

pub fn grapheme_len(text: &str) -> usize {
	text.graphemes(true).count()
}

fn clean_once(input: &str) -> String {
	let decoded = decode_entities(input);
	let stripped = strip_tags(&decoded);
	let normalized: String = stripped.nfkc().filter(|ch| !is_invisible(*ch)).collect();

	normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(input: &str) -> String {
	ENTITY
		.replace_all(input, |caps: &Captures<'_>| {
			let body = &caps[1];
			let decoded = if let Some(hex) = body.strip_prefix("#x").or(body.strip_prefix("#X")) {
				u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
			} else if let Some(dec) = body.strip_prefix('#') {
				dec.parse::<u32>().ok().and_then(char::from_u32)
			} else {
				named_entity(body)
			};

			match decoded {
				Some(ch) => ch.to_string(),
				None => caps[0].to_string(),
			}
		})
		.into_owned()
}

fn named_entity(name: &str) -> Option<char> {
	let ch = match name {
		"amp" => '&',
		"lt" => '<',
		"gt" => '>',
		"quot" => '"',
		"apos" => '\'',
		"nbsp" => ' ',
		"ndash" => '\u{2013}',
		"mdash" => '\u{2014}',
		"hellip" => '\u{2026}',
		"lsquo" => '\u{2018}',
		"rsquo" => '\u{2019}',
		"ldquo" => '\u{201C}',
		"rdquo" => '\u{201D}',
		"copy" => '\u{00A9}',
		"reg" => '\u{00AE}',
		"trade" => '\u{2122}',
		_ => return None,
	};

	Some(ch)
}

// A `<` only opens a tag when followed by a letter, `/`, `!`, or `?`, so comparisons such as
// `a < b` survive.
fn strip_tags(input: &str) -> String {
	let mut out = String::with_capacity(input.len());
	let mut rest = input;

	while let Some(start) = rest.find('<') {
		let (head, tail) = rest.split_at(start);
		let opens_tag = tail[1..]
			.chars()
			.next()
			.map(|ch| ch.is_ascii_alphabetic() || matches!(ch, '/' | '!' | '?'))
			.unwrap_or(false);

		out.push_str(head);

		match tail.find('>') {
			Some(end) if opens_tag => {
				out.push(' ');
				rest = &tail[end + 1..];
			},
			_ => {
				out.push('<');
				rest = &tail[1..];
			},
		}
	}

	out.push_str(rest);

	out
}

fn is_invisible(ch: char) -> bool {
	if ch.is_control() && !ch.is_whitespace() {
		return true;
	}

	matches!(
		ch,
		'\u{00AD}' // soft hyphen
			| '\u{200B}' // zero width space
			| '\u{200C}' // zero width non-joiner
			| '\u{200D}' // zero width joiner
			| '\u{2060}' // word joiner
			| '\u{FEFF}' // zero width no-break space
	)
}
