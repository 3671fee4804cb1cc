//! Framing for the streamed response body.
//!
//! Events are written as compact JSON, each followed by [`JSON_STREAM_SEPARATOR`]. serde_json
//! escapes every control character inside strings and never emits a raw newline in compact mode,
//! so the separator cannot occur inside an event.

use crate::StageEvent;

pub const JSON_STREAM_SEPARATOR: &str = "\u{1e}\n";

pub fn encode_event(event: &StageEvent) -> serde_json::Result<Vec<u8>> {
	let mut bytes = serde_json::to_vec(event)?;

	bytes.extend_from_slice(JSON_STREAM_SEPARATOR.as_bytes());

	Ok(bytes)
}

/// Decodes a complete or partially received body. A trailing fragment without a separator is
/// returned as the remainder so callers can keep buffering.
pub fn split_stream(body: &str) -> serde_json::Result<(Vec<StageEvent>, &str)> {
	let mut events = Vec::new();
	let mut rest = body;

	while let Some(end) = rest.find(JSON_STREAM_SEPARATOR) {
		let frame = &rest[..end];

		if !frame.trim().is_empty() {
			events.push(serde_json::from_str(frame)?);
		}

		rest = &rest[end + JSON_STREAM_SEPARATOR.len()..];
	}

	Ok((events, rest))
}
