use serde_json::Value;

use crate::{Error, Result};

const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
	pub text: String,
	pub tokens_used: u64,
}

pub async fn complete(
	cfg: &sage_config::CompletionProviderConfig,
	messages: &[Value],
) -> Result<Completion> {
	let client = crate::http_client(cfg.timeout_ms)?;
	let url = crate::join_url(&cfg.api_base, &cfg.path);
	let mut body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": messages,
	});

	if let Some(max_tokens) = cfg.max_tokens {
		body["max_tokens"] = Value::from(max_tokens);
	}

	let mut last_err = None;
	// Usage reported by replies that were discarded and retried.
	let mut spent = 0;

	for attempt in 1..=MAX_ATTEMPTS {
		let res = client
			.post(&url)
			.headers(crate::auth_headers(Some(&cfg.api_key), &cfg.default_headers)?)
			.json(&body)
			.send()
			.await?;
		let json: Value = res.error_for_status()?.json().await?;

		match parse_completion_response(&json, messages) {
			Ok(completion) =>
				return Ok(Completion { tokens_used: completion.tokens_used + spent, ..completion }),
			Err(err) => {
				tracing::warn!(attempt, error = %err, "Completion response unusable; retrying.");

				spent += reported_usage(&json).unwrap_or_default();

				last_err = Some(err);
			},
		}
	}

	Err(last_err.unwrap_or_else(|| Error::InvalidResponse {
		message: "Completion provider returned no usable response.".to_string(),
	}))
}

/// Rough token count for providers that omit `usage`.
pub fn estimate_tokens(text: &str) -> u64 {
	(text.chars().count() as u64).div_ceil(4)
}

fn parse_completion_response(json: &Value, messages: &[Value]) -> Result<Completion> {
	let text = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
		.map(str::trim)
		.filter(|text| !text.is_empty())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Completion response is missing message content.".to_string(),
		})?
		.to_string();
	let tokens_used = reported_usage(json).unwrap_or_else(|| {
		let prompt: u64 = messages
			.iter()
			.filter_map(|msg| msg.get("content").and_then(|c| c.as_str()))
			.map(estimate_tokens)
			.sum();

		prompt + estimate_tokens(&text)
	});

	Ok(Completion { text, tokens_used })
}

/// Token usage the provider reported, whether or not the reply itself is usable.
fn reported_usage(json: &Value) -> Option<u64> {
	let usage = json.get("usage")?;

	usage.get("total_tokens").and_then(|v| v.as_u64()).or_else(|| {
		let prompt = usage.get("prompt_tokens")?.as_u64()?;
		let completion = usage.get("completion_tokens")?.as_u64()?;

		Some(prompt + completion)
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_content_and_usage() {
		let json = serde_json::json!({
			"choices": [{ "message": { "content": "  Entanglement links states.  " } }],
			"usage": { "prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17 }
		});
		let completion = parse_completion_response(&json, &[]).expect("parse failed");

		assert_eq!(completion.text, "Entanglement links states.");
		assert_eq!(completion.tokens_used, 17);
	}

	#[test]
	fn sums_partial_usage() {
		let json = serde_json::json!({
			"choices": [{ "message": { "content": "ok" } }],
			"usage": { "prompt_tokens": 3, "completion_tokens": 2 }
		});

		assert_eq!(parse_completion_response(&json, &[]).expect("parse failed").tokens_used, 5);
	}

	#[test]
	fn estimates_tokens_without_usage() {
		let messages = vec![serde_json::json!({ "role": "user", "content": "12345678" })];
		let json = serde_json::json!({ "choices": [{ "message": { "content": "abcd" } }] });

		assert_eq!(parse_completion_response(&json, &messages).expect("parse failed").tokens_used, 3);
	}

	#[test]
	fn rejects_empty_content() {
		let json = serde_json::json!({ "choices": [{ "message": { "content": "   " } }] });

		assert!(parse_completion_response(&json, &[]).is_err());
	}

	#[test]
	fn usage_is_read_from_unusable_replies() {
		let json = serde_json::json!({
			"choices": [{ "message": { "content": "" } }],
			"usage": { "prompt_tokens": 9, "completion_tokens": 0 }
		});

		assert!(parse_completion_response(&json, &[]).is_err());
		assert_eq!(reported_usage(&json), Some(9));
		assert_eq!(reported_usage(&serde_json::json!({ "choices": [] })), None);
	}
}
