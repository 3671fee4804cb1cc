use serde_json::Value;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebHit {
	pub url: String,
	pub title: String,
	pub snippet: String,
}

/// Queries a JSON web search API. SearXNG, Brave, and SerpAPI style payloads are understood.
pub async fn search(
	cfg: &sage_config::WebSearchProviderConfig,
	query: &str,
	max_results: u32,
) -> Result<Vec<WebHit>> {
	let client = crate::http_client(cfg.timeout_ms)?;
	let url = crate::join_url(&cfg.api_base, &cfg.path);
	let count = max_results.to_string();
	let res = client
		.get(url)
		.headers(crate::auth_headers(cfg.api_key.as_deref(), &cfg.default_headers)?)
		.query(&[("q", query), ("format", "json"), ("count", count.as_str())])
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_search_response(&json, max_results as usize)
}

/// Downloads a result page and returns its raw body.
pub async fn fetch_page(cfg: &sage_config::WebSearchProviderConfig, url: &str) -> Result<String> {
	let client = crate::http_client(cfg.timeout_ms)?;
	let res = client.get(url).send().await?;

	Ok(res.error_for_status()?.text().await?)
}

fn parse_search_response(json: &Value, max_results: usize) -> Result<Vec<WebHit>> {
	let results = json
		.get("results")
		.or_else(|| json.get("web").and_then(|web| web.get("results")))
		.or_else(|| json.get("organic_results"))
		.or_else(|| json.get("items"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Web search response is missing a results array.".to_string(),
		})?;
	let mut hits = Vec::with_capacity(results.len().min(max_results));

	for item in results {
		if hits.len() >= max_results {
			break;
		}

		let Some(url) = first_str(item, &["url", "link", "href"]) else {
			continue;
		};

		hits.push(WebHit {
			url: url.to_string(),
			title: first_str(item, &["title", "name"]).unwrap_or_default().to_string(),
			snippet: first_str(item, &["snippet", "content", "description"])
				.unwrap_or_default()
				.to_string(),
		});
	}

	Ok(hits)
}

fn first_str<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
	keys.iter()
		.filter_map(|key| item.get(*key).and_then(|v| v.as_str()))
		.map(str::trim)
		.find(|value| !value.is_empty())
}
