use serde_json::{Map, Value};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeHit {
	pub doc_id: String,
	pub text: String,
	pub metadata: Map<String, Value>,
	/// Lower is closer. Present when the store reports distances.
	pub distance: Option<f32>,
	/// Higher is better. Present when the store reports similarity scores.
	pub score: Option<f32>,
}
impl KnowledgeHit {
	pub fn source(&self) -> Option<&str> {
		self.metadata.get("source").and_then(|v| v.as_str())
	}

	pub fn title(&self) -> Option<&str> {
		["title", "filename"]
			.iter()
			.find_map(|key| self.metadata.get(*key).and_then(|v| v.as_str()))
	}
}

/// Stable id for an indexed document, derived from where it came from.
pub fn document_id(source: &str) -> String {
	blake3::hash(source.as_bytes()).to_hex().to_string()
}

/// Similarity search against the document store.
///
/// Both a flat `results` list and the column-oriented payload returned by Chroma-style stores
/// (`ids`, `documents`, `metadatas`, `distances`, one inner list per query) are accepted.
pub async fn search(
	cfg: &sage_config::KnowledgeBaseProviderConfig,
	query: &str,
	filter: Option<&Map<String, Value>>,
	top_k: u32,
) -> Result<Vec<KnowledgeHit>> {
	let client = crate::http_client(cfg.timeout_ms)?;
	let url = crate::join_url(&cfg.api_base, &cfg.search_path);
	let mut body = serde_json::json!({
		"collection": cfg.collection,
		"query": query,
		"top_k": top_k,
	});

	if let Some(filter) = filter.filter(|filter| !filter.is_empty()) {
		body["where"] = Value::Object(filter.clone());
	}

	let res = client
		.post(url)
		.headers(crate::auth_headers(cfg.api_key.as_deref(), &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_search_response(&json)
}

/// Embeds and stores `text`, returning the document id it was stored under. The id comes from
/// `metadata.source` when present so re-indexing the same source overwrites instead of
/// duplicating.
pub async fn embed_and_index(
	cfg: &sage_config::KnowledgeBaseProviderConfig,
	text: &str,
	metadata: &Map<String, Value>,
) -> Result<String> {
	let client = crate::http_client(cfg.timeout_ms)?;
	let url = crate::join_url(&cfg.api_base, &cfg.index_path);
	let doc_id = document_id(metadata.get("source").and_then(|v| v.as_str()).unwrap_or(text));
	let body = serde_json::json!({
		"collection": cfg.collection,
		"ids": [doc_id],
		"documents": [text],
		"metadatas": [metadata],
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(cfg.api_key.as_deref(), &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await.unwrap_or(Value::Null);
	let stored = json
		.get("ids")
		.and_then(|ids| ids.as_array())
		.and_then(|ids| ids.first())
		.and_then(|id| id.as_str())
		.map(str::to_string);

	Ok(stored.unwrap_or(doc_id))
}

fn parse_search_response(json: &Value) -> Result<Vec<KnowledgeHit>> {
	if let Some(results) = json.get("results").and_then(|v| v.as_array()) {
		return results.iter().map(parse_flat_hit).collect();
	}

	let ids = first_column(json, "ids").ok_or_else(|| Error::InvalidResponse {
		message: "Knowledge base response is missing results.".to_string(),
	})?;
	let documents = first_column(json, "documents").unwrap_or_default();
	let metadatas = first_column(json, "metadatas").unwrap_or_default();
	let distances = first_column(json, "distances").unwrap_or_default();
	let mut hits = Vec::with_capacity(ids.len());

	for (idx, id) in ids.iter().enumerate() {
		let Some(doc_id) = id.as_str() else {
			continue;
		};

		hits.push(KnowledgeHit {
			doc_id: doc_id.to_string(),
			text: documents.get(idx).and_then(|v| v.as_str()).unwrap_or_default().to_string(),
			metadata: merge_metadata(metadatas.get(idx)),
			distance: distances.get(idx).and_then(|v| v.as_f64()).map(|v| v as f32),
			score: None,
		});
	}

	Ok(hits)
}

fn parse_flat_hit(item: &Value) -> Result<KnowledgeHit> {
	let doc_id = item
		.get("id")
		.or_else(|| item.get("doc_id"))
		.and_then(|v| v.as_str())
		.ok_or_else(|| Error::InvalidResponse {
			message: "Knowledge base result is missing an id.".to_string(),
		})?;

	Ok(KnowledgeHit {
		doc_id: doc_id.to_string(),
		text: item
			.get("document")
			.or_else(|| item.get("text"))
			.and_then(|v| v.as_str())
			.unwrap_or_default()
			.to_string(),
		metadata: merge_metadata(item.get("metadata")),
		distance: item.get("distance").and_then(|v| v.as_f64()).map(|v| v as f32),
		score: item.get("score").and_then(|v| v.as_f64()).map(|v| v as f32),
	})
}

// Column payloads nest one list per query; only one query is ever sent.
fn first_column<'a>(json: &'a Value, key: &str) -> Option<&'a [Value]> {
	let column = json.get(key)?.as_array()?;

	match column.first() {
		Some(Value::Array(inner)) => Some(inner.as_slice()),
		_ => Some(column.as_slice()),
	}
}

// Some stores hand back metadata as a list of single-key objects; fold those into one map.
fn merge_metadata(value: Option<&Value>) -> Map<String, Value> {
	match value {
		Some(Value::Object(map)) => map.clone(),
		Some(Value::Array(parts)) => {
			let mut merged = Map::new();

			for part in parts {
				if let Value::Object(map) = part {
					merged.extend(map.clone());
				}
			}

			merged
		},
		_ => Map::new(),
	}
}
