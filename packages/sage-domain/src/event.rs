use serde::{Deserialize, Serialize};

use crate::{SearchAllStage, WebSearchDocument};

/// Wire-facing progress message. Documents and answer are only populated on the terminal
/// `ResultsReady` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvent {
	pub success: bool,
	pub stage: SearchAllStage,
	pub num_tokens_used: u64,
	pub websearch_docs: Vec<WebSearchDocument>,
	pub answer: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}
impl StageEvent {
	pub fn progress(stage: SearchAllStage, num_tokens_used: u64) -> Self {
		Self {
			success: true,
			stage,
			num_tokens_used,
			websearch_docs: Vec::new(),
			answer: String::new(),
			message: None,
		}
	}

	pub fn results_ready(
		num_tokens_used: u64,
		websearch_docs: Vec<WebSearchDocument>,
		answer: String,
	) -> Self {
		Self {
			success: true,
			stage: SearchAllStage::ResultsReady,
			num_tokens_used,
			websearch_docs,
			answer,
			message: None,
		}
	}

	pub fn failed(num_tokens_used: u64, message: impl Into<String>) -> Self {
		Self {
			success: false,
			stage: SearchAllStage::Failed,
			num_tokens_used,
			websearch_docs: Vec::new(),
			answer: String::new(),
			message: Some(message.into()),
		}
	}
}
