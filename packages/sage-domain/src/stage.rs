use serde::{Deserialize, Serialize};

/// Checkpoints reported to the client while a session advances.
///
/// A successful run emits a subsequence of [`SearchAllStage::CANONICAL`] that starts with
/// `Starting` and ends with `ResultsReady`. `Failed` is the error sentinel and sits outside the
/// canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchAllStage {
	Starting,
	ExpandingQuery,
	SelectingSubqueries,
	SearchingWeb,
	DownloadedWebpages,
	SearchingLocal,
	ReadingLocalKnowledge,
	ReadingWebpagesAndLocal,
	ResultsReady,
	Failed,
}
impl SearchAllStage {
	pub const CANONICAL: [Self; 9] = [
		Self::Starting,
		Self::ExpandingQuery,
		Self::SelectingSubqueries,
		Self::SearchingWeb,
		Self::DownloadedWebpages,
		Self::SearchingLocal,
		Self::ReadingLocalKnowledge,
		Self::ReadingWebpagesAndLocal,
		Self::ResultsReady,
	];

	/// Position in the canonical order, `None` for the error sentinel.
	pub fn ordinal(self) -> Option<usize> {
		Self::CANONICAL.iter().position(|stage| *stage == self)
	}

	pub fn is_terminal(self) -> bool {
		matches!(self, Self::ResultsReady | Self::Failed)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Starting => "STARTING",
			Self::ExpandingQuery => "EXPANDING_QUERY",
			Self::SelectingSubqueries => "SELECTING_SUBQUERIES",
			Self::SearchingWeb => "SEARCHING_WEB",
			Self::DownloadedWebpages => "DOWNLOADED_WEBPAGES",
			Self::SearchingLocal => "SEARCHING_LOCAL",
			Self::ReadingLocalKnowledge => "READING_LOCAL_KNOWLEDGE",
			Self::ReadingWebpagesAndLocal => "READING_WEBPAGES_AND_LOCAL",
			Self::ResultsReady => "RESULTS_READY",
			Self::Failed => "FAILED",
		}
	}
}

/// True when `stages` starts with `Starting` and every following stage is strictly later in the
/// canonical order. A trailing `Failed` sentinel is allowed.
pub fn is_canonical_progression(stages: &[SearchAllStage]) -> bool {
	let checkpoints = match stages.split_last() {
		Some((SearchAllStage::Failed, rest)) => rest,
		_ => stages,
	};

	if checkpoints.first() != Some(&SearchAllStage::Starting) {
		return false;
	}

	let mut last = None;

	for stage in checkpoints {
		let Some(ordinal) = stage.ordinal() else {
			return false;
		};

		if last.map(|prev| ordinal <= prev).unwrap_or(false) {
			return false;
		}

		last = Some(ordinal);
	}

	true
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn serializes_screaming_snake_case() {
		let json = serde_json::to_string(&SearchAllStage::ReadingWebpagesAndLocal)
			.expect("serialize failed");

		assert_eq!(json, "\"READING_WEBPAGES_AND_LOCAL\"");

		for stage in SearchAllStage::CANONICAL {
			assert_eq!(
				serde_json::to_string(&stage).expect("serialize failed"),
				format!("\"{}\"", stage.as_str())
			);
		}
	}

	#[test]
	fn progression_rejects_repeats_and_reordering() {
		use SearchAllStage::*;

		assert!(is_canonical_progression(&[Starting, ExpandingQuery, ResultsReady]));
		assert!(is_canonical_progression(&[Starting, ExpandingQuery, Failed]));
		assert!(!is_canonical_progression(&[ExpandingQuery, ResultsReady]));
		assert!(!is_canonical_progression(&[Starting, SearchingLocal, SearchingWeb]));
		assert!(!is_canonical_progression(&[Starting, Starting]));
		assert!(!is_canonical_progression(&[]));
	}
}
