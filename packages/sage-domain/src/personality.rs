use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Voice used when the final answer is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Personality {
	#[default]
	Professional,
	Academic,
	Casual,
}
impl Personality {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Professional => "professional",
			Self::Academic => "academic",
			Self::Casual => "casual",
		}
	}

	pub fn tone_instruction(self) -> &'static str {
		match self {
			Self::Professional =>
				"Write in a clear, professional tone suitable for a business report.",
			Self::Academic =>
				"Write in a precise academic tone and qualify claims the sources do not settle.",
			Self::Casual => "Write in a friendly, plain-spoken tone and avoid jargon.",
		}
	}
}

impl FromStr for Personality {
	type Err = String;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		match value.trim().to_ascii_lowercase().as_str() {
			"professional" => Ok(Self::Professional),
			"academic" => Ok(Self::Academic),
			"casual" => Ok(Self::Casual),
			other => Err(format!("Unknown personality {other:?}.")),
		}
	}
}

impl fmt::Display for Personality {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
