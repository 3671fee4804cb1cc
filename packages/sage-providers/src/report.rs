use std::path::{Path, PathBuf};

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::Result;

#[derive(Debug, Clone)]
pub struct Report {
	pub session_id: String,
	pub query: String,
	pub answer: String,
	pub sources: Vec<ReportSource>,
	pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct ReportSource {
	pub title: String,
	pub url: String,
}

/// Writes the report as markdown under `dir`, creating the directory when missing.
pub async fn save_report(dir: &Path, report: &Report) -> Result<PathBuf> {
	tokio::fs::create_dir_all(dir).await?;

	let path = dir.join(report_file_name(report));

	tokio::fs::write(&path, render_markdown(report)?).await?;

	Ok(path)
}

pub fn report_file_name(report: &Report) -> String {
	let short_id: String =
		report.session_id.chars().filter(|ch| ch.is_ascii_alphanumeric()).take(8).collect();

	format!("report-{}-{short_id}.md", report.created_at.unix_timestamp())
}

pub fn render_markdown(report: &Report) -> Result<String> {
	let mut out = String::new();
	let created_at = report.created_at.format(&Rfc3339)?;

	out.push_str(&format!("# {}\n\n", report.query));
	out.push_str(&format!("_Generated {created_at} (session {})_\n\n", report.session_id));
	out.push_str(&format!("{}\n\n", report.answer.trim()));

	if !report.sources.is_empty() {
		out.push_str("## Sources\n\n");

		for (idx, source) in report.sources.iter().enumerate() {
			let title = if source.title.is_empty() { source.url.as_str() } else { &source.title };

			out.push_str(&format!("{}. [{title}]({})\n", idx + 1, source.url));
		}
	}

	Ok(out)
}

#[cfg(test)]
mod tests {
	use time::macros::datetime;

	use super::*;

	fn sample() -> Report {
		Report {
			session_id: "0b7d6c1e-aaaa-bbbb-cccc-000000000000".to_string(),
			query: "What is quantum entanglement?".to_string(),
			answer: "A correlation between particles.\n".to_string(),
			sources: vec![
				ReportSource { title: "Primer".to_string(), url: "https://a.example".to_string() },
				ReportSource { title: String::new(), url: "kb/b.txt".to_string() },
			],
			created_at: datetime!(2026-01-02 03:04:05 UTC),
		}
	}

	#[test]
	fn renders_sources_in_order() {
		let markdown = render_markdown(&sample()).expect("render failed");

		assert!(markdown.starts_with("# What is quantum entanglement?"));
		assert!(markdown.contains("2026-01-02T03:04:05Z"));
		assert!(markdown.contains("1. [Primer](https://a.example)"));
		assert!(markdown.contains("2. [kb/b.txt](kb/b.txt)"));
	}

	#[test]
	fn file_name_uses_timestamp_and_short_id() {
		assert_eq!(report_file_name(&sample()), "report-1767323045-0b7d6c1e.md");
	}
}
