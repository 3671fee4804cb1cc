use std::env;

use reqwest::header::AUTHORIZATION;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use sage_providers::report::{self, Report, ReportSource};

#[test]
fn builds_bearer_auth_header() {
	let headers =
		sage_providers::auth_headers(Some("secret"), &Map::new()).expect("Failed to build headers.");
	let value = headers.get(AUTHORIZATION).expect("Missing authorization header.");

	assert_eq!(value, "Bearer secret");
}

#[test]
fn omits_auth_header_without_key() {
	let mut defaults = Map::new();

	defaults.insert("x-client".to_string(), Value::String("sage".to_string()));

	let headers = sage_providers::auth_headers(None, &defaults).expect("Failed to build headers.");

	assert!(headers.get(AUTHORIZATION).is_none());
	assert_eq!(headers.get("x-client").expect("Missing default header."), "sage");
}

#[test]
fn rejects_non_string_default_headers() {
	let mut defaults = Map::new();

	defaults.insert("x-retries".to_string(), Value::from(3));

	assert!(sage_providers::auth_headers(Some("k"), &defaults).is_err());
}

#[tokio::test]
async fn saves_report_into_new_directory() {
	let dir = env::temp_dir().join(format!("sage_report_test_{}", std::process::id()));
	let report = Report {
		session_id: "abcdef12-3456".to_string(),
		query: "q".to_string(),
		answer: "a".to_string(),
		sources: vec![ReportSource { title: "t".to_string(), url: "https://a.example".to_string() }],
		created_at: OffsetDateTime::now_utc(),
	};
	let path = report::save_report(&dir, &report).await.expect("Failed to save report.");
	let written = std::fs::read_to_string(&path).expect("Failed to read report.");

	std::fs::remove_dir_all(&dir).expect("Failed to remove report directory.");

	assert!(path.starts_with(&dir));
	assert!(written.contains("1. [t](https://a.example)"));
}
