use std::sync::{Arc, atomic::Ordering};

use tokio::sync::{Notify, mpsc};

use sage_config::Config;
use sage_domain::{DocumentOrigin, SearchAllStage, StageEvent, stage};
use sage_service::{Error, SageService, SearchRequest, SearchSession, SessionConfig};
use sage_testkit::{
	CallKind, Harness, MemoryReportStore, SYNTHESIZED_ANSWER, SpyCompletion, SpyKnowledgeBase,
	SpyWebSearch, test_config,
};

const PROMPT: &str = "What is quantum entanglement?";

async fn run_search(cfg: Config, harness: &Harness, req: SearchRequest) -> Vec<StageEvent> {
	let service = SageService::with_providers(cfg, harness.providers());
	let mut rx = service.stream_search(req).expect("Expected the request to be accepted.");
	let mut events = Vec::new();

	while let Some(event) = rx.recv().await {
		events.push(event);
	}

	events
}

fn stages(events: &[StageEvent]) -> Vec<SearchAllStage> {
	events.iter().map(|event| event.stage).collect()
}

fn terminal(events: &[StageEvent]) -> &StageEvent {
	events.last().expect("Expected at least one event.")
}

#[tokio::test]
async fn full_run_emits_every_stage_in_order() {
	let harness = Harness::default();
	let events = run_search(test_config(), &harness, SearchRequest::new(PROMPT)).await;
	let last = terminal(&events);

	assert_eq!(stages(&events), SearchAllStage::CANONICAL.to_vec());
	assert!(last.success);
	assert_eq!(last.answer, SYNTHESIZED_ANSWER);
	assert!(!last.websearch_docs.is_empty());
	assert!(events[..events.len() - 1].iter().all(|event| {
		event.success && event.websearch_docs.is_empty() && event.answer.is_empty()
	}));
	assert_eq!(harness.reports.saved.lock().expect("Poisoned report lock.").len(), 1);
}

#[tokio::test]
async fn token_count_never_decreases() {
	let harness = Harness::default();
	let events = run_search(test_config(), &harness, SearchRequest::new(PROMPT)).await;
	let tokens = events.iter().map(|event| event.num_tokens_used).collect::<Vec<_>>();

	assert!(tokens.windows(2).all(|pair| pair[0] <= pair[1]));
	// One expansion call and one synthesis call.
	assert_eq!(terminal(&events).num_tokens_used, 20);
	assert_eq!(events[0].num_tokens_used, 0);
}

#[tokio::test]
async fn disabling_web_search_skips_web_stages() {
	let harness = Harness::default();
	let req = SearchRequest { allow_web_search: Some(false), ..SearchRequest::new(PROMPT) };
	let events = run_search(test_config(), &harness, req).await;
	let seen = stages(&events);

	assert!(!seen.contains(&SearchAllStage::SearchingWeb));
	assert!(!seen.contains(&SearchAllStage::DownloadedWebpages));
	assert!(seen.contains(&SearchAllStage::ReadingLocalKnowledge));
	assert!(stage::is_canonical_progression(&seen));
	assert_eq!(harness.web_search.search_calls.load(Ordering::SeqCst), 0);
	assert!(
		terminal(&events).websearch_docs.iter().all(|doc| doc.origin() == DocumentOrigin::Local)
	);
}

#[tokio::test]
async fn zero_max_depth_skips_web_stages() {
	let harness = Harness::default();
	let mut cfg = test_config();

	cfg.session.max_depth = 0;

	let events = run_search(cfg, &harness, SearchRequest::new(PROMPT)).await;

	assert!(!stages(&events).contains(&SearchAllStage::SearchingWeb));
	assert!(terminal(&events).success);
}

#[tokio::test]
async fn answers_without_any_sources() {
	let harness = Harness::default();
	let req = SearchRequest {
		allow_web_search: Some(false),
		allow_local_search: Some(false),
		..SearchRequest::new(PROMPT)
	};
	let events = run_search(test_config(), &harness, req).await;
	let last = terminal(&events);

	assert_eq!(
		stages(&events),
		vec![
			SearchAllStage::Starting,
			SearchAllStage::ExpandingQuery,
			SearchAllStage::SelectingSubqueries,
			SearchAllStage::ReadingWebpagesAndLocal,
			SearchAllStage::ResultsReady,
		]
	);
	assert!(last.success);
	assert!(last.websearch_docs.is_empty());
	assert!(!last.answer.is_empty());

	let synthesis = harness.completion.requests_of(CallKind::Synthesis);
	let user = synthesis[0][1]["content"].as_str().expect("Expected user content.");

	assert!(user.contains(PROMPT));
	assert!(user.contains("No sources were retrieved."));
}

#[tokio::test]
async fn overlapping_results_are_kept_once() {
	let completion =
		SpyCompletion { expansion_reply: r#"["a", "b"]"#.to_string(), ..Default::default() };
	let harness = Harness::new(
		completion,
		SpyWebSearch::default(),
		SpyKnowledgeBase::default(),
		MemoryReportStore::default(),
	);
	let req = SearchRequest { allow_local_search: Some(false), ..SearchRequest::new(PROMPT) };
	let events = run_search(test_config(), &harness, req).await;
	let docs = &terminal(&events).websearch_docs;
	let urls = docs.iter().map(|doc| doc.url()).collect::<Vec<_>>();

	assert_eq!(harness.web_search.search_calls.load(Ordering::SeqCst), 3);
	assert_eq!(urls.iter().filter(|url| **url == SpyWebSearch::SHARED_URL).count(), 1);
	assert_eq!(
		urls,
		vec![
			SpyWebSearch::SHARED_URL.to_string(),
			SpyWebSearch::page_url(PROMPT),
			SpyWebSearch::page_url("a"),
			SpyWebSearch::page_url("b"),
		]
	);
}

#[tokio::test]
async fn synthesis_failure_ends_with_one_failed_event() {
	let harness = Harness::new(
		SpyCompletion::failing(CallKind::Synthesis),
		SpyWebSearch::default(),
		SpyKnowledgeBase::default(),
		MemoryReportStore::default(),
	);
	let events = run_search(test_config(), &harness, SearchRequest::new(PROMPT)).await;
	let failures = events.iter().filter(|event| !event.success).count();
	let last = terminal(&events);

	assert_eq!(failures, 1);
	assert!(!last.success);
	assert_eq!(last.stage, SearchAllStage::Failed);
	assert!(last.message.as_deref().is_some_and(|message| message.contains("synthesis")));
	assert_eq!(
		events[events.len() - 2].stage,
		SearchAllStage::ReadingWebpagesAndLocal
	);
	assert!(stage::is_canonical_progression(&stages(&events)));
	assert!(harness.reports.saved.lock().expect("Poisoned report lock.").is_empty());
}

#[tokio::test]
async fn expansion_failure_falls_back_to_the_query() {
	let harness = Harness::new(
		SpyCompletion::failing(CallKind::Expansion),
		SpyWebSearch::default(),
		SpyKnowledgeBase::default(),
		MemoryReportStore::default(),
	);
	let events = run_search(test_config(), &harness, SearchRequest::new(PROMPT)).await;

	assert_eq!(stages(&events), SearchAllStage::CANONICAL.to_vec());
	assert!(terminal(&events).success);
	assert_eq!(harness.web_search.search_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unexpanded_requests_skip_the_completion_call() {
	let harness = Harness::default();
	let req = SearchRequest { expand_query: Some(false), ..SearchRequest::new(PROMPT) };
	let events = run_search(test_config(), &harness, req).await;

	assert!(terminal(&events).success);
	assert!(harness.completion.requests_of(CallKind::Expansion).is_empty());
	assert_eq!(harness.web_search.search_calls.load(Ordering::SeqCst), 1);
	assert_eq!(terminal(&events).num_tokens_used, 10);
}

#[tokio::test]
async fn failing_local_search_still_finishes() {
	let knowledge_base = SpyKnowledgeBase { fail_all: true, ..Default::default() };
	let harness = Harness::new(
		SpyCompletion::default(),
		SpyWebSearch::default(),
		knowledge_base,
		MemoryReportStore::default(),
	);
	let events = run_search(test_config(), &harness, SearchRequest::new(PROMPT)).await;
	let last = terminal(&events);

	assert!(stages(&events).contains(&SearchAllStage::ReadingLocalKnowledge));
	assert_eq!(last.stage, SearchAllStage::ResultsReady);
	assert!(last.success);
	assert!(last.websearch_docs.iter().all(|doc| doc.origin() == DocumentOrigin::Web));
}

#[tokio::test]
async fn failing_web_subquery_is_skipped() {
	let web_search = SpyWebSearch {
		failing_queries: ["bell test experiments".to_string()].into_iter().collect(),
		..Default::default()
	};
	let harness = Harness::new(
		SpyCompletion::default(),
		web_search,
		SpyKnowledgeBase::default(),
		MemoryReportStore::default(),
	);
	let req = SearchRequest { allow_local_search: Some(false), ..SearchRequest::new(PROMPT) };
	let events = run_search(test_config(), &harness, req).await;
	let urls =
		terminal(&events).websearch_docs.iter().map(|doc| doc.url().to_string()).collect::<Vec<_>>();

	assert!(terminal(&events).success);
	assert!(urls.contains(&SpyWebSearch::page_url("quantum entanglement definition")));
	assert!(!urls.contains(&SpyWebSearch::page_url("bell test experiments")));
}

#[tokio::test]
async fn terminal_documents_list_web_before_local() {
	let harness = Harness::default();
	let events = run_search(test_config(), &harness, SearchRequest::new(PROMPT)).await;
	let origins =
		terminal(&events).websearch_docs.iter().map(|doc| doc.origin()).collect::<Vec<_>>();
	let first_local = origins
		.iter()
		.position(|origin| *origin == DocumentOrigin::Local)
		.expect("Expected a local document.");

	assert!(origins[..first_local].iter().all(|origin| *origin == DocumentOrigin::Web));
	assert!(origins[first_local..].iter().all(|origin| *origin == DocumentOrigin::Local));
	// The knowledge base returns the same hit for every subquery.
	assert_eq!(origins.len() - first_local, 1);
}

#[tokio::test]
async fn llm_selection_keeps_top_subqueries() {
	let mut cfg = test_config();

	cfg.selection.mode = "llm".to_string();
	cfg.selection.top_n = 1;
	cfg.selection.samples = 2;

	let harness = Harness::default();
	let req = SearchRequest { allow_local_search: Some(false), ..SearchRequest::new(PROMPT) };
	let events = run_search(cfg, &harness, req).await;

	// Three candidates rated twice each.
	assert_eq!(harness.completion.requests_of(CallKind::Scoring).len(), 6);
	assert_eq!(harness.web_search.search_calls.load(Ordering::SeqCst), 1);
	assert_eq!(terminal(&events).num_tokens_used, 10 + 60 + 10);
	// Equal ratings keep the original order, which leads with the query itself.
	assert!(
		terminal(&events)
			.websearch_docs
			.iter()
			.any(|doc| doc.url() == SpyWebSearch::page_url(PROMPT))
	);
}

#[tokio::test]
async fn failed_ratings_fall_back_to_lexical_selection() {
	let mut cfg = test_config();

	cfg.selection.mode = "llm".to_string();
	cfg.selection.top_n = 2;

	let harness = Harness::new(
		SpyCompletion::failing(CallKind::Scoring),
		SpyWebSearch::default(),
		SpyKnowledgeBase::default(),
		MemoryReportStore::default(),
	);
	let events = run_search(cfg, &harness, SearchRequest::new(PROMPT)).await;

	assert!(terminal(&events).success);
	assert_eq!(harness.web_search.search_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unusable_ratings_still_count_their_tokens() {
	let mut cfg = test_config();

	cfg.selection.mode = "llm".to_string();
	cfg.selection.top_n = 1;
	cfg.selection.samples = 2;

	let harness = Harness::new(
		SpyCompletion { rating_reply: "not sure".to_string(), ..Default::default() },
		SpyWebSearch::default(),
		SpyKnowledgeBase::default(),
		MemoryReportStore::default(),
	);
	let req = SearchRequest { allow_local_search: Some(false), ..SearchRequest::new(PROMPT) };
	let events = run_search(cfg, &harness, req).await;

	assert!(terminal(&events).success);
	assert_eq!(harness.completion.requests_of(CallKind::Scoring).len(), 6);
	assert_eq!(harness.web_search.search_calls.load(Ordering::SeqCst), 1);
	assert_eq!(terminal(&events).num_tokens_used, 10 + 60 + 10);
}

#[tokio::test]
async fn panicking_provider_ends_with_one_failed_event() {
	let harness = Harness::new(
		SpyCompletion { panic_on: Some(CallKind::Synthesis), ..Default::default() },
		SpyWebSearch::default(),
		SpyKnowledgeBase::default(),
		MemoryReportStore::default(),
	);
	let events = run_search(test_config(), &harness, SearchRequest::new(PROMPT)).await;
	let failed = events.iter().filter(|event| event.stage == SearchAllStage::Failed).count();
	let last = terminal(&events);

	assert_eq!(failed, 1);
	assert_eq!(last.stage, SearchAllStage::Failed);
	assert!(!last.success);
	assert!(last.answer.is_empty());
	assert!(stage::is_canonical_progression(&stages(&events)));
}

#[tokio::test]
async fn downloaded_pages_replace_snippets_and_are_indexed() {
	let mut cfg = test_config();

	cfg.retrieval.fetch_pages = true;
	cfg.retrieval.index_web_results = true;

	let harness = Harness::default();
	let req = SearchRequest { allow_local_search: Some(false), ..SearchRequest::new(PROMPT) };
	let events = run_search(cfg, &harness, req).await;
	let docs = &terminal(&events).websearch_docs;
	let indexed = harness.knowledge_base.indexed.lock().expect("Poisoned index lock.");

	assert_eq!(harness.web_search.fetch_calls.load(Ordering::SeqCst), docs.len());
	assert!(docs.iter().all(|doc| doc.content() == format!("Full text of {}", doc.url())));
	assert_eq!(indexed.len(), docs.len());
	assert!(indexed.iter().all(|(_, metadata)| metadata.contains_key("query_id")));
}

#[tokio::test]
async fn tiny_context_budget_keeps_the_query() {
	let mut cfg = test_config();

	cfg.synthesis.max_context_chars = 10;
	cfg.synthesis.max_doc_chars = 10;

	let harness = Harness::default();
	let events = run_search(cfg, &harness, SearchRequest::new(PROMPT)).await;
	let synthesis = harness.completion.requests_of(CallKind::Synthesis);
	let user = synthesis[0][1]["content"].as_str().expect("Expected user content.");

	assert!(terminal(&events).success);
	assert!(user.contains(PROMPT));
}

#[tokio::test]
async fn report_failure_does_not_fail_the_session() {
	let harness = Harness::new(
		SpyCompletion::default(),
		SpyWebSearch::default(),
		SpyKnowledgeBase::default(),
		MemoryReportStore { fail: true, ..Default::default() },
	);
	let events = run_search(test_config(), &harness, SearchRequest::new(PROMPT)).await;

	assert_eq!(terminal(&events).stage, SearchAllStage::ResultsReady);
	assert!(terminal(&events).success);
}

#[tokio::test]
async fn dropping_the_receiver_stops_new_work() {
	let gate = Arc::new(Notify::new());
	let completion = SpyCompletion { expansion_gate: Some(gate.clone()), ..Default::default() };
	let harness = Harness::new(
		completion,
		SpyWebSearch::default(),
		SpyKnowledgeBase::default(),
		MemoryReportStore::default(),
	);
	let cfg = test_config();
	let req = SearchRequest::new(PROMPT);
	let session_cfg = SessionConfig::resolve(&cfg, &req);
	let session =
		SearchSession::new(Arc::new(cfg), harness.providers(), PROMPT.to_string(), session_cfg);
	let (tx, mut rx) = mpsc::channel(16);
	let handle = tokio::spawn(session.run(tx));
	let first = rx.recv().await.expect("Expected the first event.");

	assert_eq!(first.stage, SearchAllStage::Starting);

	drop(rx);
	gate.notify_one();
	handle.await.expect("Session task panicked.");

	assert!(harness.completion.calls.load(Ordering::SeqCst) <= 1);
	assert_eq!(harness.web_search.search_calls.load(Ordering::SeqCst), 0);
	assert_eq!(harness.knowledge_base.search_calls.load(Ordering::SeqCst), 0);
	assert!(harness.completion.requests_of(CallKind::Synthesis).is_empty());
}

#[tokio::test]
async fn invalid_prompts_are_rejected_before_streaming() {
	let mut cfg = test_config();

	cfg.session.max_prompt_chars = 20;

	let service = SageService::with_providers(cfg, Harness::default().providers());

	for prompt in [None, Some("   "), Some("<br/>"), Some("a prompt that is far too long to accept")] {
		let req = SearchRequest { user_prompt: prompt.map(str::to_string), ..Default::default() };
		let err = service.stream_search(req).expect_err("Expected the request to be rejected.");

		assert!(matches!(err, Error::InvalidRequest { .. }), "Unexpected error: {err}");
	}
}

#[test]
fn session_keeps_query_and_cleaned_query() {
	let cfg = test_config();
	let req = SearchRequest::new("  <b>What&nbsp;is</b> entanglement? ");
	let session_cfg = SessionConfig::resolve(&cfg, &req);
	let session = SearchSession::new(
		Arc::new(cfg),
		Harness::default().providers(),
		"  <b>What&nbsp;is</b> entanglement? ".to_string(),
		session_cfg,
	);

	assert_eq!(session.query(), "  <b>What&nbsp;is</b> entanglement? ");
	assert_eq!(session.enhanced_query(), "What is entanglement?");
	assert!(session.config().web_search_enabled);
	assert!(session.config().allow_local_search);
	assert!(session.config().expand_query);
}
