//! End-to-end behavior of the pipeline facade: conflict resolution,
//! merging, batch review, throttling, idempotency, clustering, and
//! persistence across restarts.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;

use redline_core::{ChangeProposal, PartialReview};
use redline_pipeline::{
    ManualClock, Pipeline, SubmissionRequest, SubmitOptions,
};
use redline_state::StateManager;
use redline_types::{
    Category, ChangeContent, ChangeId, ChangeKind, ChangeStatus, ConflictResolution,
    ConflictStrategy, ErrorCode, GovernorConfig, GroupStatus, Outcome, PipelineConfig,
    PipelineError, PipelineEvent, SemanticContext, SemanticScope, Span, Topic,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
}

/// Opt-in log output for debugging test failures:
/// `REDLINE_LOG=debug cargo test -p redline-pipeline`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("REDLINE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn pipeline_at(clock: &ManualClock) -> Pipeline {
    init_tracing();
    Pipeline::with_parts(PipelineConfig::default(), None, Box::new(clock.clone()))
}

fn replace(start: u64, end: u64, before: &str, after: &str, confidence: f64) -> ChangeProposal {
    ChangeProposal::new(
        ChangeKind::Replace,
        Span::new(start, end),
        ChangeContent::new(before, after),
        Category::Grammar,
        confidence,
    )
}

fn event_log(pipeline: &mut Pipeline, topics: &[Topic]) -> Rc<RefCell<Vec<String>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    for &topic in topics {
        let log = log.clone();
        pipeline.subscribe(topic, move |event: &PipelineEvent| {
            log.borrow_mut().push(format!("{:?}", event.topic()));
        });
    }
    log
}

#[test]
fn test_empty_submission_succeeds_quietly() {
    let clock = ManualClock::at(t0());
    let mut pipeline = pipeline_at(&clock);
    let session_id = pipeline.start_session("doc.md").unwrap();
    let log = event_log(
        &mut pipeline,
        &[Topic::ChangeSubmitted, Topic::ChangeAdmitted],
    );

    let mut request = SubmissionRequest::new("human", Vec::new());
    request.options.session_id = Some(session_id);
    let result = pipeline.submit(request).unwrap();

    assert!(result.success);
    assert!(result.change_ids.is_empty());
    assert!(result.errors.is_empty());
    assert!(log.borrow().is_empty(), "no events for an empty submission");
}

#[test]
fn test_priority_wins_supersedes_then_admits() {
    // Producer A (priority 2) holds [10,15); producer B (priority 1)
    // submits an overlapping replace and wins.
    let clock = ManualClock::at(t0());
    let mut pipeline = pipeline_at(&clock);
    let session_id = pipeline.start_session("doc.md").unwrap();

    let mut first = SubmissionRequest::new(
        "producer-a",
        vec![replace(10, 15, "world", "Earth", 0.8)],
    );
    first.options.session_id = Some(session_id);
    first.options.priority = 2;
    let first_result = pipeline.submit(first).unwrap();
    let a_id = first_result.change_ids[0];

    let log = event_log(
        &mut pipeline,
        &[Topic::ChangeSuperseded, Topic::ChangeAdmitted],
    );
    clock.advance_ms(50);

    let mut second = SubmissionRequest::new(
        "producer-b",
        vec![replace(12, 18, "rld, h", "RLD, H", 0.9)],
    );
    second.options.session_id = Some(session_id);
    second.options.priority = 1;
    second.options.conflict_resolution = ConflictResolution {
        strategy: ConflictStrategy::PriorityWins,
        ..Default::default()
    };
    let second_result = pipeline.submit(second).unwrap();
    assert!(second_result.success);
    let b_id = second_result.change_ids[0];

    let a = pipeline.store().get(&a_id).unwrap();
    assert_eq!(a.status, ChangeStatus::Superseded);
    assert_eq!(a.superseded_by, Some(b_id));

    let b = pipeline.store().get(&b_id).unwrap();
    assert_eq!(b.status, ChangeStatus::Pending);
    // B's audit names A as an absorbed contributor.
    assert!(b
        .audit
        .iter()
        .any(|e| e.reason.as_deref().is_some_and(|r| r.contains(&a_id.to_string()))));

    assert_eq!(
        *log.borrow(),
        vec!["ChangeSuperseded".to_string(), "ChangeAdmitted".to_string()],
        "supersession is observable before admission"
    );
}

#[test]
fn test_auto_merge_of_adjacent_grammar_fixes() {
    let clock = ManualClock::at(t0());
    let mut pipeline = pipeline_at(&clock);
    let session_id = pipeline.start_session("doc.md").unwrap();

    let merge_options = |session| {
        let mut options = SubmitOptions::default();
        options.session_id = Some(session);
        options.priority = 2;
        options.conflict_resolution = ConflictResolution {
            strategy: ConflictStrategy::AutoMerge,
            allow_semantic_merge: true,
            overlap_tolerance: 2,
            auto_defer: false,
        };
        options.semantic_context = Some(SemanticContext {
            scope: SemanticScope::Sentence,
            ..Default::default()
        });
        options
    };

    let mut first = SubmissionRequest::new("grammar-bot", vec![replace(30, 35, "teh q", "the q", 0.9)]);
    first.options = merge_options(session_id);
    let first_result = pipeline.submit(first).unwrap();
    let first_id = first_result.change_ids[0];

    clock.advance_ms(20);
    let mut second =
        SubmissionRequest::new("grammar-bot", vec![replace(36, 40, "wick", "uick", 0.8)]);
    second.options = merge_options(session_id);
    let second_result = pipeline.submit(second).unwrap();
    assert!(second_result.success);
    let merged_id = second_result.change_ids[0];
    assert_ne!(merged_id, first_id);

    let merged = pipeline.store().get(&merged_id).unwrap();
    assert_eq!(merged.position, Span::new(30, 40));
    assert_eq!(merged.content.before, "teh qwick");
    assert_eq!(merged.content.after, "the quick");
    assert_eq!(merged.status, ChangeStatus::Pending);

    // Both inputs are superseded by the merged change.
    let first_change = pipeline.store().get(&first_id).unwrap();
    assert_eq!(first_change.status, ChangeStatus::Superseded);
    assert_eq!(first_change.superseded_by, Some(merged_id));
}

#[test]
fn test_auto_merge_overlap_gives_contested_span_to_stronger() {
    // Overlapping (not merely adjacent) edits where the later-positioned
    // producer holds the stronger priority: the contested characters
    // must appear exactly once in the merged text, owned by the
    // stronger producer.
    let clock = ManualClock::at(t0());
    let mut pipeline = pipeline_at(&clock);
    let session_id = pipeline.start_session("doc.md").unwrap();

    let merge_options = |session, priority| {
        let mut options = SubmitOptions::default();
        options.session_id = Some(session);
        options.priority = priority;
        options.conflict_resolution = ConflictResolution {
            strategy: ConflictStrategy::AutoMerge,
            allow_semantic_merge: true,
            overlap_tolerance: 2,
            auto_defer: false,
        };
        options.semantic_context = Some(SemanticContext {
            scope: SemanticScope::Sentence,
            ..Default::default()
        });
        options
    };

    let mut weak =
        SubmissionRequest::new("slow-bot", vec![replace(10, 15, "aaaaa", "AAAA", 0.8)]);
    weak.options = merge_options(session_id, 3);
    let weak_id = pipeline.submit(weak).unwrap().change_ids[0];

    clock.advance_ms(20);
    let mut strong =
        SubmissionRequest::new("fast-bot", vec![replace(13, 18, "aabbb", "BBBBBB", 0.9)]);
    strong.options = merge_options(session_id, 1);
    let result = pipeline.submit(strong).unwrap();
    assert!(result.success);
    let merged_id = result.change_ids[0];

    let merged = pipeline.store().get(&merged_id).unwrap();
    assert_eq!(merged.position, Span::new(10, 18));
    assert_eq!(merged.content.before, "aaaaabbb");
    // No duplicated overlap: [13,15) renders once, from the stronger
    // producer.
    assert_eq!(merged.content.after, "AABBBBBB");
    assert_eq!(merged.content.after.matches('B').count(), 6);

    assert_eq!(
        pipeline.store().get(&weak_id).unwrap().status,
        ChangeStatus::Superseded
    );
    assert_eq!(
        pipeline.store().get(&weak_id).unwrap().superseded_by,
        Some(merged_id)
    );
}

#[test]
fn test_batch_partial_review_folds_to_mixed() {
    let clock = ManualClock::at(t0());
    let mut pipeline = pipeline_at(&clock);
    let session_id = pipeline.start_session("doc.md").unwrap();

    let mut request = SubmissionRequest::new(
        "copy-editor",
        vec![
            replace(0, 4, "aaaa", "AAAA", 0.9),
            replace(100, 104, "bbbb", "BBBB", 0.8),
            replace(200, 204, "cccc", "CCCC", 0.7),
        ],
    );
    request.options.session_id = Some(session_id);
    request.options.group_changes = true;
    request.options.editorial_operation = Some(redline_types::BatchOperation::Proofreading);
    let result = pipeline.submit(request).unwrap();
    let group_id = result.change_group_id.expect("a batch was created");
    assert_eq!(result.change_ids.len(), 3);

    let review = PartialReview::default()
        .accept(result.change_ids[0])
        .accept(result.change_ids[1])
        .reject(result.change_ids[2]);
    let folded = pipeline.partial_review(group_id, &review, "editor").unwrap();
    assert_eq!(folded, GroupStatus::Mixed);
    assert_eq!(pipeline.batch(group_id).unwrap().status, GroupStatus::Mixed);
}

#[test]
fn test_accept_batch_accepts_every_pending_member() {
    let clock = ManualClock::at(t0());
    let mut pipeline = pipeline_at(&clock);
    let session_id = pipeline.start_session("doc.md").unwrap();

    let mut request = SubmissionRequest::new(
        "copy-editor",
        vec![
            replace(0, 4, "aaaa", "AAAA", 0.9),
            replace(100, 104, "bbbb", "BBBB", 0.8),
        ],
    );
    request.options.session_id = Some(session_id);
    request.options.group_changes = true;
    let result = pipeline.submit(request).unwrap();
    let group_id = result.change_group_id.unwrap();

    let folded = pipeline.accept_batch(group_id, "editor", None).unwrap();
    assert_eq!(folded, GroupStatus::Accepted);
    for id in &result.change_ids {
        assert_eq!(
            pipeline.store().get(id).unwrap().status,
            ChangeStatus::Accepted
        );
    }
}

#[test]
fn test_accept_twice_is_unchanged_without_second_event() {
    let clock = ManualClock::at(t0());
    let mut pipeline = pipeline_at(&clock);
    let session_id = pipeline.start_session("doc.md").unwrap();

    let mut request = SubmissionRequest::new("human", vec![replace(0, 4, "aaaa", "AAAA", 0.9)]);
    request.options.session_id = Some(session_id);
    let result = pipeline.submit(request).unwrap();
    let change_id = result.change_ids[0];

    let log = event_log(&mut pipeline, &[Topic::ChangeAccepted]);
    assert_eq!(
        pipeline.accept_change(change_id, "editor", None).unwrap(),
        Outcome::Applied
    );
    assert_eq!(
        pipeline.accept_change(change_id, "editor", None).unwrap(),
        Outcome::Unchanged
    );
    assert_eq!(log.borrow().len(), 1, "repeat accept emits nothing");
}

#[test]
fn test_sequential_chain_enforces_acceptance_order() {
    let clock = ManualClock::at(t0());
    let mut pipeline = pipeline_at(&clock);
    let session_id = pipeline.start_session("doc.md").unwrap();

    let mut first = SubmissionRequest::new("first-bot", vec![replace(10, 15, "aaaaa", "AAAAA", 0.8)]);
    first.options.session_id = Some(session_id);
    let first_id = pipeline.submit(first).unwrap().change_ids[0];

    clock.advance_ms(10);
    let mut second =
        SubmissionRequest::new("second-bot", vec![replace(12, 18, "aaabbb", "AAABBB", 0.7)]);
    second.options.session_id = Some(session_id);
    second.options.conflict_resolution = ConflictResolution {
        strategy: ConflictStrategy::Sequential,
        ..Default::default()
    };
    let second_id = pipeline.submit(second).unwrap().change_ids[0];

    // Accepting the later link before its predecessor is refused.
    let err = pipeline
        .accept_change(second_id, "editor", None)
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Consolidation(
            redline_types::ConsolidationError::OrderingViolation { .. }
        )
    ));

    pipeline.accept_change(first_id, "editor", None).unwrap();
    pipeline.accept_change(second_id, "editor", None).unwrap();
    assert_eq!(
        pipeline.store().get(&second_id).unwrap().status,
        ChangeStatus::Accepted
    );
}

#[test]
fn test_governor_throttles_burst() {
    // max_rate 5, burst 10, exponential base 1000: of 12 rapid
    // submissions, ten are admitted and two are refused.
    let clock = ManualClock::at(t0());
    let mut config = PipelineConfig::default();
    config.governor = GovernorConfig {
        max_requests_per_second: 5,
        burst_capacity: 10,
        base_backoff_ms: 1000,
        ..Default::default()
    };
    let mut pipeline = Pipeline::with_parts(config, None, Box::new(clock.clone()));
    let session_id = pipeline.start_session("doc.md").unwrap();

    let mut ok = 0;
    let mut throttled = 0;
    for i in 0..12u64 {
        let mut request = SubmissionRequest::new(
            "fast-bot",
            vec![replace(i * 50, i * 50 + 4, "aaaa", "AAAA", 0.9)],
        );
        request.options.session_id = Some(session_id);
        let result = pipeline.submit(request).unwrap();
        if result.success {
            ok += 1;
        } else {
            assert_eq!(
                result.errors[0].code,
                ErrorCode::RateLimitExceeded.as_str()
            );
            throttled += 1;
        }
        clock.advance_ms(16);
    }
    assert_eq!(ok, 10);
    assert_eq!(throttled, 2);

    // Well before the backoff expires, still refused.
    clock.advance_ms(300);
    let mut early = SubmissionRequest::new("fast-bot", vec![replace(900, 904, "aaaa", "AAAA", 0.9)]);
    early.options.session_id = Some(session_id);
    assert!(!pipeline.submit(early).unwrap().success);

    // A full backoff after the last attempt, admitted again.
    clock.advance_ms(1100);
    let mut later = SubmissionRequest::new("fast-bot", vec![replace(950, 954, "aaaa", "AAAA", 0.9)]);
    later.options.session_id = Some(session_id);
    assert!(pipeline.submit(later).unwrap().success);
}

#[test]
fn test_submission_is_idempotent_by_submission_id() {
    let clock = ManualClock::at(t0());
    let mut pipeline = pipeline_at(&clock);
    let session_id = pipeline.start_session("doc.md").unwrap();

    let mut request = SubmissionRequest::new("human", vec![replace(0, 4, "aaaa", "AAAA", 0.9)]);
    request.options.session_id = Some(session_id);
    let replayed = request.clone();

    let first = pipeline.submit(request).unwrap();
    let before_replay = pipeline.store().mutation_count();
    let second = pipeline.submit(replayed).unwrap();

    assert_eq!(first, second);
    assert_eq!(
        pipeline.store().mutation_count(),
        before_replay,
        "replay must not mutate"
    );
    assert_eq!(pipeline.store().len(), 1);
}

#[test]
fn test_noop_replace_dropped_with_warning() {
    let clock = ManualClock::at(t0());
    let mut pipeline = pipeline_at(&clock);
    let session_id = pipeline.start_session("doc.md").unwrap();

    let mut request = SubmissionRequest::new("human", vec![replace(0, 4, "same", "same", 0.9)]);
    request.options.session_id = Some(session_id);
    let result = pipeline.submit(request).unwrap();

    assert!(result.success);
    assert!(result.change_ids.is_empty());
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].message.contains("identical"));
}

#[test]
fn test_cluster_refresh_after_debounce() {
    let clock = ManualClock::at(t0());
    let mut pipeline = pipeline_at(&clock);
    let session_id = pipeline.start_session("doc.md").unwrap();
    let log = event_log(&mut pipeline, &[Topic::ClusterUpdated]);

    let mut request = SubmissionRequest::new(
        "style-bot",
        vec![
            replace(0, 4, "aaaa", "AAAA", 0.9),
            replace(10, 14, "bbbb", "BBBB", 0.9),
            replace(20, 24, "cccc", "CCCC", 0.9),
        ],
    );
    request.options.session_id = Some(session_id);
    pipeline.submit(request).unwrap();

    // Before the 500 ms debounce nothing fires.
    pipeline.tick().unwrap();
    assert!(pipeline.clusters_for(session_id).is_none());

    clock.advance_ms(600);
    pipeline.tick().unwrap();
    let clusters = pipeline.clusters_for(session_id).expect("clusters computed");
    assert!(!clusters.is_empty());
    assert_eq!(*log.borrow(), vec!["ClusterUpdated".to_string()]);
}

#[test]
fn test_unknown_session_is_reported_not_created() {
    let clock = ManualClock::at(t0());
    let mut pipeline = pipeline_at(&clock);
    let ghost = redline_types::SessionId::new();

    let mut request = SubmissionRequest::new("human", vec![replace(0, 4, "aaaa", "AAAA", 0.9)]);
    request.options.session_id = Some(ghost);
    let result = pipeline.submit(request).unwrap();
    assert!(!result.success);
    assert_eq!(result.errors[0].code, ErrorCode::UnknownId.as_str());
}

#[test]
fn test_persistence_across_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let clock = ManualClock::at(t0());
    let config = PipelineConfig::default();

    let (session_id, change_ids) = {
        let state = StateManager::open(dir.path(), config.persistence.clone()).unwrap();
        let mut pipeline =
            Pipeline::with_parts(config.clone(), Some(state), Box::new(clock.clone()));
        let session_id = pipeline.start_session("novel.md").unwrap();
        let mut request = SubmissionRequest::new(
            "copy-editor",
            vec![
                replace(0, 4, "aaaa", "AAAA", 0.9),
                replace(50, 54, "bbbb", "BBBB", 0.8),
            ],
        );
        request.options.session_id = Some(session_id);
        let result = pipeline.submit(request).unwrap();
        pipeline
            .accept_change(result.change_ids[0], "editor", None)
            .unwrap();
        (session_id, result.change_ids)
    };

    // A fresh process over the same root sees everything.
    let state = StateManager::open(dir.path(), config.persistence.clone()).unwrap();
    let mut pipeline = Pipeline::with_parts(config, Some(state), Box::new(clock.clone()));
    assert_eq!(pipeline.recover_sessions(), 1);

    let session = pipeline.session(session_id).expect("session restored");
    assert_eq!(session.change_ids.len(), 2);
    assert_eq!(
        pipeline.store().get(&change_ids[0]).unwrap().status,
        ChangeStatus::Accepted
    );
    assert_eq!(
        pipeline.store().get(&change_ids[1]).unwrap().status,
        ChangeStatus::Pending
    );
}

#[test]
fn test_snapshot_tick_writes_checkpoints() {
    let dir = tempfile::TempDir::new().unwrap();
    let clock = ManualClock::at(t0());
    let config = PipelineConfig::default();
    let state = StateManager::open(dir.path(), config.persistence.clone()).unwrap();
    let mut pipeline = Pipeline::with_parts(config, Some(state), Box::new(clock.clone()));

    let session_id = pipeline.start_session("doc.md").unwrap();
    let mut request = SubmissionRequest::new("human", vec![replace(0, 4, "aaaa", "AAAA", 0.9)]);
    request.options.session_id = Some(session_id);
    pipeline.submit(request).unwrap();

    // The periodic checkpoint fires after the configured interval.
    clock.advance_ms(61_000);
    pipeline.tick().unwrap();

    let backups = dir.path().join("backups").join(session_id.to_string());
    let entries: Vec<_> = std::fs::read_dir(&backups)
        .expect("backup dir exists")
        .collect();
    assert!(!entries.is_empty());
}

#[test]
fn test_query_and_export_through_pipeline() {
    let clock = ManualClock::at(t0());
    let mut pipeline = pipeline_at(&clock);
    let session_id = pipeline.start_session("doc.md").unwrap();

    let mut request = SubmissionRequest::new(
        "grammar-bot",
        vec![
            replace(0, 4, "teh ", "the ", 0.95),
            replace(50, 54, "wich", "which", 0.7),
        ],
    );
    request.options.session_id = Some(session_id);
    request.attribution = Some(redline_types::Attribution::new("anthropic", "claude-sonnet"));
    pipeline.submit(request).unwrap();

    let builder = pipeline
        .query()
        .by_source("grammar-bot")
        .min_confidence(0.9);
    let hits = pipeline.run_query(&builder).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].content.after, "the ");

    // Cached replay returns identical results.
    let again = pipeline.run_query(&builder).unwrap();
    assert_eq!(hits, again);

    let markdown = pipeline
        .export(
            &pipeline.query().by_source("grammar-bot"),
            redline_store::ExportFormat::Markdown,
            &redline_store::CsvOptions::default(),
        )
        .unwrap();
    let text = String::from_utf8(markdown).unwrap();
    assert!(text.contains("Total changes: 2"));
}

#[test]
fn test_user_choice_conflict_group_awaits_resolution() {
    let clock = ManualClock::at(t0());
    let mut pipeline = pipeline_at(&clock);
    let session_id = pipeline.start_session("doc.md").unwrap();

    let mut first = SubmissionRequest::new("bot-a", vec![replace(10, 15, "aaaaa", "AAAAA", 0.8)]);
    first.options.session_id = Some(session_id);
    let first_id = pipeline.submit(first).unwrap().change_ids[0];

    clock.advance_ms(10);
    let mut second = SubmissionRequest::new("bot-b", vec![replace(12, 17, "aaabb", "AAABB", 0.9)]);
    second.options.session_id = Some(session_id);
    second.options.conflict_resolution = ConflictResolution {
        strategy: ConflictStrategy::UserChoice,
        ..Default::default()
    };
    let second_id = pipeline.submit(second).unwrap().change_ids[0];

    let first_change = pipeline.store().get(&first_id).unwrap();
    let second_change = pipeline.store().get(&second_id).unwrap();
    assert_eq!(first_change.status, ChangeStatus::Pending);
    assert_eq!(second_change.status, ChangeStatus::Pending);
    assert!(second_change.conflict_group_id.is_some());
    assert_eq!(
        first_change.conflict_group_id,
        second_change.conflict_group_id
    );

    // Explicit resolution is the only way out.
    pipeline.accept_change(first_id, "author", None).unwrap();
    pipeline.reject_change(second_id, "author", None).unwrap();
    assert_eq!(
        pipeline.store().get(&first_id).unwrap().status,
        ChangeStatus::Accepted
    );
}

#[test]
fn test_producer_registration_gates_submissions() {
    let clock = ManualClock::at(t0());
    let mut pipeline = pipeline_at(&clock);
    let session_id = pipeline.start_session("doc.md").unwrap();

    let manifest = redline_pipeline::ProducerManifest {
        plugin_id: "third-party".into(),
        name: "Third Party".into(),
        version: "1.0.0".into(),
        capabilities: Default::default(),
    };
    let auth = pipeline
        .register_producer(manifest, Default::default())
        .unwrap();

    let mut good = SubmissionRequest::new("third-party", vec![replace(0, 4, "aaaa", "AAAA", 0.9)]);
    good.options.session_id = Some(session_id);
    good.auth = Some(auth.clone());
    assert!(pipeline.submit(good).unwrap().success);

    // A forged token is refused without touching the store.
    let mut forged = auth.clone();
    forged.token = "stolen".into();
    let mut bad = SubmissionRequest::new("third-party", vec![replace(10, 14, "bbbb", "BBBB", 0.9)]);
    bad.options.session_id = Some(session_id);
    bad.auth = Some(forged);
    let result = pipeline.submit(bad).unwrap();
    assert!(!result.success);
    assert_eq!(result.errors[0].code, ErrorCode::Unauthorized.as_str());
    assert_eq!(pipeline.store().len(), 1);
}

#[test]
fn test_secret_redaction_flows_through_submission() {
    let clock = ManualClock::at(t0());
    let mut pipeline = pipeline_at(&clock);
    let session_id = pipeline.start_session("doc.md").unwrap();
    let log = event_log(&mut pipeline, &[Topic::SensitiveDataDetected]);

    let mut request = SubmissionRequest::new(
        "chat-bot",
        vec![replace(0, 4, "aaaa", "key sk-abcdefghijklmnop1234 leaked", 0.9)],
    );
    request.options.session_id = Some(session_id);
    let result = pipeline.submit(request).unwrap();

    let change = pipeline.store().get(&result.change_ids[0]).unwrap();
    assert!(change.content.after.contains("[REDACTED]"));
    assert!(!change.content.after.contains("sk-"));
    assert_eq!(log.borrow().len(), 1);
}

#[test]
fn test_ordering_of_accepted_changes_per_session() {
    // Accepted changes form a total order by (timestamp, id) regardless
    // of acceptance order.
    let clock = ManualClock::at(t0());
    let mut pipeline = pipeline_at(&clock);
    let session_id = pipeline.start_session("doc.md").unwrap();

    let mut ids: Vec<ChangeId> = Vec::new();
    for i in 0..4u64 {
        let mut request = SubmissionRequest::new(
            "human",
            vec![replace(i * 100, i * 100 + 4, "aaaa", "AAAA", 0.9)],
        );
        request.options.session_id = Some(session_id);
        ids.push(pipeline.submit(request).unwrap().change_ids[0]);
        clock.advance_ms(250);
    }
    // Accept out of order.
    for &id in [ids[2], ids[0], ids[3], ids[1]].iter() {
        pipeline.accept_change(id, "editor", None).unwrap();
    }

    let accepted: Vec<ChangeId> = pipeline
        .store()
        .accepted_in_session(&session_id)
        .iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(accepted, ids, "application order follows submission time");
}
