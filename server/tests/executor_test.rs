//! Integration tests for plan execution against failing sinks.

mod common;

use common::{id_amount, test_policy, FlakySink};
use sheetsync_engine::{DuplicatePolicy, KeySpec, SyncPlanner, Table};
use sheetsync_server::error::{SinkError, SinkErrorKind};
use sheetsync_server::executor::{SyncExecutor, UpdateMode};
use sheetsync_server::sink::{MemorySink, Sink};
use std::sync::atomic::Ordering;
use std::time::Duration;

fn executor() -> SyncExecutor {
    SyncExecutor::new(test_policy(), UpdateMode::Patch, 100)
}

fn plan_for(incoming: &Table, snapshot: &Table) -> sheetsync_engine::SyncPlan {
    SyncPlanner::plan(incoming, snapshot, &KeySpec::column("ID"), DuplicatePolicy::Skip)
}

#[tokio::test(start_paused = true)]
async fn retryable_failures_then_success() {
    let snapshot = id_amount(&[&["1", "100"]]);
    let sink = FlakySink::new(MemorySink::with_table(&snapshot));
    sink.fail_appends([
        SinkError::from_status(503, "service unavailable"),
        SinkError::from_status(429, "rate limit exceeded"),
        SinkError::new(SinkErrorKind::Other, "Connection reset by peer"),
    ]);

    let incoming = id_amount(&[&["2", "200"]]);
    let plan = plan_for(&incoming, &snapshot);
    let outcome = executor().apply(&plan, &incoming, &snapshot, &sink).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.new_count, 1);
    assert_eq!(outcome.retries, 3);
    assert_eq!(sink.append_calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        sink.read_all().await.unwrap(),
        id_amount(&[&["1", "100"], &["2", "200"]])
    );
}

#[tokio::test(start_paused = true)]
async fn backoff_delays_are_observable() {
    let policy = test_policy();
    let sink = FlakySink::new(MemorySink::new());
    sink.fail_reads([
        SinkError::from_status(503, "down"),
        SinkError::from_status(503, "down"),
        SinkError::from_status(503, "down"),
    ]);

    let start = tokio::time::Instant::now();
    let (_, stats) = policy.run("read_snapshot", || sink.read_all()).await.unwrap();

    assert_eq!(stats.attempts, 4);
    assert_eq!(
        stats.delays,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400)
        ]
    );
    // Backoff plus the rate-limit pause before each of the four attempts.
    assert!(start.elapsed() >= Duration::from_millis(700 + 40));
}

#[tokio::test(start_paused = true)]
async fn non_retryable_failure_preserves_sink() {
    let snapshot = id_amount(&[&["1", "100"], &["2", "200"]]);
    let sink = FlakySink::new(MemorySink::with_table(&snapshot));
    sink.fail_appends([SinkError::from_status(400, "Invalid range")]);

    let before = sink.read_all().await.unwrap();
    let incoming = id_amount(&[&["1", "100"], &["3", "300"]]);
    let plan = plan_for(&incoming, &snapshot);
    let outcome = executor().apply(&plan, &incoming, &snapshot, &sink).await;

    assert!(!outcome.success);
    assert_eq!(outcome.new_count, 0);
    assert!(outcome.error.unwrap().contains("Invalid range"));
    assert_eq!(sink.append_calls.load(Ordering::SeqCst), 1);

    let after = sink.read_all().await.unwrap();
    assert_eq!(after, before);
    assert_eq!(after.to_json().unwrap(), before.to_json().unwrap());
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_preserve_sink() {
    let snapshot = id_amount(&[&["1", "100"]]);
    let sink = FlakySink::new(MemorySink::with_table(&snapshot));
    sink.fail_appends((0..5).map(|_| SinkError::from_status(429, "quota exceeded")));

    let incoming = id_amount(&[&["2", "200"]]);
    let plan = plan_for(&incoming, &snapshot);
    let outcome = executor().apply(&plan, &incoming, &snapshot, &sink).await;

    assert!(!outcome.success);
    assert_eq!(outcome.retries, 4);
    assert_eq!(sink.append_calls.load(Ordering::SeqCst), 5);
    assert_eq!(sink.read_all().await.unwrap(), snapshot);
}

#[tokio::test(start_paused = true)]
async fn append_only_growth() {
    let snapshot = id_amount(&[&["1", "100"], &["2", "200"], &["3", "300"]]);
    let sink = FlakySink::new(MemorySink::with_table(&snapshot));

    let incoming = id_amount(&[&["4", "400"], &["5", "500"]]);
    let plan = plan_for(&incoming, &snapshot);
    let outcome = executor().apply(&plan, &incoming, &snapshot, &sink).await;
    assert!(outcome.success);

    let after = sink.read_all().await.unwrap();
    assert_eq!(after.len(), snapshot.len() + plan.append.len());
    assert_eq!(&after.rows()[..snapshot.len()], snapshot.rows());
}

#[tokio::test(start_paused = true)]
async fn capacity_growth_failure_is_not_fatal() {
    let snapshot = id_amount(&[&["1", "100"]]);
    let sink = FlakySink::new(MemorySink::with_capacity(5, 1_000));
    sink.inner.write_header(snapshot.columns()).await.unwrap();
    sink.inner.append(2, &snapshot).await.unwrap();
    sink.fail_growth(SinkError::from_status(403, "permission denied"));

    let incoming = id_amount(&[&["2", "200"]]);
    let plan = plan_for(&incoming, &snapshot);
    let outcome = executor().apply(&plan, &incoming, &snapshot, &sink).await;

    assert!(outcome.success);
    assert_eq!(sink.read_all().await.unwrap().len(), 2);
    assert_eq!(sink.capacity().await.unwrap().rows, 5);
}

#[tokio::test(start_paused = true)]
async fn capacity_growth_doubles_and_caps() {
    let snapshot = id_amount(&[]);
    let sink = MemorySink::with_capacity(200, 300);
    sink.write_header(snapshot.columns()).await.unwrap();

    let incoming = Table::with_rows(
        vec!["ID".into(), "amount".into()],
        (0..150)
            .map(|i| sheetsync_engine::Row::from_iter([i.to_string(), "1".to_string()]))
            .collect(),
    )
    .unwrap();
    let plan = plan_for(&incoming, &snapshot);
    let outcome = executor().apply(&plan, &incoming, &snapshot, &sink).await;

    // needed = 1 + 0 + 150 + 100 = 251, doubling to 400 is capped at 300
    assert!(outcome.success);
    assert_eq!(sink.capacity().await.unwrap().rows, 300);
    assert_eq!(sink.read_all().await.unwrap().len(), 150);
}

#[tokio::test(start_paused = true)]
async fn failed_patch_keeps_committed_appends() {
    let snapshot = id_amount(&[&["1", "100"]]);
    let sink = FlakySink::new(MemorySink::with_table(&snapshot));
    sink.fail_patches([SinkError::from_status(404, "sheet not found")]);

    let incoming = id_amount(&[&["1", "150"], &["2", "200"]]);
    let plan = plan_for(&incoming, &snapshot);
    let outcome = executor().apply(&plan, &incoming, &snapshot, &sink).await;

    assert!(!outcome.success);
    assert_eq!(outcome.new_count, 1);
    assert_eq!(outcome.updated_count, 0);
    assert_eq!(
        sink.read_all().await.unwrap(),
        id_amount(&[&["1", "100"], &["2", "200"]])
    );
}

#[tokio::test(start_paused = true)]
async fn force_update_rewrites_unchanged_duplicates() {
    let snapshot = id_amount(&[&["1", "100"]]);
    let sink = FlakySink::new(MemorySink::with_table(&snapshot));
    let plan = SyncPlanner::plan(
        &snapshot,
        &snapshot,
        &KeySpec::column("ID"),
        DuplicatePolicy::ForceUpdate,
    );

    let outcome = executor().apply(&plan, &snapshot, &snapshot, &sink).await;

    assert!(outcome.success);
    assert_eq!(outcome.updated_count, 1);
    assert_eq!(outcome.unchanged_count, 0);
    assert_eq!(sink.read_all().await.unwrap(), snapshot);
}

#[tokio::test(start_paused = true)]
async fn missing_key_column_appends_instead_of_overwriting() {
    let snapshot = Table::from_text(
        &["name", "amount"],
        &[&["alice", "100"], &["bob", "200"], &["carol", "300"]],
    )
    .unwrap();
    let sink = FlakySink::new(MemorySink::with_table(&snapshot));
    let incoming =
        Table::from_text(&["name", "amount"], &[&["dave", "1"], &["erin", "2"]]).unwrap();

    let plan = plan_for(&incoming, &snapshot);
    let outcome = executor().apply(&plan, &incoming, &snapshot, &sink).await;

    assert!(plan.degraded);
    assert!(outcome.success);
    assert_eq!(outcome.updated_count, 0);
    assert_eq!(outcome.new_count, 2);
    assert_eq!(sink.patch_calls.load(Ordering::SeqCst), 0);

    let after = sink.read_all().await.unwrap();
    assert_eq!(&after.rows()[..snapshot.len()], snapshot.rows());
    assert_eq!(after.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn real_ids_never_match_a_keyless_sink_by_position() {
    let snapshot = Table::from_text(&["amount"], &[&["100"], &["200"]]).unwrap();
    let sink = FlakySink::new(MemorySink::with_table(&snapshot));
    let incoming = id_amount(&[&["1", "999"]]);

    let plan = plan_for(&incoming, &snapshot);
    assert!(plan.update.is_empty());
    assert_eq!(plan.append, vec![0]);

    let outcome = executor().apply(&plan, &incoming, &snapshot, &sink).await;
    assert!(outcome.success);
    assert_eq!(sink.patch_calls.load(Ordering::SeqCst), 0);
    assert_eq!(&sink.read_all().await.unwrap().rows()[..2], snapshot.rows());
}

#[tokio::test(start_paused = true)]
async fn patch_keeps_sink_only_columns() {
    let snapshot = Table::from_text(
        &["ID", "amount", "note"],
        &[&["1", "100", "keep me"], &["2", "200", "and me"]],
    )
    .unwrap();
    let sink = FlakySink::new(MemorySink::with_table(&snapshot));
    let incoming = id_amount(&[&["1", "100"], &["2", "250"]]);

    let plan = plan_for(&incoming, &snapshot);
    let outcome = executor().apply(&plan, &incoming, &snapshot, &sink).await;

    assert!(outcome.success);
    assert_eq!(outcome.updated_count, 2);
    assert_eq!(
        sink.read_all().await.unwrap(),
        Table::from_text(
            &["ID", "amount", "note"],
            &[&["1", "100", "keep me"], &["2", "250", "and me"]],
        )
        .unwrap()
    );
}
