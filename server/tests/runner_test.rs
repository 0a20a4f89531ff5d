//! Integration tests for sync runs and batch scheduling.

mod common;

use common::{day, id_amount, test_policy, FixedSinks, FlakySink, RecordingNotifier, StaticSource};
use sheetsync_engine::{DuplicatePolicy, KeySpec, Table};
use sheetsync_server::error::{ExtractionError, SinkError};
use sheetsync_server::executor::{SyncExecutor, UpdateMode};
use sheetsync_server::exports::{ExportCatalog, ExportDefinition, ExportKind};
use sheetsync_server::history::RunHistory;
use sheetsync_server::runner::{BatchScheduler, SyncPhase, SyncRunner};
use sheetsync_server::sink::{JsonFileSinkProvider, MemorySink, Sink};
use sheetsync_server::source::{DateWindow, ExportFileSource};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn export(kind: ExportKind) -> ExportDefinition {
    let mut def = kind.definition(DuplicatePolicy::Skip);
    def.key = KeySpec::column("ID");
    def
}

fn window() -> DateWindow {
    DateWindow::single(day("2024-05-01"))
}

fn runner(source: StaticSource, sinks: FixedSinks, notifier: RecordingNotifier) -> SyncRunner {
    SyncRunner::new(
        Arc::new(source),
        Arc::new(sinks),
        SyncExecutor::new(test_policy(), UpdateMode::Patch, 100),
        Arc::new(notifier),
        RunHistory::new(50),
    )
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ============================================================================
// Single runs
// ============================================================================

#[tokio::test(start_paused = true)]
async fn run_appends_new_rows() {
    let def = export(ExportKind::Transaksi);
    let source = StaticSource::default().with(&def, Ok(id_amount(&[&["1", "100"], &["2", "50"]])));
    let sinks = FixedSinks::default();
    let existing = MemorySink::with_table(&id_amount(&[&["1", "100"]]));
    sinks.insert(&def.sheet_name, FlakySink::new(existing));

    let runner = runner(source, sinks.clone(), RecordingNotifier::default());
    let summary = runner.run(&def, window()).await;

    assert!(summary.success);
    assert_eq!(summary.phase, SyncPhase::Succeeded);
    assert_eq!(summary.records, 2);
    assert_eq!(summary.new_count, 1);
    assert_eq!(summary.unchanged_count, 1);
    assert_eq!(
        summary.operations,
        vec!["APPEND 1 new records", "SKIP 1 unchanged duplicates"]
    );
    assert_eq!(sinks.get(&def.sheet_name).read_all().await.unwrap().len(), 2);
    assert_eq!(runner.history().get(&summary.run_id), Some(summary));
}

#[tokio::test(start_paused = true)]
async fn empty_result_set_is_success() {
    let def = export(ExportKind::User);
    let source = StaticSource::default().with(&def, Ok(id_amount(&[])));
    let sinks = FixedSinks::default();
    let sink = FlakySink::new(MemorySink::new());
    sink.fail_reads([SinkError::from_status(400, "must not be read")]);
    sinks.insert(&def.sheet_name, sink);

    let summary = runner(source, sinks, RecordingNotifier::default())
        .run(&def, window())
        .await;

    assert!(summary.success);
    assert_eq!(summary.records, 0);
    assert!(summary.error.is_none());
    assert!(summary.operations.is_empty());
}

#[tokio::test(start_paused = true)]
async fn extraction_error_fails_without_writing() {
    let def = export(ExportKind::PointTrx);
    let source = StaticSource::default().with(
        &def,
        Err(ExtractionError::NoHeader("export_point_trx.json".into())),
    );
    let sinks = FixedSinks::default();
    let existing = id_amount(&[&["9", "9"]]);
    sinks.insert(&def.sheet_name, FlakySink::new(MemorySink::with_table(&existing)));

    let summary = runner(source, sinks.clone(), RecordingNotifier::default())
        .run(&def, window())
        .await;

    assert!(!summary.success);
    assert_eq!(summary.phase, SyncPhase::FailedPreserved);
    assert!(summary.error.unwrap().contains("no header"));
    assert_eq!(sinks.get(&def.sheet_name).read_all().await.unwrap(), existing);
}

#[tokio::test(start_paused = true)]
async fn snapshot_read_is_retried() {
    let def = export(ExportKind::Transaksi);
    let source = StaticSource::default().with(&def, Ok(id_amount(&[&["1", "100"]])));
    let sinks = FixedSinks::default();
    let sink = FlakySink::new(MemorySink::new());
    sink.fail_reads([SinkError::from_status(503, "backend error")]);
    sinks.insert(&def.sheet_name, sink);

    let summary = runner(source, sinks, RecordingNotifier::default())
        .run(&def, window())
        .await;

    assert!(summary.success);
    assert_eq!(summary.retries, 1);
    assert_eq!(summary.new_count, 1);
}

#[tokio::test(start_paused = true)]
async fn write_failure_ends_preserved() {
    let def = export(ExportKind::Transaksi);
    let source = StaticSource::default().with(&def, Ok(id_amount(&[&["2", "200"]])));
    let existing = id_amount(&[&["1", "100"]]);
    let sink = FlakySink::new(MemorySink::with_table(&existing));
    sink.fail_appends([SinkError::from_status(403, "The caller does not have permission")]);
    let sinks = FixedSinks::default();
    sinks.insert(&def.sheet_name, sink);

    let notifier = RecordingNotifier::default();
    let summary = runner(source, sinks.clone(), notifier.clone())
        .run(&def, window())
        .await;
    settle().await;

    assert!(!summary.success);
    assert_eq!(summary.phase, SyncPhase::FailedPreserved);
    assert_eq!(sinks.get(&def.sheet_name).read_all().await.unwrap(), existing);

    let notified = notifier.runs.lock().unwrap().clone();
    assert_eq!(notified.len(), 1);
    assert!(!notified[0].success);
}

#[tokio::test(start_paused = true)]
async fn rerun_is_idempotent() {
    let def = export(ExportKind::Transaksi);
    let batch = id_amount(&[&["1", "100"], &["2", "200"], &["3", "300"]]);
    let source = StaticSource::default().with(&def, Ok(batch.clone()));
    let sinks = FixedSinks::default();
    let runner = runner(source, sinks.clone(), RecordingNotifier::default());

    let first = runner.run(&def, window()).await;
    let second = runner.run(&def, window()).await;

    assert_eq!(first.new_count, 3);
    assert_eq!(second.new_count, 0);
    assert_eq!(second.unchanged_count, 3);
    assert_eq!(sinks.get(&def.sheet_name).read_all().await.unwrap(), batch);
}

// ============================================================================
// Batches
// ============================================================================

#[tokio::test(start_paused = true)]
async fn batch_runs_exports_in_order_and_notifies() {
    let transaksi = export(ExportKind::Transaksi);
    let user = export(ExportKind::User);
    let catalog = ExportCatalog::new(vec![transaksi.clone(), user.clone()]).unwrap();

    let source = StaticSource::default()
        .with(&transaksi, Ok(id_amount(&[&["1", "100"], &["2", "200"]])))
        .with(&user, Err(ExtractionError::NotFound("export_user".into())));
    let fetches = Arc::clone(&source.fetches);
    let notifier = RecordingNotifier::default();
    let runner = runner(source, FixedSinks::default(), notifier.clone());
    let scheduler = BatchScheduler::new(Arc::new(runner), Arc::new(catalog));

    let summary = scheduler.run_all(window()).await;
    settle().await;

    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.failure_count, 1);
    assert_eq!(summary.records, 2);
    assert!(!summary.all_succeeded());
    let order: Vec<ExportKind> = summary.results.iter().map(|r| r.export).collect();
    assert_eq!(order, vec![ExportKind::Transaksi, ExportKind::User]);

    assert_eq!(notifier.runs.lock().unwrap().len(), 2);
    let batches = notifier.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].failure_count, 1);
}

// ============================================================================
// File-backed source and sink
// ============================================================================

#[tokio::test]
async fn file_backed_sync_end_to_end() {
    let downloads = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    tokio::fs::write(
        downloads.path().join("export_transaksi_2024-05-01.json"),
        r#"[
            {"No": 1, "Transaksi ID": "T-1", "amount": 100},
            {"No": 2, "Transaksi ID": "T-2", "amount": 250.5}
        ]"#,
    )
    .await
    .unwrap();

    let def = ExportKind::Transaksi.definition(DuplicatePolicy::Skip);
    let policy = sheetsync_server::retry::RetryPolicy {
        min_call_interval: Duration::ZERO,
        ..test_policy()
    };
    let runner = SyncRunner::new(
        Arc::new(ExportFileSource::new(downloads.path())),
        Arc::new(JsonFileSinkProvider::new(data.path(), 10_000)),
        SyncExecutor::new(policy, UpdateMode::Patch, 100),
        Arc::new(RecordingNotifier::default()),
        RunHistory::new(10),
    );

    let first = runner.run(&def, window()).await;
    assert!(first.success, "{:?}", first.error);
    assert_eq!(first.new_count, 2);

    // Same download again: nothing to append.
    let second = runner.run(&def, window()).await;
    assert_eq!(second.new_count, 0);
    assert_eq!(second.unchanged_count, 2);

    let sheet =
        sheetsync_server::sink::JsonFileSink::new(data.path().join("transaksi.json"), 10_000);
    let table: Table = sheet.read_all().await.unwrap();
    assert_eq!(table.columns(), &["No", "Transaksi ID", "amount"]);
    assert_eq!(table.get(1, "amount").unwrap().as_key_string(), "250.5");
}
