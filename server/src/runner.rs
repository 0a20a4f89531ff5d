//! Sync runs and the sequential batch scheduler.
//!
//! A run moves through
//! `Idle → Extracting → ReadingSnapshot → Diffing → Planning → Executing`
//! and ends in `Succeeded` or `FailedPreserved`. Runs are serialized: no two
//! runs ever touch a sink at the same time.

use crate::executor::SyncExecutor;
use crate::exports::{ExportCatalog, ExportDefinition, ExportKind};
use crate::history::RunHistory;
use crate::notifier::{self, Notifier};
use crate::sink::SinkProvider;
use crate::source::{DateWindow, Source};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sheetsync_engine::{SnapshotDiff, SyncPlanner};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// Days covered by a weekly batch.
pub const WEEK_DAYS: u64 = 7;

/// Where a run is, or where it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Extracting,
    ReadingSnapshot,
    Diffing,
    Planning,
    Executing,
    Succeeded,
    /// Failed with the sink content left as it was
    FailedPreserved,
}

impl SyncPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Succeeded | SyncPhase::FailedPreserved)
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Extracting => "extracting",
            SyncPhase::ReadingSnapshot => "reading_snapshot",
            SyncPhase::Diffing => "diffing",
            SyncPhase::Planning => "planning",
            SyncPhase::Executing => "executing",
            SyncPhase::Succeeded => "succeeded",
            SyncPhase::FailedPreserved => "failed_preserved",
        };
        f.write_str(name)
    }
}

/// Outcome of one export run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub export: ExportKind,
    pub window: DateWindow,
    /// Terminal phase
    pub phase: SyncPhase,
    pub success: bool,
    /// Rows in the incoming batch
    pub records: usize,
    pub new_count: usize,
    pub updated_count: usize,
    pub unchanged_count: usize,
    /// Plan audit lines
    pub operations: Vec<String>,
    pub retries: u32,
    /// Diff fell back to treating every row as new
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

/// Outcome of a sequential run over several exports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub window: DateWindow,
    pub success_count: usize,
    pub failure_count: usize,
    /// Incoming rows across successful runs
    pub records: usize,
    pub elapsed_ms: u64,
    pub results: Vec<RunSummary>,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failure_count == 0
    }
}

/// A run in progress.
struct RunState {
    summary: RunSummary,
    clock: Instant,
}

impl RunState {
    fn start(export: ExportKind, window: DateWindow) -> Self {
        Self {
            summary: RunSummary {
                run_id: Uuid::new_v4(),
                export,
                window,
                phase: SyncPhase::Idle,
                success: false,
                records: 0,
                new_count: 0,
                updated_count: 0,
                unchanged_count: 0,
                operations: Vec::new(),
                retries: 0,
                degraded: false,
                error: None,
                started_at: Utc::now(),
                elapsed_ms: 0,
            },
            clock: Instant::now(),
        }
    }

    fn enter(&mut self, phase: SyncPhase) {
        tracing::info!(
            run_id = %self.summary.run_id,
            export = %self.summary.export,
            from = %self.summary.phase,
            to = %phase,
            "Sync phase"
        );
        self.summary.phase = phase;
    }

    fn succeed(mut self) -> RunSummary {
        self.enter(SyncPhase::Succeeded);
        self.summary.success = true;
        self.finish()
    }

    fn fail(mut self, error: impl fmt::Display) -> RunSummary {
        let failed_in = self.summary.phase;
        self.enter(SyncPhase::FailedPreserved);
        tracing::error!(
            run_id = %self.summary.run_id,
            export = %self.summary.export,
            phase = %failed_in,
            error = %error,
            "Sync run failed"
        );
        self.summary.error = Some(error.to_string());
        self.finish()
    }

    fn finish(mut self) -> RunSummary {
        self.summary.elapsed_ms = self.clock.elapsed().as_millis() as u64;
        self.summary
    }
}

/// Drives single export runs.
pub struct SyncRunner {
    source: Arc<dyn Source>,
    sinks: Arc<dyn SinkProvider>,
    executor: SyncExecutor,
    notifier: Arc<dyn Notifier>,
    history: RunHistory,
    lock: Mutex<()>,
}

impl SyncRunner {
    pub fn new(
        source: Arc<dyn Source>,
        sinks: Arc<dyn SinkProvider>,
        executor: SyncExecutor,
        notifier: Arc<dyn Notifier>,
        history: RunHistory,
    ) -> Self {
        Self {
            source,
            sinks,
            executor,
            notifier,
            history,
            lock: Mutex::new(()),
        }
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        Arc::clone(&self.notifier)
    }

    /// Sync one export for `window`, record the summary, and notify.
    pub async fn run(&self, export: &ExportDefinition, window: DateWindow) -> RunSummary {
        let summary = {
            let _guard = self.lock.lock().await;
            self.execute(export, window).await
        };
        self.history.record(summary.clone());
        notifier::spawn_run(self.notifier(), summary.clone());
        summary
    }

    async fn execute(&self, export: &ExportDefinition, window: DateWindow) -> RunSummary {
        let mut run = RunState::start(export.kind, window);
        tracing::info!(
            run_id = %run.summary.run_id,
            export = %export.name,
            %window,
            "Starting sync run"
        );

        run.enter(SyncPhase::Extracting);
        let incoming = match self.source.fetch(export, &window).await {
            Ok(table) => table,
            Err(err) => return run.fail(err),
        };
        run.summary.records = incoming.len();

        if incoming.is_empty() {
            tracing::info!(export = %export.kind, %window, "No records in window");
            return run.succeed();
        }

        run.enter(SyncPhase::ReadingSnapshot);
        let sink = match self.executor.open(self.sinks.as_ref(), export).await {
            Ok((sink, stats)) => {
                run.summary.retries += stats.retries();
                sink
            }
            Err(err) => {
                run.summary.retries += err.attempts.saturating_sub(1);
                return run.fail(err);
            }
        };
        let snapshot = match self.executor.read_snapshot(sink.as_ref()).await {
            Ok((snapshot, stats)) => {
                run.summary.retries += stats.retries();
                snapshot
            }
            Err(err) => {
                run.summary.retries += err.attempts.saturating_sub(1);
                return run.fail(err);
            }
        };

        run.enter(SyncPhase::Diffing);
        let diff = SnapshotDiff::compute(&incoming, &snapshot, &export.key);
        run.summary.degraded = diff.degraded;

        run.enter(SyncPhase::Planning);
        let plan = SyncPlanner::from_diff(&diff, export.duplicate_policy);
        run.summary.operations = plan.operation_lines();
        for line in &run.summary.operations {
            tracing::info!(export = %export.kind, "{}", line);
        }

        run.enter(SyncPhase::Executing);
        let outcome = self
            .executor
            .apply(&plan, &incoming, &snapshot, sink.as_ref())
            .await;
        run.summary.new_count = outcome.new_count;
        run.summary.updated_count = outcome.updated_count;
        run.summary.unchanged_count = outcome.unchanged_count;
        run.summary.retries += outcome.retries;

        match outcome.error {
            None if outcome.success => run.succeed(),
            Some(error) => run.fail(error),
            None => run.fail("sync failed without an error message"),
        }
    }
}

/// Runs every enabled export in catalogue order, one at a time.
pub struct BatchScheduler {
    runner: Arc<SyncRunner>,
    catalog: Arc<ExportCatalog>,
}

impl BatchScheduler {
    pub fn new(runner: Arc<SyncRunner>, catalog: Arc<ExportCatalog>) -> Self {
        Self { runner, catalog }
    }

    pub fn runner(&self) -> &Arc<SyncRunner> {
        &self.runner
    }

    pub fn catalog(&self) -> &ExportCatalog {
        &self.catalog
    }

    /// Run every export over the seven days before `today`.
    pub async fn run_weekly(&self, today: NaiveDate) -> BatchSummary {
        self.run_all(DateWindow::last_days(today, WEEK_DAYS)).await
    }

    pub async fn run_all(&self, window: DateWindow) -> BatchSummary {
        let clock = Instant::now();
        tracing::info!(exports = self.catalog.len(), %window, "Starting batch");

        let mut results = Vec::with_capacity(self.catalog.len());
        for export in self.catalog.iter() {
            results.push(self.runner.run(export, window).await);
        }

        let success_count = results.iter().filter(|r| r.success).count();
        let summary = BatchSummary {
            window,
            success_count,
            failure_count: results.len() - success_count,
            records: results.iter().filter(|r| r.success).map(|r| r.records).sum(),
            elapsed_ms: clock.elapsed().as_millis() as u64,
            results,
        };

        tracing::info!(
            succeeded = summary.success_count,
            failed = summary.failure_count,
            records = summary.records,
            elapsed_ms = summary.elapsed_ms,
            "Batch finished"
        );
        notifier::spawn_batch(self.runner.notifier(), summary.clone());
        summary
    }
}
