//! Applies sync plans to a sink.
//!
//! The executor never clears or rewrites existing rows wholesale. A failed
//! run leaves whatever the sink already held, plus any append batch that
//! committed before the failure.

use crate::config::Config;
use crate::exports::ExportDefinition;
use crate::retry::{RetryError, RetryPolicy, RetryStats};
use crate::sink::{Sink, SinkProvider};
use serde::{Deserialize, Serialize};
use sheetsync_engine::snapshot::{append_start_row, capacity_target, data_row_number, rows_needed};
use sheetsync_engine::{ColumnName, SyncPlan, Table};
use std::sync::Arc;

/// How planned updates are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Overwrite each changed row in place
    #[default]
    Patch,
    /// Count and log updates without writing them
    ReportOnly,
}

impl std::str::FromStr for UpdateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patch" => Ok(UpdateMode::Patch),
            "report_only" | "report-only" => Ok(UpdateMode::ReportOnly),
            other => Err(format!("unknown update mode: {other}")),
        }
    }
}

/// Result of applying one plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub success: bool,
    /// Rows appended to the sink
    pub new_count: usize,
    /// Rows patched, or reported under [`UpdateMode::ReportOnly`]
    pub updated_count: usize,
    pub unchanged_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Extra attempts spent on transient errors
    pub retries: u32,
}

/// Writes plans through a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct SyncExecutor {
    retry: RetryPolicy,
    update_mode: UpdateMode,
    capacity_buffer: usize,
}

impl SyncExecutor {
    pub fn new(retry: RetryPolicy, update_mode: UpdateMode, capacity_buffer: usize) -> Self {
        Self {
            retry,
            update_mode,
            capacity_buffer,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.retry.clone(), config.update_mode, config.capacity_buffer)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn update_mode(&self) -> UpdateMode {
        self.update_mode
    }

    /// Open the sink behind `export`.
    pub async fn open(
        &self,
        provider: &dyn SinkProvider,
        export: &ExportDefinition,
    ) -> Result<(Arc<dyn Sink>, RetryStats), RetryError> {
        self.retry
            .run("open_sink", move || provider.open(export))
            .await
    }

    /// Read the full snapshot of `sink`.
    pub async fn read_snapshot(&self, sink: &dyn Sink) -> Result<(Table, RetryStats), RetryError> {
        self.retry.run("read_snapshot", move || sink.read_all()).await
    }

    /// Apply `plan` to `sink`.
    ///
    /// `snapshot` must be the content `plan` was computed against.
    pub async fn apply(
        &self,
        plan: &SyncPlan,
        incoming: &Table,
        snapshot: &Table,
        sink: &dyn Sink,
    ) -> SyncOutcome {
        let mut outcome = SyncOutcome {
            unchanged_count: plan.skip.len(),
            ..SyncOutcome::default()
        };

        if plan.is_noop() {
            tracing::info!(skipped = plan.skip.len(), "Nothing to write");
            outcome.success = true;
            return outcome;
        }

        match self.write(plan, incoming, snapshot, sink, &mut outcome).await {
            Ok(()) => {
                outcome.success = true;
                tracing::info!(
                    new = outcome.new_count,
                    updated = outcome.updated_count,
                    unchanged = outcome.unchanged_count,
                    retries = outcome.retries,
                    "Plan applied"
                );
            }
            Err(err) => {
                outcome.retries += err.attempts.saturating_sub(1);
                outcome.error = Some(err.to_string());
                tracing::error!(
                    error = %err,
                    committed = outcome.new_count,
                    "Sync failed, existing rows left untouched; manual re-run required"
                );
            }
        }
        outcome
    }

    async fn write(
        &self,
        plan: &SyncPlan,
        incoming: &Table,
        snapshot: &Table,
        sink: &dyn Sink,
        outcome: &mut SyncOutcome,
    ) -> Result<(), RetryError> {
        let header = self.resolve_header(incoming, snapshot, sink, outcome).await?;

        if !plan.append.is_empty() {
            let rows = plan.append_rows(incoming).project(&header);
            self.grow_for(snapshot.len(), rows.len(), sink, outcome).await;

            let start_row = append_start_row(snapshot.len());
            let rows_ref = &rows;
            let ((), stats) = self
                .retry
                .run("append_rows", move || sink.append(start_row, rows_ref))
                .await?;
            outcome.retries += stats.retries();
            outcome.new_count = rows.len();
            tracing::info!(count = rows.len(), start_row, "Appended rows");
        }

        if plan.update.is_empty() {
            return Ok(());
        }

        match self.update_mode {
            UpdateMode::ReportOnly => {
                outcome.updated_count = plan.update.len();
                tracing::info!(
                    count = plan.update.len(),
                    "Updates reported only, sink rows not modified"
                );
            }
            UpdateMode::Patch => {
                for entry in &plan.update {
                    let base = snapshot.row(entry.snapshot_row).cloned().unwrap_or_default();
                    let Some(row) = incoming.overlay_row(entry.incoming, &base, &header) else {
                        continue;
                    };
                    let row_number = data_row_number(entry.snapshot_row);
                    let row_ref = &row;
                    let ((), stats) = self
                        .retry
                        .run("patch_row", move || sink.patch_row(row_number, row_ref))
                        .await?;
                    outcome.retries += stats.retries();
                    outcome.updated_count += 1;
                }
                tracing::info!(count = outcome.updated_count, "Patched rows in place");
            }
        }
        Ok(())
    }

    /// Header rows are written against. Writes the incoming header into a
    /// blank sink.
    async fn resolve_header(
        &self,
        incoming: &Table,
        snapshot: &Table,
        sink: &dyn Sink,
        outcome: &mut SyncOutcome,
    ) -> Result<Vec<ColumnName>, RetryError> {
        if snapshot.has_header() {
            let dropped = incoming.columns_missing_from(snapshot.columns());
            if !dropped.is_empty() {
                tracing::warn!(columns = ?dropped, "Incoming columns not present in sink, dropped");
            }
            return Ok(snapshot.columns().to_vec());
        }

        let columns = incoming.columns();
        let ((), stats) = self
            .retry
            .run("write_header", move || sink.write_header(columns))
            .await?;
        outcome.retries += stats.retries();
        tracing::info!(columns = columns.len(), "Wrote header into blank sink");
        Ok(columns.to_vec())
    }

    /// Best-effort capacity growth ahead of an append.
    async fn grow_for(
        &self,
        snapshot_rows: usize,
        append_rows: usize,
        sink: &dyn Sink,
        outcome: &mut SyncOutcome,
    ) {
        let capacity = match self.retry.run("capacity", move || sink.capacity()).await {
            Ok((capacity, stats)) => {
                outcome.retries += stats.retries();
                capacity
            }
            Err(err) => {
                outcome.retries += err.attempts.saturating_sub(1);
                tracing::warn!(error = %err, "Capacity check failed, writing anyway");
                return;
            }
        };

        let needed = rows_needed(snapshot_rows, append_rows, self.capacity_buffer);
        let Some(target) = capacity_target(capacity.rows, needed, capacity.max_rows) else {
            return;
        };

        tracing::info!(current = capacity.rows, needed, target, "Growing sink");
        match self
            .retry
            .run("ensure_capacity", move || sink.ensure_capacity(target))
            .await
        {
            Ok(((), stats)) => outcome.retries += stats.retries(),
            Err(err) => {
                outcome.retries += err.attempts.saturating_sub(1);
                tracing::warn!(error = %err, target, "Capacity growth failed, writing anyway");
            }
        }
    }
}
