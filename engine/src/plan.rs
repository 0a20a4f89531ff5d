//! Sync planning: turn a diff into a minimal mutation plan.
//!
//! A plan partitions the full incoming batch into exactly one of
//! append / update / skip. Planning is a pure function of its inputs.

use crate::{
    diff::{DiffResult, DiffSummary, SnapshotDiff},
    key::KeySpec,
    PlanOperation, Table,
};
use serde::{Deserialize, Serialize};

/// What to do with duplicates whose content is unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Leave unchanged rows alone (default)
    #[default]
    Skip,
    /// Rewrite unchanged rows anyway, e.g. to repair formatting drift
    ForceUpdate,
}

impl std::str::FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(DuplicatePolicy::Skip),
            "force_update" | "force-update" => Ok(DuplicatePolicy::ForceUpdate),
            other => Err(format!("unknown duplicate policy: {other}")),
        }
    }
}

/// One row scheduled for an in-place update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEntry {
    /// Index into the incoming batch
    pub incoming: usize,
    /// Index of the matched row in the snapshot
    pub snapshot_row: usize,
    /// Content was unchanged; included by [`DuplicatePolicy::ForceUpdate`]
    pub forced: bool,
}

/// Partition sizes of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanCounts {
    pub append: usize,
    pub update: usize,
    pub skip: usize,
}

impl PlanCounts {
    pub fn total(&self) -> usize {
        self.append + self.update + self.skip
    }
}

/// The computed partition of an incoming batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPlan {
    /// Incoming indices to append after the snapshot's last row
    pub append: Vec<usize>,
    /// Rows to patch in place
    pub update: Vec<UpdateEntry>,
    /// Incoming indices left untouched
    pub skip: Vec<usize>,
    /// Human-readable audit log, one line per non-empty partition
    pub operations: Vec<PlanOperation>,
    /// Diff counts the plan was built from
    pub summary: DiffSummary,
    /// The diff fell back to treating everything as new
    pub degraded: bool,
}

impl SyncPlan {
    pub fn counts(&self) -> PlanCounts {
        PlanCounts {
            append: self.append.len(),
            update: self.update.len(),
            skip: self.skip.len(),
        }
    }

    /// Nothing to write.
    pub fn is_noop(&self) -> bool {
        self.append.is_empty() && self.update.is_empty()
    }

    /// Rows to append, materialized from the incoming batch.
    pub fn append_rows(&self, incoming: &Table) -> Table {
        incoming.select(&self.append)
    }

    /// Audit log lines.
    pub fn operation_lines(&self) -> Vec<String> {
        self.operations.iter().map(ToString::to_string).collect()
    }
}

/// Builds sync plans.
pub struct SyncPlanner;

impl SyncPlanner {
    /// Diff `incoming` against `snapshot` and plan the minimal mutation.
    pub fn plan(
        incoming: &Table,
        snapshot: &Table,
        spec: &KeySpec,
        policy: DuplicatePolicy,
    ) -> SyncPlan {
        let diff = SnapshotDiff::compute(incoming, snapshot, spec);
        Self::from_diff(&diff, policy)
    }

    /// Plan from an already computed diff.
    pub fn from_diff(diff: &DiffResult, policy: DuplicatePolicy) -> SyncPlan {
        let entry = |index: usize, forced: bool| {
            diff.matches.get(&index).map(|&snapshot_row| UpdateEntry {
                incoming: index,
                snapshot_row,
                forced,
            })
        };

        let append = diff.new.clone();
        let mut update: Vec<UpdateEntry> =
            diff.updated.iter().filter_map(|&i| entry(i, false)).collect();
        let mut skip = Vec::new();
        let mut operations = Vec::new();

        if !append.is_empty() {
            operations.push(PlanOperation::Append(append.len()));
        }
        if !update.is_empty() {
            operations.push(PlanOperation::Update(update.len()));
        }
        if !diff.unchanged.is_empty() {
            match policy {
                DuplicatePolicy::Skip => {
                    skip = diff.unchanged.clone();
                    operations.push(PlanOperation::Skip(skip.len()));
                }
                DuplicatePolicy::ForceUpdate => {
                    update.extend(diff.unchanged.iter().filter_map(|&i| entry(i, true)));
                    operations.push(PlanOperation::ForceUpdate(diff.unchanged.len()));
                }
            }
        }

        SyncPlan {
            append,
            update,
            skip,
            operations,
            summary: diff.summary(),
            degraded: diff.degraded,
        }
    }
}
