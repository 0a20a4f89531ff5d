//! Snapshot diffing: classify an incoming batch against the sink's content.
//!
//! # Algorithm
//!
//! 1. Identity: derive keys for both tables; incoming rows whose key exists
//!    in the snapshot are duplicate candidates, all others are new.
//! 2. Content: for duplicate candidates only, compare every column value
//!    (stringified) with the matching snapshot row. Any difference, including
//!    a column present on one side only, marks the row updated.
//!
//! Failures during either step degrade to "everything is new", and so does
//! a missing key column on either side. Losing a row is worse than appending
//! a duplicate.

use crate::{
    error::Result,
    key::{compute_keys, KeySpec, RecordKey},
    Error, Table,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Result of the identity step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Incoming indices whose key is absent from the snapshot
    pub new: Vec<usize>,
    /// Incoming indices whose key is present in the snapshot
    pub duplicate: Vec<usize>,
}

/// Result of the content step over duplicate candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub updated: Vec<usize>,
    pub unchanged: Vec<usize>,
    /// Incoming index -> matched snapshot row index
    pub matches: BTreeMap<usize, usize>,
}

/// Full classification of an incoming batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    pub new: Vec<usize>,
    pub duplicates: Vec<usize>,
    pub updated: Vec<usize>,
    pub unchanged: Vec<usize>,
    /// Incoming index -> matched snapshot row index, for every duplicate
    pub matches: BTreeMap<usize, usize>,
    /// True when an error forced the conservative all-new result
    pub degraded: bool,
    /// Rows in the incoming batch
    pub total: usize,
}

impl DiffResult {
    fn all_new(total: usize, degraded: bool) -> Self {
        Self {
            new: (0..total).collect(),
            total,
            degraded,
            ..Self::default()
        }
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            total_records: self.total,
            new_count: self.new.len(),
            duplicate_count: self.duplicates.len(),
            updated_count: self.updated.len(),
            unchanged_count: self.unchanged.len(),
        }
    }
}

/// Counts for logging and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub total_records: usize,
    pub new_count: usize,
    pub duplicate_count: usize,
    pub updated_count: usize,
    pub unchanged_count: usize,
}

/// Split incoming rows into new and duplicate candidates.
///
/// When either side has to fall back to positional keys, every row is new.
pub fn classify(incoming: &Table, snapshot: &Table, spec: &KeySpec) -> Result<Classification> {
    if snapshot.is_empty() {
        return Ok(Classification {
            new: (0..incoming.len()).collect(),
            duplicate: Vec::new(),
        });
    }

    match identity_keys(incoming, snapshot, spec)? {
        Some((incoming_keys, snapshot_keys)) => Ok(split(&incoming_keys, &snapshot_keys)),
        None => Ok(Classification {
            new: (0..incoming.len()).collect(),
            duplicate: Vec::new(),
        }),
    }
}

/// Compare duplicate candidates against their snapshot rows.
///
/// `duplicates` are indices into `incoming` (not into a subset), so results
/// never need remapping. Positional keys never match anything.
pub fn compare(
    incoming: &Table,
    duplicates: &[usize],
    snapshot: &Table,
    spec: &KeySpec,
) -> Result<ChangeSet> {
    if duplicates.is_empty() || snapshot.is_empty() {
        return Ok(ChangeSet::default());
    }
    let Some((incoming_keys, snapshot_keys)) = identity_keys(incoming, snapshot, spec)? else {
        return Ok(ChangeSet::default());
    };
    match_rows(incoming, &incoming_keys, duplicates, snapshot, &snapshot_keys)
}

/// Keys of both tables, or `None` when either fell back to row positions.
/// Row ordinals are not record identities.
fn identity_keys(
    incoming: &Table,
    snapshot: &Table,
    spec: &KeySpec,
) -> Result<Option<(Vec<RecordKey>, Vec<RecordKey>)>> {
    let snapshot_keys = compute_keys(snapshot, spec)?;
    let incoming_keys = compute_keys(incoming, spec)?;
    if snapshot_keys.is_positional() || incoming_keys.is_positional() {
        return Ok(None);
    }
    Ok(Some((incoming_keys.keys, snapshot_keys.keys)))
}

fn split(incoming_keys: &[RecordKey], snapshot_keys: &[RecordKey]) -> Classification {
    let existing: HashSet<&RecordKey> = snapshot_keys.iter().collect();
    let mut result = Classification::default();
    for (index, key) in incoming_keys.iter().enumerate() {
        if existing.contains(key) {
            result.duplicate.push(index);
        } else {
            result.new.push(index);
        }
    }
    result
}

fn match_rows(
    incoming: &Table,
    incoming_keys: &[RecordKey],
    duplicates: &[usize],
    snapshot: &Table,
    snapshot_keys: &[RecordKey],
) -> Result<ChangeSet> {
    // Last snapshot row wins when the snapshot itself repeats a key.
    let lookup: HashMap<&RecordKey, usize> = snapshot_keys
        .iter()
        .enumerate()
        .map(|(row, key)| (key, row))
        .collect();
    let alignment = ColumnAlignment::new(incoming, snapshot);

    let mut result = ChangeSet::default();
    for &index in duplicates {
        let key = incoming_keys.get(index).ok_or_else(|| Error::KeyComputation {
            row: index,
            reason: "duplicate index out of range".into(),
        })?;
        let Some(&snapshot_row) = lookup.get(key) else {
            continue;
        };
        result.matches.insert(index, snapshot_row);
        if alignment.rows_differ(incoming, index, snapshot, snapshot_row)? {
            result.updated.push(index);
        } else {
            result.unchanged.push(index);
        }
    }
    Ok(result)
}

/// Column correspondence between the incoming header and the snapshot header.
struct ColumnAlignment {
    /// For each incoming column, its position in the snapshot
    pairs: Vec<(usize, Option<usize>)>,
    /// Snapshot has columns the incoming batch lacks
    snapshot_extra: bool,
}

impl ColumnAlignment {
    fn new(incoming: &Table, snapshot: &Table) -> Self {
        let pairs = incoming
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| (i, snapshot.column_index(c)))
            .collect();
        let snapshot_extra = !snapshot.columns_missing_from(incoming.columns()).is_empty();
        Self {
            pairs,
            snapshot_extra,
        }
    }

    fn rows_differ(
        &self,
        incoming: &Table,
        incoming_row: usize,
        snapshot: &Table,
        snapshot_row: usize,
    ) -> Result<bool> {
        if self.snapshot_extra {
            return Ok(true);
        }
        let left = incoming.row(incoming_row).ok_or_else(|| row_error(incoming_row))?;
        let right = snapshot.row(snapshot_row).ok_or_else(|| row_error(snapshot_row))?;

        for &(left_col, right_col) in &self.pairs {
            let Some(right_col) = right_col else {
                return Ok(true);
            };
            let a = left.get(left_col).ok_or_else(|| row_error(incoming_row))?;
            let b = right.get(right_col).ok_or_else(|| row_error(snapshot_row))?;
            if a.as_key_string() != b.as_key_string() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn row_error(row: usize) -> Error {
    Error::KeyComputation {
        row,
        reason: "row is shorter than its header".into(),
    }
}

/// Runs both diff steps with the conservative failure policy.
pub struct SnapshotDiff;

impl SnapshotDiff {
    /// Classify every incoming row as new, updated or unchanged.
    ///
    /// Never fails: errors are logged and the whole batch is treated as new.
    pub fn compute(incoming: &Table, snapshot: &Table, spec: &KeySpec) -> DiffResult {
        let total = incoming.len();
        if snapshot.is_empty() {
            return DiffResult::all_new(total, false);
        }

        let outcome = identity_keys(incoming, snapshot, spec).and_then(|keys| {
            let Some((incoming_keys, snapshot_keys)) = keys else {
                return Ok(None);
            };
            let classification = split(&incoming_keys, &snapshot_keys);
            let changes = match_rows(
                incoming,
                &incoming_keys,
                &classification.duplicate,
                snapshot,
                &snapshot_keys,
            )?;
            Ok(Some((classification, changes)))
        });

        match outcome {
            Ok(Some((classification, changes))) => {
                let result = DiffResult {
                    new: classification.new,
                    duplicates: classification.duplicate,
                    updated: changes.updated,
                    unchanged: changes.unchanged,
                    matches: changes.matches,
                    degraded: false,
                    total,
                };
                tracing::info!(summary = ?result.summary(), "snapshot diff complete");
                result
            }
            Ok(None) => {
                tracing::warn!(rows = total, "no usable record key, treating batch as new");
                DiffResult::all_new(total, true)
            }
            Err(e) => {
                tracing::warn!(error = %e, rows = total, "diff failed, treating batch as new");
                DiffResult::all_new(total, true)
            }
        }
    }
}
