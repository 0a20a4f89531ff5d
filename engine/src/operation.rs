//! Plan operations: the audit trail a sync plan carries.
//!
//! Each operation names one partition of the incoming batch and its size.
//! The executor logs them verbatim and tests assert on them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One line of a sync plan's operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "count", rename_all = "snake_case")]
pub enum PlanOperation {
    /// Rows whose key is absent from the snapshot
    Append(usize),
    /// Rows whose key exists but whose content changed
    Update(usize),
    /// Unchanged rows folded into the update set by policy
    ForceUpdate(usize),
    /// Unchanged rows left alone
    Skip(usize),
}

impl fmt::Display for PlanOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanOperation::Append(n) => write!(f, "APPEND {n} new records"),
            PlanOperation::Update(n) => write!(f, "UPDATE {n} changed records"),
            PlanOperation::ForceUpdate(n) => write!(f, "FORCE UPDATE {n} duplicates"),
            PlanOperation::Skip(n) => write!(f, "SKIP {n} unchanged duplicates"),
        }
    }
}
