//! # Sheetsync Engine
//!
//! A deterministic incremental sync engine for tabular exports.
//!
//! Given a freshly downloaded batch of rows and the current content of a
//! destination table, the engine decides which rows are new, which changed
//! and which are untouched, and plans the minimal mutation. It never talks
//! to the destination itself; the `sheetsync-server` crate executes plans.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of files, network, or clocks
//! - **Deterministic**: Same inputs always produce the same plan
//! - **Conservative**: When identity cannot be established, rows are treated
//!   as new rather than merged or dropped
//!
//! ## Core Concepts
//!
//! ### Tables
//!
//! A [`Table`] is a header plus rows of [`Cell`]s. Non-finite floats are
//! normalized to empty cells so every table is JSON-safe.
//!
//! ### Record keys
//!
//! [`compute_keys`] derives a [`RecordKey`] per row from a [`KeySpec`]:
//! - [`KeySpec::Column`] - one natural key column
//! - [`KeySpec::Columns`] - composite key over listed columns
//! - [`KeySpec::AllExcept`] - composite key over every column but one
//!
//! ### Diffing and planning
//!
//! [`SnapshotDiff`] classifies incoming rows against a snapshot and
//! [`SyncPlanner`] partitions them into append / update / skip sets under a
//! [`DuplicatePolicy`].
//!
//! ## Quick Start
//!
//! ```rust
//! use sheetsync_engine::{DuplicatePolicy, KeySpec, SyncPlanner, Table};
//!
//! let snapshot = Table::from_text(&["ID", "amount"], &[&["1", "100"]]).unwrap();
//! let incoming = Table::from_text(
//!     &["ID", "amount"],
//!     &[&["1", "100"], &["2", "50"]],
//! )
//! .unwrap();
//!
//! let plan = SyncPlanner::plan(
//!     &incoming,
//!     &snapshot,
//!     &KeySpec::column("ID"),
//!     DuplicatePolicy::Skip,
//! );
//!
//! assert_eq!(plan.append, vec![1]);
//! assert_eq!(plan.skip, vec![0]);
//! assert_eq!(
//!     plan.operation_lines(),
//!     vec!["APPEND 1 new records", "SKIP 1 unchanged duplicates"],
//! );
//! ```

pub mod diff;
pub mod error;
pub mod key;
pub mod operation;
pub mod plan;
pub mod snapshot;
pub mod table;

// Re-export main types at crate root
pub use diff::{
    classify, compare, ChangeSet, Classification, DiffResult, DiffSummary, SnapshotDiff,
};
pub use error::Error;
pub use key::{
    compute_keys, KeyDerivation, KeyFallback, KeySpec, RecordKey, KEY_SEPARATOR, NULL_TOKEN,
};
pub use operation::PlanOperation;
pub use plan::{DuplicatePolicy, PlanCounts, SyncPlan, SyncPlanner, UpdateEntry};
pub use snapshot::HEADER_ROWS;
pub use table::{Cell, Row, Table};

/// Type aliases for clarity
pub type ColumnName = String;
