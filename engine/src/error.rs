//! Error types for the sync engine.

use crate::ColumnName;
use thiserror::Error;

/// All possible errors from the sync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Table construction errors
    #[error("row {row} has {got} cells, expected {expected}")]
    RowWidthMismatch {
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("duplicate column in header: {0}")]
    DuplicateColumn(ColumnName),

    #[error("invalid table: {0}")]
    InvalidTable(String),

    // Key derivation errors
    #[error("cannot derive key for row {row}: {reason}")]
    KeyComputation { row: usize, reason: String },

    #[error("invalid key spec: {0}")]
    InvalidKeySpec(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
