//! Record identity derivation.
//!
//! A [`RecordKey`] is the only notion of "same logical record" the engine
//! has across batches. Keys are recomputed on every call; nothing is cached.

use crate::{error::Result, ColumnName, Error, Table};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between composite key fragments.
pub const KEY_SEPARATOR: &str = "||";

/// Fragment substituted for a missing or blank value in composite keys.
///
/// A literal `"NULL"` in the data is indistinguishable from an absent value.
pub const NULL_TOKEN: &str = "NULL";

/// Derived identity of one row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which columns make up a row's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "columns", rename_all = "snake_case")]
pub enum KeySpec {
    /// One natural key column, e.g. a transaction ID.
    Column(ColumnName),
    /// Composite key over an explicit column list.
    Columns(Vec<ColumnName>),
    /// Composite key over every column except one volatile column
    /// (typically a row ordinal). Matched case-insensitively.
    AllExcept(ColumnName),
}

impl KeySpec {
    pub fn column(name: impl Into<ColumnName>) -> Self {
        KeySpec::Column(name.into())
    }

    pub fn columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ColumnName>,
    {
        KeySpec::Columns(names.into_iter().map(Into::into).collect())
    }

    pub fn all_except(name: impl Into<ColumnName>) -> Self {
        KeySpec::AllExcept(name.into())
    }

    /// Reject specs that can never match anything.
    pub fn validate(&self) -> Result<()> {
        match self {
            KeySpec::Column(c) | KeySpec::AllExcept(c) if c.trim().is_empty() => Err(
                Error::InvalidKeySpec("key column name must not be empty".into()),
            ),
            KeySpec::Columns(cols) if cols.is_empty() => Err(Error::InvalidKeySpec(
                "composite key needs at least one column".into(),
            )),
            KeySpec::Columns(cols) if cols.iter().any(|c| c.trim().is_empty()) => Err(
                Error::InvalidKeySpec("composite key column names must not be empty".into()),
            ),
            _ => Ok(()),
        }
    }

    /// Column positions this spec resolves to in `table`.
    ///
    /// Returns `None` when none of the requested columns exist.
    fn resolve(&self, table: &Table) -> Option<Vec<usize>> {
        let indices: Vec<usize> = match self {
            KeySpec::Column(c) => table.column_index(c).into_iter().collect(),
            KeySpec::Columns(cols) => cols.iter().filter_map(|c| table.column_index(c)).collect(),
            KeySpec::AllExcept(excluded) => table
                .columns()
                .iter()
                .enumerate()
                .filter(|(_, c)| !c.eq_ignore_ascii_case(excluded))
                .map(|(i, _)| i)
                .collect(),
        };
        (!indices.is_empty()).then_some(indices)
    }

    fn is_composite(&self) -> bool {
        !matches!(self, KeySpec::Column(_))
    }
}

/// Why keys fell back to row positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFallback {
    /// Columns the key spec requested
    pub requested: Vec<ColumnName>,
}

/// Keys for every row of a table, in row order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDerivation {
    pub keys: Vec<RecordKey>,
    /// Set when the requested columns were absent and positional identity
    /// was used instead.
    pub fallback: Option<KeyFallback>,
}

impl KeyDerivation {
    pub fn is_positional(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Derive one key per row, same order as the input.
///
/// If the requested columns are absent entirely, keys degrade to row
/// positions (`"0"`, `"1"`, ...) and a warning is logged. A row shorter than
/// the header is an error.
pub fn compute_keys(table: &Table, spec: &KeySpec) -> Result<KeyDerivation> {
    let Some(indices) = spec.resolve(table) else {
        let requested = match spec {
            KeySpec::Column(c) => vec![c.clone()],
            KeySpec::Columns(cols) => cols.clone(),
            KeySpec::AllExcept(c) => vec![format!("* except {c}")],
        };
        tracing::warn!(
            ?requested,
            rows = table.len(),
            "key columns not found in table, using row positions"
        );
        return Ok(KeyDerivation {
            keys: (0..table.len()).map(|i| RecordKey(i.to_string())).collect(),
            fallback: Some(KeyFallback { requested }),
        });
    };

    let composite = spec.is_composite();
    let mut keys = Vec::with_capacity(table.len());
    for (row_index, row) in table.rows().iter().enumerate() {
        let mut fragments = Vec::with_capacity(indices.len());
        for &col in &indices {
            let cell = row.get(col).ok_or_else(|| Error::KeyComputation {
                row: row_index,
                reason: format!(
                    "row has {} cells but key column '{}' is at position {}",
                    row.len(),
                    table.columns()[col],
                    col
                ),
            })?;
            if composite && cell.is_blank() {
                fragments.push(NULL_TOKEN.to_string());
            } else {
                fragments.push(cell.as_key_string());
            }
        }
        keys.push(RecordKey(fragments.join(KEY_SEPARATOR)));
    }

    Ok(KeyDerivation {
        keys,
        fallback: None,
    })
}
