//! Tabular data model shared by sources, sinks and the diff engine.
//!
//! A [`Table`] is a header plus rows of [`Cell`]s aligned with it. Column
//! order is kept for output but never participates in identity or
//! comparison.

use crate::{error::Result, ColumnName, Error};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

/// A single scalar value.
///
/// Non-finite floats never survive construction: they become [`Cell::Empty`],
/// which keeps every table JSON-safe.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
}

impl Cell {
    /// Build a float cell, normalizing NaN and infinities to empty.
    pub fn float(value: f64) -> Self {
        if value.is_finite() {
            Cell::Float(value)
        } else {
            Cell::Empty
        }
    }

    /// True for [`Cell::Empty`] and for empty text.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Stringified form used for identity and content comparison.
    ///
    /// Floats use shortest round-trip formatting, so `100.0` renders as
    /// `"100"` and matches an integer `100` read back from a sheet.
    pub fn as_key_string(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => f.to_string(),
        }
    }

    /// Re-apply the JSON-safety normalization (for deserialized data).
    pub fn normalized(self) -> Self {
        match self {
            Cell::Float(f) => Cell::float(f),
            other => other,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key_string())
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(value.to_string())
        }
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        if value.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(value)
        }
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::float(value)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Empty)
    }
}

impl From<serde_json::Value> for Cell {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Cell::Empty,
            serde_json::Value::Bool(b) => Cell::Text(b.to_string()),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Cell::Int(i)
                } else {
                    n.as_f64().map(Cell::float).unwrap_or(Cell::Empty)
                }
            }
            serde_json::Value::String(s) => Cell::from(s),
            // Nested values have no cell representation; keep their text.
            other => Cell::Text(other.to_string()),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Cell::Empty => serializer.serialize_str(""),
            Cell::Text(s) => serializer.serialize_str(s),
            Cell::Int(i) => serializer.serialize_i64(*i),
            Cell::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Cell::Float(_) => serializer.serialize_str(""),
        }
    }
}

impl<'de> Deserialize<'de> for Cell {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Cell::from)
    }
}

/// One row of cells, positionally aligned with its table's header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(pub Vec<Cell>);

impl Row {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self(cells)
    }

    pub fn cells(&self) -> &[Cell] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&Cell> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<C: Into<Cell>> FromIterator<C> for Row {
    fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// An ordered sequence of rows sharing one header.
///
/// Constructors check row width. Deserialization does not, so a table read
/// from an external sink may carry ragged rows; see [`Table::validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<ColumnName>,
    #[serde(default)]
    rows: Vec<Row>,
}

impl Table {
    /// Create an empty table with the given header.
    pub fn new(columns: Vec<ColumnName>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(Error::DuplicateColumn(column.clone()));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    /// Create a table and validate every row against the header.
    pub fn with_rows(columns: Vec<ColumnName>, rows: Vec<Row>) -> Result<Self> {
        let mut table = Self::new(columns)?;
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Build a table from string literals; empty strings become [`Cell::Empty`].
    pub fn from_text(columns: &[&str], rows: &[&[&str]]) -> Result<Self> {
        Self::with_rows(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter().map(|r| r.iter().copied().collect()).collect(),
        )
    }

    /// Append a row, rejecting width mismatches.
    pub fn push_row(&mut self, row: Row) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::RowWidthMismatch {
                row: self.rows.len(),
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[ColumnName] {
        &self.columns
    }

    /// Whether the table has at least one column.
    ///
    /// A headerless table is what a failed extraction looks like; a table
    /// with a header and no rows is a valid empty result.
    pub fn has_header(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Cell at (row, column name).
    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let col = self.column_index(column)?;
        self.rows.get(row)?.get(col)
    }

    /// A row as ordered `(column, cell)` pairs.
    pub fn row_map(&self, index: usize) -> Option<Vec<(&str, &Cell)>> {
        let row = self.rows.get(index)?;
        Some(
            self.columns
                .iter()
                .map(String::as_str)
                .zip(row.cells().iter())
                .collect(),
        )
    }

    /// Subset of rows by index, preserving the given order.
    ///
    /// Out-of-range indices are ignored.
    pub fn select(&self, indices: &[usize]) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }

    /// Re-align rows onto another header.
    ///
    /// Target columns absent from this table become empty cells; columns of
    /// this table absent from the target are dropped (see
    /// [`Table::columns_missing_from`]).
    pub fn project(&self, target: &[ColumnName]) -> Table {
        let mapping: Vec<Option<usize>> = target.iter().map(|c| self.column_index(c)).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                mapping
                    .iter()
                    .map(|idx| idx.and_then(|i| row.get(i).cloned()).unwrap_or_default())
                    .collect::<Vec<Cell>>()
            })
            .map(Row::new)
            .collect();
        Table {
            columns: target.to_vec(),
            rows,
        }
    }

    /// Row `index` re-aligned onto `target`, keeping `base` cells for the
    /// target columns this table lacks.
    ///
    /// `base` is the existing row under the `target` header.
    pub fn overlay_row(&self, index: usize, base: &Row, target: &[ColumnName]) -> Option<Row> {
        let row = self.rows.get(index)?;
        let cells = target
            .iter()
            .enumerate()
            .map(|(position, column)| match self.column_index(column) {
                Some(i) => row.get(i).cloned().unwrap_or_default(),
                None => base.get(position).cloned().unwrap_or_default(),
            })
            .collect();
        Some(Row::new(cells))
    }

    /// Columns of this table that `target` does not have.
    pub fn columns_missing_from<'a>(&'a self, target: &[ColumnName]) -> Vec<&'a str> {
        self.columns
            .iter()
            .filter(|c| !target.contains(c))
            .map(String::as_str)
            .collect()
    }

    /// Check that every row matches the header width.
    pub fn validate(&self) -> Result<()> {
        for (index, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(Error::RowWidthMismatch {
                    row: index,
                    expected: self.columns.len(),
                    got: row.len(),
                });
            }
        }
        Ok(())
    }

    /// Replace every non-finite float with an empty cell.
    pub fn normalized(self) -> Table {
        Table {
            columns: self.columns,
            rows: self
                .rows
                .into_iter()
                .map(|row| Row(row.0.into_iter().map(Cell::normalized).collect()))
                .collect(),
        }
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let table: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidTable(e.to_string()))?;
        Ok(table.normalized())
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidTable(e.to_string()))
    }
}
