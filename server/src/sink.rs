//! Sink collaborators: where synced rows are stored.
//!
//! A sink behaves like one spreadsheet tab: row 1 is the header, data rows
//! follow in order, and the last occupied row defines where appends start.

use crate::error::{SinkError, SinkErrorKind};
use crate::exports::ExportDefinition;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sheetsync_engine::{ColumnName, Row, Table, HEADER_ROWS};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Row capacity of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkCapacity {
    /// Rows currently allocated, header included
    pub rows: usize,
    /// Hard maximum the sink can grow to
    pub max_rows: usize,
}

/// Storage for synced rows.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Full current content; an empty table if the sink is blank.
    async fn read_all(&self) -> Result<Table, SinkError>;

    /// Write the header into row 1.
    async fn write_header(&self, columns: &[ColumnName]) -> Result<(), SinkError>;

    /// Write `rows` starting at sheet row `start_row` (1-based).
    async fn append(&self, start_row: usize, rows: &Table) -> Result<(), SinkError>;

    /// Overwrite one existing data row in place.
    async fn patch_row(&self, row_number: usize, row: &Row) -> Result<(), SinkError>;

    /// Current row capacity.
    async fn capacity(&self) -> Result<SinkCapacity, SinkError>;

    /// Grow to hold at least `rows` rows. Best effort.
    async fn ensure_capacity(&self, rows: usize) -> Result<(), SinkError>;
}

/// Opens the sink behind an export.
#[async_trait]
pub trait SinkProvider: Send + Sync {
    async fn open(&self, export: &ExportDefinition) -> Result<Arc<dyn Sink>, SinkError>;
}

/// Sheet-shaped content shared by the local sinks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetState {
    pub columns: Vec<ColumnName>,
    pub rows: Vec<Row>,
    pub capacity: usize,
}

impl SheetState {
    fn to_table(&self) -> Result<Table, SinkError> {
        if self.columns.is_empty() {
            return Ok(Table::default());
        }
        Table::with_rows(self.columns.clone(), self.rows.clone())
            .map_err(|e| SinkError::new(SinkErrorKind::InvalidData, e.to_string()))
    }

    fn write_header(&mut self, columns: &[ColumnName]) {
        self.columns = columns.to_vec();
    }

    fn append(&mut self, start_row: usize, rows: &Table, max_rows: usize) -> Result<(), SinkError> {
        let first_index = start_row
            .checked_sub(HEADER_ROWS + 1)
            .ok_or_else(|| invalid_row(start_row))?;
        if first_index > self.rows.len() {
            return Err(SinkError::new(
                SinkErrorKind::InvalidData,
                format!(
                    "append at row {start_row} would leave a gap after row {}",
                    self.rows.len() + HEADER_ROWS
                ),
            ));
        }
        let last_row = start_row + rows.len().saturating_sub(1);
        if last_row > max_rows {
            return Err(SinkError::new(
                SinkErrorKind::InvalidData,
                format!("row {last_row} exceeds the sheet limit of {max_rows} rows"),
            ));
        }
        for (offset, row) in rows.rows().iter().enumerate() {
            let index = first_index + offset;
            if index < self.rows.len() {
                self.rows[index] = row.clone();
            } else {
                self.rows.push(row.clone());
            }
        }
        self.capacity = self.capacity.max(last_row);
        Ok(())
    }

    fn patch_row(&mut self, row_number: usize, row: &Row) -> Result<(), SinkError> {
        let index = row_number
            .checked_sub(HEADER_ROWS + 1)
            .ok_or_else(|| invalid_row(row_number))?;
        let slot = self.rows.get_mut(index).ok_or_else(|| invalid_row(row_number))?;
        *slot = row.clone();
        Ok(())
    }
}

fn invalid_row(row_number: usize) -> SinkError {
    SinkError::new(
        SinkErrorKind::InvalidData,
        format!("row {row_number} is outside the data range"),
    )
}

/// In-process sink with spreadsheet-like capacity limits.
#[derive(Debug, Clone)]
pub struct MemorySink {
    state: Arc<Mutex<SheetState>>,
    max_rows: usize,
}

impl MemorySink {
    /// Default initial row allocation, as a fresh spreadsheet tab has.
    pub const DEFAULT_CAPACITY: usize = 1000;
    /// Default hard maximum.
    pub const DEFAULT_MAX_ROWS: usize = 1_000_000;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY, Self::DEFAULT_MAX_ROWS)
    }

    pub fn with_capacity(capacity: usize, max_rows: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SheetState {
                capacity,
                ..SheetState::default()
            })),
            max_rows,
        }
    }

    /// Sink pre-filled with `table`.
    pub fn with_table(table: &Table) -> Self {
        Self {
            state: Arc::new(Mutex::new(SheetState {
                columns: table.columns().to_vec(),
                rows: table.rows().to_vec(),
                capacity: Self::DEFAULT_CAPACITY.max(table.len() + HEADER_ROWS),
            })),
            max_rows: Self::DEFAULT_MAX_ROWS,
        }
    }

    /// Copy of the current content.
    pub async fn state(&self) -> SheetState {
        self.state.lock().await.clone()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn read_all(&self) -> Result<Table, SinkError> {
        self.state.lock().await.to_table()
    }

    async fn write_header(&self, columns: &[ColumnName]) -> Result<(), SinkError> {
        self.state.lock().await.write_header(columns);
        Ok(())
    }

    async fn append(&self, start_row: usize, rows: &Table) -> Result<(), SinkError> {
        self.state.lock().await.append(start_row, rows, self.max_rows)
    }

    async fn patch_row(&self, row_number: usize, row: &Row) -> Result<(), SinkError> {
        self.state.lock().await.patch_row(row_number, row)
    }

    async fn capacity(&self) -> Result<SinkCapacity, SinkError> {
        Ok(SinkCapacity {
            rows: self.state.lock().await.capacity,
            max_rows: self.max_rows,
        })
    }

    async fn ensure_capacity(&self, rows: usize) -> Result<(), SinkError> {
        if rows > self.max_rows {
            return Err(SinkError::new(
                SinkErrorKind::InvalidData,
                format!("cannot grow to {rows} rows, limit is {}", self.max_rows),
            ));
        }
        let mut state = self.state.lock().await;
        state.capacity = state.capacity.max(rows);
        Ok(())
    }
}

/// A sheet persisted as a JSON document on disk.
///
/// Every mutation rewrites the document through a temp file and rename, so
/// a crash never leaves a half-written sheet.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
    max_rows: usize,
    lock: Arc<Mutex<()>>,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>, max_rows: usize) -> Self {
        Self {
            path: path.into(),
            max_rows,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<SheetState, SinkError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => serde_json::from_str(&json)
                .map_err(|e| SinkError::new(SinkErrorKind::InvalidData, e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SheetState {
                capacity: MemorySink::DEFAULT_CAPACITY,
                ..SheetState::default()
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, state: &SheetState) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| SinkError::new(SinkErrorKind::InvalidData, e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn mutate<F>(&self, f: F) -> Result<(), SinkError>
    where
        F: FnOnce(&mut SheetState) -> Result<(), SinkError> + Send,
    {
        let _guard = self.lock.lock().await;
        let mut state = self.load().await?;
        f(&mut state)?;
        self.store(&state).await
    }
}

#[async_trait]
impl Sink for JsonFileSink {
    async fn read_all(&self) -> Result<Table, SinkError> {
        let _guard = self.lock.lock().await;
        self.load().await?.to_table()
    }

    async fn write_header(&self, columns: &[ColumnName]) -> Result<(), SinkError> {
        self.mutate(|state| {
            state.write_header(columns);
            Ok(())
        })
        .await
    }

    async fn append(&self, start_row: usize, rows: &Table) -> Result<(), SinkError> {
        let max_rows = self.max_rows;
        self.mutate(|state| state.append(start_row, rows, max_rows))
            .await
    }

    async fn patch_row(&self, row_number: usize, row: &Row) -> Result<(), SinkError> {
        self.mutate(|state| state.patch_row(row_number, row)).await
    }

    async fn capacity(&self) -> Result<SinkCapacity, SinkError> {
        let _guard = self.lock.lock().await;
        Ok(SinkCapacity {
            rows: self.load().await?.capacity,
            max_rows: self.max_rows,
        })
    }

    async fn ensure_capacity(&self, rows: usize) -> Result<(), SinkError> {
        let target = rows.min(self.max_rows);
        self.mutate(|state| {
            state.capacity = state.capacity.max(target);
            Ok(())
        })
        .await
    }
}

/// Hands out one shared [`MemorySink`] per sheet name.
#[derive(Debug, Clone, Default)]
pub struct MemorySinkProvider {
    sheets: Arc<DashMap<String, MemorySink>>,
}

impl MemorySinkProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pre-built sink for `sheet_name`.
    pub fn insert(&self, sheet_name: impl Into<String>, sink: MemorySink) {
        self.sheets.insert(sheet_name.into(), sink);
    }

    pub fn get(&self, sheet_name: &str) -> Option<MemorySink> {
        self.sheets.get(sheet_name).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl SinkProvider for MemorySinkProvider {
    async fn open(&self, export: &ExportDefinition) -> Result<Arc<dyn Sink>, SinkError> {
        let sink = self
            .sheets
            .entry(export.sheet_name.clone())
            .or_default()
            .value()
            .clone();
        Ok(Arc::new(sink))
    }
}

/// Opens one [`JsonFileSink`] per export under a data directory.
#[derive(Debug, Clone)]
pub struct JsonFileSinkProvider {
    data_dir: PathBuf,
    max_rows: usize,
}

impl JsonFileSinkProvider {
    pub fn new(data_dir: impl Into<PathBuf>, max_rows: usize) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_rows,
        }
    }
}

#[async_trait]
impl SinkProvider for JsonFileSinkProvider {
    async fn open(&self, export: &ExportDefinition) -> Result<Arc<dyn Sink>, SinkError> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let path = self.data_dir.join(format!("{}.json", export.sheet_name));
        Ok(Arc::new(JsonFileSink::new(path, self.max_rows)))
    }
}
