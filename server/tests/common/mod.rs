//! Shared fixtures for server integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use sheetsync_engine::{ColumnName, Row, Table};
use sheetsync_server::error::{ExtractionError, NotifyError, SinkError};
use sheetsync_server::exports::ExportDefinition;
use sheetsync_server::notifier::Notifier;
use sheetsync_server::retry::RetryPolicy;
use sheetsync_server::runner::{BatchSummary, RunSummary};
use sheetsync_server::sink::{MemorySink, Sink, SinkCapacity, SinkProvider};
use sheetsync_server::source::{DateWindow, Source};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn id_amount(rows: &[&[&str]]) -> Table {
    Table::from_text(&["ID", "amount"], rows).unwrap()
}

/// Deterministic policy: no jitter, 100ms base, 10ms rate limit.
pub fn test_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(100),
        multiplier: 2.0,
        max_delay: Duration::from_secs(30),
        jitter: false,
        min_call_interval: Duration::from_millis(10),
    }
}

pub fn day(s: &str) -> chrono::NaiveDate {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// A [`MemorySink`] with scripted failures.
#[derive(Clone, Default)]
pub struct FlakySink {
    pub inner: MemorySink,
    append_failures: Arc<Mutex<VecDeque<SinkError>>>,
    patch_failures: Arc<Mutex<VecDeque<SinkError>>>,
    read_failures: Arc<Mutex<VecDeque<SinkError>>>,
    growth_error: Arc<Mutex<Option<SinkError>>>,
    pub append_calls: Arc<AtomicUsize>,
    pub patch_calls: Arc<AtomicUsize>,
}

impl FlakySink {
    pub fn new(inner: MemorySink) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn fail_appends(&self, errors: impl IntoIterator<Item = SinkError>) {
        self.append_failures.lock().unwrap().extend(errors);
    }

    pub fn fail_patches(&self, errors: impl IntoIterator<Item = SinkError>) {
        self.patch_failures.lock().unwrap().extend(errors);
    }

    pub fn fail_reads(&self, errors: impl IntoIterator<Item = SinkError>) {
        self.read_failures.lock().unwrap().extend(errors);
    }

    pub fn fail_growth(&self, error: SinkError) {
        *self.growth_error.lock().unwrap() = Some(error);
    }

    fn next(queue: &Mutex<VecDeque<SinkError>>) -> Result<(), SinkError> {
        match queue.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Sink for FlakySink {
    async fn read_all(&self) -> Result<Table, SinkError> {
        Self::next(&self.read_failures)?;
        self.inner.read_all().await
    }

    async fn write_header(&self, columns: &[ColumnName]) -> Result<(), SinkError> {
        self.inner.write_header(columns).await
    }

    async fn append(&self, start_row: usize, rows: &Table) -> Result<(), SinkError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.append_failures)?;
        self.inner.append(start_row, rows).await
    }

    async fn patch_row(&self, row_number: usize, row: &Row) -> Result<(), SinkError> {
        self.patch_calls.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.patch_failures)?;
        self.inner.patch_row(row_number, row).await
    }

    async fn capacity(&self) -> Result<SinkCapacity, SinkError> {
        self.inner.capacity().await
    }

    async fn ensure_capacity(&self, rows: usize) -> Result<(), SinkError> {
        let scripted = self.growth_error.lock().unwrap().clone();
        match scripted {
            Some(err) => Err(err),
            None => self.inner.ensure_capacity(rows).await,
        }
    }
}

/// Serves pre-built sinks by sheet name.
#[derive(Clone, Default)]
pub struct FixedSinks {
    sinks: Arc<Mutex<HashMap<String, FlakySink>>>,
}

impl FixedSinks {
    pub fn insert(&self, sheet: &str, sink: FlakySink) {
        self.sinks.lock().unwrap().insert(sheet.to_string(), sink);
    }

    pub fn get(&self, sheet: &str) -> FlakySink {
        self.sinks
            .lock()
            .unwrap()
            .entry(sheet.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl SinkProvider for FixedSinks {
    async fn open(&self, export: &ExportDefinition) -> Result<Arc<dyn Sink>, SinkError> {
        Ok(Arc::new(self.get(&export.sheet_name)))
    }
}

/// Returns a fixed result per export prefix.
#[derive(Clone, Default)]
pub struct StaticSource {
    tables: Arc<Mutex<HashMap<String, Result<Table, ExtractionError>>>>,
    pub fetches: Arc<AtomicUsize>,
}

impl StaticSource {
    pub fn with(self, export: &ExportDefinition, result: Result<Table, ExtractionError>) -> Self {
        self.tables
            .lock()
            .unwrap()
            .insert(export.file_prefix.clone(), result);
        self
    }
}

#[async_trait]
impl Source for StaticSource {
    async fn fetch(
        &self,
        export: &ExportDefinition,
        _window: &DateWindow,
    ) -> Result<Table, ExtractionError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.tables
            .lock()
            .unwrap()
            .get(&export.file_prefix)
            .cloned()
            .unwrap_or_else(|| Err(ExtractionError::NotFound(export.file_prefix.clone())))
    }
}

/// Collects notifications for assertions.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub runs: Arc<Mutex<Vec<RunSummary>>>,
    pub batches: Arc<Mutex<Vec<BatchSummary>>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn run_finished(&self, summary: &RunSummary) -> Result<(), NotifyError> {
        self.runs.lock().unwrap().push(summary.clone());
        Ok(())
    }

    async fn batch_finished(&self, summary: &BatchSummary) -> Result<(), NotifyError> {
        self.batches.lock().unwrap().push(summary.clone());
        Ok(())
    }
}
