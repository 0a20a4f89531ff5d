//! Sources produce the incoming batch for a date window.

use crate::error::ExtractionError;
use crate::exports::ExportDefinition;
use async_trait::async_trait;
use chrono::{DateTime, Days, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sheetsync_engine::{Cell, ColumnName, Row, Table};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Inclusive range of days an export covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Returns `None` when `start` is after `end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    /// The day before `today`, the default daily window.
    pub fn yesterday(today: NaiveDate) -> Self {
        Self::single(today.checked_sub_days(Days::new(1)).unwrap_or(today))
    }

    /// The `days` full days before `today`.
    pub fn last_days(today: NaiveDate, days: u64) -> Self {
        let end = today.checked_sub_days(Days::new(1)).unwrap_or(today);
        let start = end
            .checked_sub_days(Days::new(days.saturating_sub(1)))
            .unwrap_or(end);
        Self { start, end }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{} to {}", self.start, self.end)
        }
    }
}

/// Produces the incoming table of one export.
#[async_trait]
pub trait Source: Send + Sync {
    async fn fetch(
        &self,
        export: &ExportDefinition,
        window: &DateWindow,
    ) -> Result<Table, ExtractionError>;
}

/// Reads the newest downloaded export file for each export.
///
/// Files are JSON, either a table document (`{"columns": [...], "rows":
/// [...]}`) or an array of flat records.
#[derive(Debug, Clone)]
pub struct ExportFileSource {
    downloads_dir: PathBuf,
}

impl ExportFileSource {
    pub fn new(downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            downloads_dir: downloads_dir.into(),
        }
    }

    /// Most recently modified `<prefix>*.json` in the downloads directory,
    /// with its modification time.
    pub async fn latest_file(
        &self,
        prefix: &str,
    ) -> Result<(SystemTime, PathBuf), ExtractionError> {
        let mut entries = match tokio::fs::read_dir(&self.downloads_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExtractionError::NotFound(prefix.to_string()))
            }
            Err(e) => return Err(ExtractionError::Io(e.to_string())),
        };

        let mut newest: Option<(SystemTime, PathBuf)> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ExtractionError::Io(e.to_string()))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(prefix) || !name.ends_with(".json") {
                continue;
            }
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .map_err(|e| ExtractionError::Io(e.to_string()))?;
            if newest.as_ref().map_or(true, |(time, _)| modified > *time) {
                newest = Some((modified, entry.path()));
            }
        }

        newest.ok_or_else(|| ExtractionError::NotFound(prefix.to_string()))
    }
}

#[async_trait]
impl Source for ExportFileSource {
    async fn fetch(
        &self,
        export: &ExportDefinition,
        window: &DateWindow,
    ) -> Result<Table, ExtractionError> {
        let (modified, path) = self.latest_file(&export.file_prefix).await?;
        tracing::debug!(
            export = %export.kind,
            %window,
            path = %path.display(),
            "Reading export file"
        );
        if predates_window(modified, window) {
            tracing::warn!(
                export = %export.kind,
                %window,
                path = %path.display(),
                "Export file was written before the window ended, it may be stale"
            );
        }

        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ExtractionError::Io(e.to_string()))?;
        parse_export(&json, &path)
    }
}

/// Whether a file modified at `modified` (local time) is older than the last
/// day of `window`.
pub fn predates_window(modified: SystemTime, window: &DateWindow) -> bool {
    DateTime::<Local>::from(modified).date_naive() < window.end
}

/// Parse a downloaded export into a table.
pub fn parse_export(json: &str, path: &Path) -> Result<Table, ExtractionError> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| ExtractionError::Parse(e.to_string()))?;

    let table = match value {
        Value::Object(map) if map.contains_key("columns") => {
            let table: Table = serde_json::from_value(Value::Object(map))
                .map_err(|e| ExtractionError::Parse(e.to_string()))?;
            table.normalized()
        }
        Value::Array(records) => table_from_records(records)?,
        _ => {
            return Err(ExtractionError::Parse(format!(
                "{}: expected a table document or an array of records",
                path.display()
            )))
        }
    };

    if !table.has_header() {
        return Err(ExtractionError::NoHeader(path.display().to_string()));
    }
    Ok(table)
}

/// Columns in first-seen order; missing fields become empty cells.
fn table_from_records(records: Vec<Value>) -> Result<Table, ExtractionError> {
    let mut columns: Vec<ColumnName> = Vec::new();
    let mut objects = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let Value::Object(map) = record else {
            return Err(ExtractionError::Parse(format!("record {index} is not an object")));
        };
        for key in map.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
        objects.push(map);
    }

    let rows = objects
        .into_iter()
        .map(|mut map| {
            columns
                .iter()
                .map(|c| map.remove(c).map(Cell::from).unwrap_or_default())
                .collect::<Row>()
        })
        .collect();

    Table::with_rows(columns, rows).map_err(|e| ExtractionError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exports::ExportKind;
    use sheetsync_engine::DuplicatePolicy;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn windows() {
        let today = day("2024-03-01");
        assert_eq!(DateWindow::yesterday(today), DateWindow::single(day("2024-02-29")));

        let week = DateWindow::last_days(today, 7);
        assert_eq!(week.start, day("2024-02-23"));
        assert_eq!(week.end, day("2024-02-29"));
        assert_eq!(week.days(), 7);
        assert_eq!(week.to_string(), "2024-02-23 to 2024-02-29");

        assert!(DateWindow::new(day("2024-02-02"), day("2024-02-01")).is_none());
    }

    #[test]
    fn stale_files_predate_the_window() {
        let noon = |s: &str| {
            let local = day(s)
                .and_hms_opt(12, 0, 0)
                .unwrap()
                .and_local_timezone(Local)
                .unwrap();
            SystemTime::from(local)
        };
        let window = DateWindow::new(day("2024-03-01"), day("2024-03-03")).unwrap();

        assert!(predates_window(noon("2024-03-02"), &window));
        assert!(!predates_window(noon("2024-03-03"), &window));
        assert!(!predates_window(noon("2024-03-04"), &window));
    }

    #[test]
    fn parses_record_arrays() {
        let json = r#"[
            {"Transaksi ID": "T1", "amount": 10},
            {"Transaksi ID": "T2", "amount": null, "note": "late"}
        ]"#;
        let table = parse_export(json, Path::new("x.json")).unwrap();
        assert_eq!(table.columns(), &["Transaksi ID", "amount", "note"]);
        assert_eq!(table.get(0, "note"), Some(&Cell::Empty));
        assert_eq!(table.get(1, "amount"), Some(&Cell::Empty));
    }

    #[test]
    fn rejects_headerless_exports() {
        let err = parse_export("[]", Path::new("empty.json")).unwrap_err();
        assert!(matches!(err, ExtractionError::NoHeader(_)));

        let err = parse_export(r#"{"columns": []}"#, Path::new("t.json")).unwrap_err();
        assert!(matches!(err, ExtractionError::NoHeader(_)));

        let err = parse_export("42", Path::new("n.json")).unwrap_err();
        assert!(matches!(err, ExtractionError::Parse(_)));
    }

    #[tokio::test]
    async fn picks_newest_matching_file() {
        let dir = tempfile::tempdir().unwrap();
        let older = dir.path().join("export_user_old.json");
        let newer = dir.path().join("export_user_new.json");
        tokio::fs::write(&older, r#"[{"User ID": "old"}]"#).await.unwrap();
        tokio::fs::write(dir.path().join("export_transaksi.json"), "[]").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tokio::fs::write(&newer, r#"[{"User ID": "new"}]"#).await.unwrap();

        let source = ExportFileSource::new(dir.path());
        let export = ExportKind::User.definition(DuplicatePolicy::Skip);
        let table = source
            .fetch(&export, &DateWindow::single(day("2024-01-01")))
            .await
            .unwrap();
        assert_eq!(table.get(0, "User ID").unwrap().as_key_string(), "new");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = ExportFileSource::new(dir.path());
        let export = ExportKind::Transaksi.definition(DuplicatePolicy::Skip);
        let err = source
            .fetch(&export, &DateWindow::single(day("2024-01-01")))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::NotFound(p) if p == "export_transaksi"));
    }
}
