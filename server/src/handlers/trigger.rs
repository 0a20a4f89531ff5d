//! Trigger handlers - start sync runs for a date window.

use crate::error::{AppError, Result};
use crate::exports::ExportKind;
use crate::runner::{BatchScheduler, BatchSummary, RunSummary};
use crate::source::DateWindow;
use chrono::NaiveDate;
use serde::Deserialize;

/// Optional window for a trigger, from the query string or a JSON body.
///
/// Both dates missing means yesterday, or the last `days` days when set.
/// One date alone is a single day.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct WindowRequest {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub days: Option<u64>,
}

impl WindowRequest {
    /// Fields of `other` fill the gaps left in `self`.
    pub fn or(self, other: WindowRequest) -> WindowRequest {
        WindowRequest {
            start: self.start.or(other.start),
            end: self.end.or(other.end),
            days: self.days.or(other.days),
        }
    }

    pub fn resolve(self, today: NaiveDate) -> Result<DateWindow> {
        if let Some(days) = self.days {
            if self.start.is_some() || self.end.is_some() {
                return Err(AppError::BadRequest(
                    "days cannot be combined with start or end".into(),
                ));
            }
            if days == 0 {
                return Err(AppError::BadRequest("days must be at least 1".into()));
            }
            return Ok(DateWindow::last_days(today, days));
        }
        match (self.start, self.end) {
            (None, None) => Ok(DateWindow::yesterday(today)),
            (Some(day), None) | (None, Some(day)) => Ok(DateWindow::single(day)),
            (Some(start), Some(end)) => DateWindow::new(start, end).ok_or_else(|| {
                AppError::BadRequest(format!("start {start} is after end {end}"))
            }),
        }
    }
}

/// Run every enabled export.
pub async fn handle_sync_all(scheduler: &BatchScheduler, window: DateWindow) -> BatchSummary {
    scheduler.run_all(window).await
}

/// Run every enabled export over the last week.
pub async fn handle_sync_weekly(scheduler: &BatchScheduler, today: NaiveDate) -> BatchSummary {
    scheduler.run_weekly(today).await
}

/// Run one export by name.
pub async fn handle_sync_one(
    scheduler: &BatchScheduler,
    export: &str,
    window: DateWindow,
) -> Result<RunSummary> {
    let kind: ExportKind = export
        .parse()
        .map_err(|_| AppError::NotFound(format!("unknown export '{export}'")))?;
    let definition = scheduler
        .catalog()
        .get(kind)
        .ok_or_else(|| AppError::NotFound(format!("export '{kind}' is not enabled")))?;
    Ok(scheduler.runner().run(definition, window).await)
}
