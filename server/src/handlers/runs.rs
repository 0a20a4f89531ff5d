//! Run history handlers.

use crate::error::{AppError, Result};
use crate::history::RunHistory;
use crate::runner::RunSummary;
use serde::Deserialize;
use uuid::Uuid;

/// Query for listing runs.
#[derive(Debug, Default, Deserialize)]
pub struct RunsQuery {
    /// Maximum summaries to return
    pub limit: Option<usize>,
}

/// Recent runs, newest first.
pub fn handle_list_runs(history: &RunHistory, query: RunsQuery) -> Vec<RunSummary> {
    let mut runs = history.recent();
    if let Some(limit) = query.limit {
        runs.truncate(limit);
    }
    runs
}

/// One run by id.
pub fn handle_get_run(history: &RunHistory, run_id: &str) -> Result<RunSummary> {
    let id = Uuid::parse_str(run_id)
        .map_err(|_| AppError::BadRequest(format!("invalid run id '{run_id}'")))?;
    history
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("run {id}")))
}
