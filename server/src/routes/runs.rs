//! Run history routes.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};

use crate::error::Result;
use crate::handlers::{handle_get_run, handle_list_runs, RunsQuery};
use crate::runner::RunSummary;
use crate::AppState;

/// Create run history routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/runs", get(list_handler))
        .route("/runs/{id}", get(get_handler))
}

/// GET /runs - Recent runs, newest first.
async fn list_handler(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> Json<Vec<RunSummary>> {
    Json(handle_list_runs(state.scheduler.runner().history(), query))
}

/// GET /runs/{id} - One run.
async fn get_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RunSummary>> {
    Ok(Json(handle_get_run(state.scheduler.runner().history(), &id)?))
}
