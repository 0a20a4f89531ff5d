//! Sync trigger routes.

use axum::{
    extract::{Path, Query, State},
    routing::post,
    Json, Router,
};

use crate::auth::TriggerAuth;
use crate::error::Result;
use crate::handlers::{handle_sync_all, handle_sync_one, handle_sync_weekly, WindowRequest};
use crate::runner::{BatchSummary, RunSummary};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync", post(sync_all_handler))
        .route("/sync/weekly", post(sync_weekly_handler))
        .route("/sync/{export}", post(sync_one_handler))
}

fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

/// POST /sync - Run every enabled export.
async fn sync_all_handler(
    State(state): State<AppState>,
    _auth: TriggerAuth,
    Query(query): Query<WindowRequest>,
    body: Option<Json<WindowRequest>>,
) -> Result<Json<BatchSummary>> {
    let request = body.map(|Json(b)| b).unwrap_or_default().or(query);
    let window = request.resolve(today())?;
    Ok(Json(handle_sync_all(&state.scheduler, window).await))
}

/// POST /sync/weekly - Run every enabled export over the last seven days.
async fn sync_weekly_handler(
    State(state): State<AppState>,
    _auth: TriggerAuth,
) -> Json<BatchSummary> {
    Json(handle_sync_weekly(&state.scheduler, today()).await)
}

/// POST /sync/{export} - Run one export.
async fn sync_one_handler(
    State(state): State<AppState>,
    _auth: TriggerAuth,
    Path(export): Path<String>,
    Query(query): Query<WindowRequest>,
    body: Option<Json<WindowRequest>>,
) -> Result<Json<RunSummary>> {
    let request = body.map(|Json(b)| b).unwrap_or_default().or(query);
    let window = request.resolve(today())?;
    Ok(Json(handle_sync_one(&state.scheduler, &export, window).await?))
}
