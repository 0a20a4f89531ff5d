//! Sheetsync Server - runs incremental export syncs and exposes an HTTP
//! trigger surface.
//!
//! Each run extracts a batch from a [`source::Source`], reads the sink
//! snapshot, lets `sheetsync-engine` plan the minimal mutation, and applies
//! it through [`executor::SyncExecutor`] with retry and backoff.

pub mod auth;
pub mod config;
pub mod error;
pub mod executor;
pub mod exports;
pub mod handlers;
pub mod history;
pub mod notifier;
pub mod retry;
pub mod routes;
pub mod runner;
pub mod sink;
pub mod source;

use crate::config::{Config, ConfigError};
use crate::executor::SyncExecutor;
use crate::exports::ExportCatalog;
use crate::history::RunHistory;
use crate::runner::{BatchScheduler, SyncRunner};
use crate::sink::{JsonFileSinkProvider, MemorySink};
use crate::source::ExportFileSource;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub scheduler: Arc<BatchScheduler>,
}

impl AppState {
    pub fn new(config: Config, scheduler: BatchScheduler) -> Self {
        Self {
            config: Arc::new(config),
            scheduler: Arc::new(scheduler),
        }
    }

    /// Wire the file-backed source and sinks described by `config`.
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let catalog = Arc::new(ExportCatalog::load(&config)?);
        let runner = SyncRunner::new(
            Arc::new(ExportFileSource::new(&config.downloads_dir)),
            Arc::new(JsonFileSinkProvider::new(
                &config.data_dir,
                MemorySink::DEFAULT_MAX_ROWS,
            )),
            SyncExecutor::from_config(&config),
            notifier::from_config(&config),
            RunHistory::new(config.run_history_limit),
        );
        let scheduler = BatchScheduler::new(Arc::new(runner), catalog);
        Ok(Self::new(config, scheduler))
    }
}

/// Build the router with tracing and CORS layers.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
