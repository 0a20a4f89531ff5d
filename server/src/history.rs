//! Bounded in-memory history of run summaries.

use crate::runner::RunSummary;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Recent runs keyed by run id. Oldest entries are evicted past `limit`.
#[derive(Debug, Clone)]
pub struct RunHistory {
    runs: Arc<DashMap<Uuid, RunSummary>>,
    limit: usize,
}

impl RunHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            runs: Arc::new(DashMap::new()),
            limit: limit.max(1),
        }
    }

    pub fn record(&self, summary: RunSummary) {
        self.runs.insert(summary.run_id, summary);
        while self.runs.len() > self.limit {
            let oldest = self
                .runs
                .iter()
                .min_by_key(|entry| (entry.started_at, entry.run_id))
                .map(|entry| *entry.key());
            match oldest {
                Some(id) => {
                    self.runs.remove(&id);
                }
                None => break,
            }
        }
    }

    pub fn get(&self, run_id: &Uuid) -> Option<RunSummary> {
        self.runs.get(run_id).map(|entry| entry.value().clone())
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<RunSummary> {
        let mut runs: Vec<RunSummary> = self.runs.iter().map(|e| e.value().clone()).collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
