use std::sync::Arc;

use serde::Serialize;

use crate::models::DecisionSummary;
use crate::pipeline::orchestrator::{DecisionPipeline, DecisionStore};

/// Shared state for all handlers: the pipeline and the store it persists to.
#[derive(Clone)]
pub struct AppContext {
    pub pipeline: Arc<DecisionPipeline>,
    pub store: Arc<dyn DecisionStore>,
}

impl AppContext {
    pub fn new(pipeline: DecisionPipeline, store: Arc<dyn DecisionStore>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            store,
        }
    }
}

/// `GET /` and `GET /health` body.
#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub service: &'static str,
    pub version: &'static str,
    pub status: &'static str,
}

/// `GET /api/decisions` body.
#[derive(Debug, Serialize)]
pub struct DecisionList {
    pub decisions: Vec<DecisionSummary>,
}
