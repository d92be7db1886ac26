use std::sync::Arc;

use crate::pipeline::{ApplicationStore, Orchestrator};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ApplicationStore>,
    pub orchestrator: Orchestrator,
}
