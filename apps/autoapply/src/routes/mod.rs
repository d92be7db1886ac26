pub mod applications;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health::service_info))
        .route("/health", get(health::health_handler))
        .route(
            "/api/applications",
            get(applications::list_applications).post(applications::create_application),
        )
        .route("/api/applications/batch", post(applications::create_batch))
        .route("/api/applications/stats", get(applications::stats))
        .route("/api/applications/runs", get(applications::list_runs))
        .route("/api/applications/process", post(applications::process))
        .route(
            "/api/applications/process/status",
            get(applications::process_status),
        )
        .route("/api/applications/:id", get(applications::get_application))
        .route("/api/applications/:id/retry", post(applications::retry))
        .with_state(state)
}
