use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    ApplicationFilter, ApplicationPage, ApplicationRow, ApplicationStats, ApplicationStatus,
    NewApplication, RunRow,
};
use crate::models::application::{SortField, SortOrder};
use crate::state::AppState;

const MAX_BATCH: usize = 100;
const MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_PROCESS_LIMIT: u32 = 10;
const DEFAULT_RUNS_LIMIT: i64 = 20;

/// POST /api/applications
pub async fn create_application(
    State(state): State<AppState>,
    Json(req): Json<NewApplication>,
) -> Result<(StatusCode, Json<ApplicationRow>), AppError> {
    req.validate().map_err(AppError::Validation)?;
    let row = state.store.create_application(&req).await?;
    info!(application_id = %row.id, "Application queued for {}", row.job_url);
    Ok((StatusCode::CREATED, Json(row)))
}

#[derive(Deserialize)]
pub struct BatchRequest {
    pub applications: Vec<NewApplication>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchItemError {
    pub index: usize,
    pub job_url: String,
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub created: usize,
    pub errors: Vec<BatchItemError>,
}

/// POST /api/applications/batch
///
/// Items are independent: a rejected item is reported and the rest still get created.
pub async fn create_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> Result<(StatusCode, Json<BatchResponse>), AppError> {
    if req.applications.is_empty() || req.applications.len() > MAX_BATCH {
        return Err(AppError::Validation(format!(
            "applications must contain between 1 and {MAX_BATCH} items"
        )));
    }

    let mut created = 0;
    let mut errors = Vec::new();
    for (index, item) in req.applications.iter().enumerate() {
        let result = match item.validate() {
            Ok(()) => state
                .store
                .create_application(item)
                .await
                .map_err(|e| e.to_string()),
            Err(reason) => Err(reason),
        };
        match result {
            Ok(_) => created += 1,
            Err(error) => errors.push(BatchItemError {
                index,
                job_url: item.job_url.clone(),
                error,
            }),
        }
    }

    info!("Batch queued {created} application(s), {} rejected", errors.len());
    Ok((StatusCode::CREATED, Json(BatchResponse { created, errors })))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub status: Option<ApplicationStatus>,
    pub email: Option<String>,
    pub sort_by: Option<SortField>,
    pub sort_order: Option<SortOrder>,
}

impl ListQuery {
    fn into_filter(self) -> Result<ApplicationFilter, AppError> {
        let defaults = ApplicationFilter::default();
        let page = self.page.unwrap_or(defaults.page);
        let page_size = self.page_size.unwrap_or(defaults.page_size);
        if page == 0 {
            return Err(AppError::Validation("page must be at least 1".to_string()));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(AppError::Validation(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(ApplicationFilter {
            page,
            page_size,
            status: self.status,
            email: self.email.filter(|e| !e.trim().is_empty()),
            sort_by: self.sort_by.unwrap_or_default(),
            sort_order: self.sort_order.unwrap_or_default(),
        })
    }
}

/// GET /api/applications
pub async fn list_applications(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApplicationPage>, AppError> {
    let filter = query.into_filter()?;
    Ok(Json(state.store.list_applications(&filter).await?))
}

/// GET /api/applications/stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<ApplicationStats>, AppError> {
    Ok(Json(state.store.stats().await?))
}

#[derive(Deserialize)]
pub struct RunsQuery {
    pub limit: Option<i64>,
}

/// GET /api/applications/runs
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<RunRow>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_RUNS_LIMIT).clamp(1, 100);
    Ok(Json(state.store.list_runs(limit).await?))
}

/// GET /api/applications/:id
pub async fn get_application(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApplicationRow>, AppError> {
    state
        .store
        .get_application(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Application {id} not found")))
}

#[derive(Deserialize)]
pub struct ProcessQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub run_id: Uuid,
    pub processed: i32,
    pub successful: i32,
    pub failed: i32,
    pub skipped: i32,
    pub status: String,
}

impl From<RunRow> for ProcessResponse {
    fn from(run: RunRow) -> Self {
        let status = if run.total_processed == 0 {
            "no_pending".to_string()
        } else {
            run.status.to_string()
        };
        Self {
            run_id: run.id,
            processed: run.total_processed,
            successful: run.successful,
            failed: run.failed,
            skipped: run.skipped,
            status,
        }
    }
}

/// POST /api/applications/process
///
/// Runs synchronously: the response is sent once the whole batch is done.
pub async fn process(
    State(state): State<AppState>,
    Query(query): Query<ProcessQuery>,
) -> Result<Json<ProcessResponse>, AppError> {
    let limit = query
        .limit
        .unwrap_or_else(|| DEFAULT_PROCESS_LIMIT.min(state.orchestrator.max_per_run()));
    let run = state.orchestrator.run_processing(limit).await?;
    Ok(Json(run.into()))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub processing: bool,
    pub run: Option<RunRow>,
}

/// GET /api/applications/process/status
pub async fn process_status(State(state): State<AppState>) -> Result<Json<ProcessStatus>, AppError> {
    let run = state.orchestrator.current_run().await?;
    Ok(Json(ProcessStatus {
        processing: run.is_some(),
        run,
    }))
}

/// POST /api/applications/:id/retry
pub async fn retry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApplicationRow>, AppError> {
    let row = state.store.retry_application(id).await?;
    info!(application_id = %row.id, "Application returned to the queue for retry");
    Ok(Json(row))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::pipeline::memory_store::MemoryStore;
    use crate::pipeline::state_machine::sample_row;
    use crate::pipeline::testing::{static_resolver, ScriptedWorker};
    use crate::pipeline::{Orchestrator, OrchestratorSettings};
    use crate::routes::build_router;

    fn app(store: Arc<MemoryStore>) -> axum::Router {
        let orchestrator = Orchestrator::new(
            store.clone(),
            static_resolver(&["maria.pdf"]),
            Arc::new(ScriptedWorker::new(vec![])),
            OrchestratorSettings {
                max_per_run: 50,
                delay: Duration::ZERO,
                stale_grace: chrono::Duration::minutes(10),
            },
        );
        build_router(AppState {
            store,
            orchestrator,
        })
    }

    async fn send(app: axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn payload(job_url: &str, email: &str) -> Value {
        json!({
            "job_url": job_url,
            "candidate": {
                "first_name": "Maria",
                "last_name": "Rossi",
                "email": email,
                "cv_reference": "maria.pdf"
            }
        })
    }

    #[tokio::test]
    async fn test_create_then_duplicate_conflicts() {
        let store = Arc::new(MemoryStore::new());
        let body = payload("https://jobs.example.com/1", "maria@example.com");

        let (status, created) = send(app(store.clone()), "POST", "/api/applications", Some(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "pending");
        assert_eq!(created["attempts"], 0);
        assert_eq!(created["max_attempts"], 3);

        let (status, err) = send(app(store), "POST", "/api/applications", Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["error"]["code"], "DUPLICATE");
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_payload() {
        let store = Arc::new(MemoryStore::new());
        let mut body = payload("https://jobs.example.com/1", "maria@example.com");
        body["max_attempts"] = json!(11);

        let (status, err) = send(app(store), "POST", "/api/applications", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_batch_reports_per_item_errors() {
        let store = Arc::new(MemoryStore::new());
        let body = json!({
            "applications": [
                payload("https://jobs.example.com/1", "a@example.com"),
                payload("https://jobs.example.com/1", "a@example.com"),
                payload("not a url", "b@example.com"),
                payload("https://jobs.example.com/2", "b@example.com"),
            ]
        });

        let (status, response) = send(app(store), "POST", "/api/applications/batch", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(response["created"], 2);
        let indexes: Vec<u64> = response["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["index"].as_u64().unwrap())
            .collect();
        assert_eq!(indexes, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let (status, _) = send(
            app(store),
            "POST",
            "/api/applications/batch",
            Some(json!({ "applications": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..3 {
            store.insert(sample_row(3)).await;
        }
        let mut failed = sample_row(3);
        failed.status = ApplicationStatus::Failed;
        store.insert(failed).await;

        let (status, page) = send(app(store.clone()), "GET", "/api/applications?page_size=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 4);
        assert_eq!(page["total_pages"], 2);
        assert_eq!(page["applications"].as_array().unwrap().len(), 2);

        let (_, page) = send(app(store.clone()), "GET", "/api/applications?status=failed", None).await;
        assert_eq!(page["total"], 1);

        let (status, _) = send(app(store), "GET", "/api/applications?page_size=500", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_unknown_application_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let uri = format!("/api/applications/{}", Uuid::new_v4());
        let (status, err) = send(app(store), "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_process_runs_batch_and_releases_claim() {
        let store = Arc::new(MemoryStore::new());
        let row = sample_row(3);
        store.insert(row.clone()).await;

        let (status, response) = send(app(store.clone()), "POST", "/api/applications/process?limit=5", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["processed"], 1);
        assert_eq!(response["successful"], 1);
        assert_eq!(response["status"], "completed");

        let (_, status_body) = send(app(store.clone()), "GET", "/api/applications/process/status", None).await;
        assert_eq!(status_body["processing"], false);

        let (_, runs) = send(app(store.clone()), "GET", "/api/applications/runs", None).await;
        assert_eq!(runs.as_array().unwrap().len(), 1);

        let (_, stats) = send(app(store), "GET", "/api/applications/stats", None).await;
        assert_eq!(stats["successful"], 1);
        assert_eq!(stats["today_successful"], 1);
    }

    #[tokio::test]
    async fn test_process_conflicts_while_a_run_is_active() {
        let store = Arc::new(MemoryStore::new());
        store.insert_run(RunRow::new_running(chrono::Utc::now())).await;

        let (status, err) = send(app(store.clone()), "POST", "/api/applications/process", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["error"]["code"], "ALREADY_RUNNING");

        let (_, status_body) = send(app(store), "GET", "/api/applications/process/status", None).await;
        assert_eq!(status_body["processing"], true);
        assert!(status_body["run"]["id"].is_string());
    }

    #[tokio::test]
    async fn test_process_rejects_out_of_range_limit() {
        let store = Arc::new(MemoryStore::new());
        for uri in [
            "/api/applications/process?limit=0",
            "/api/applications/process?limit=51",
        ] {
            let (status, _) = send(app(store.clone()), "POST", uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
        assert!(store.runs().await.is_empty());
    }

    #[tokio::test]
    async fn test_retry_only_for_failed_records() {
        let store = Arc::new(MemoryStore::new());
        let pending = sample_row(3);
        store.insert(pending.clone()).await;
        let mut failed = sample_row(3);
        failed.status = ApplicationStatus::Failed;
        failed.attempts = 3;
        failed.error_message = Some("Submission could not be verified".to_string());
        store.insert(failed.clone()).await;

        let uri = format!("/api/applications/{}/retry", pending.id);
        let (status, _) = send(app(store.clone()), "POST", &uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let uri = format!("/api/applications/{}/retry", failed.id);
        let (status, row) = send(app(store), "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(row["status"], "pending");
        assert_eq!(row["attempts"], 2);
        assert!(row["error_message"].is_null());
    }

    #[tokio::test]
    async fn test_health_and_info() {
        let store = Arc::new(MemoryStore::new());
        let (status, body) = send(app(store.clone()), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (_, info) = send(app(store), "GET", "/", None).await;
        assert_eq!(info["service"], "autoapply");
    }
}
