use async_trait::async_trait;
use chrono::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    ApplicationFilter, ApplicationPage, ApplicationRow, ApplicationStats, NewApplication,
    RunCounter, RunRow, RunStatus,
};
use crate::pipeline::state_machine::{Transition, TransitionError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("an application for {job_url} with email {email} already exists")]
    Duplicate { job_url: String, email: String },

    #[error("another processing run is already active")]
    RunAlreadyActive,

    #[error("application {0} not found")]
    NotFound(Uuid),

    #[error("application {id} changed concurrently; expected it to be {expected}")]
    Conflict { id: Uuid, expected: &'static str },

    #[error("invalid transition: {0}")]
    Transition(#[from] TransitionError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence contract of the application pipeline.
///
/// Every mutation of an application's lifecycle goes through the transitions in
/// `pipeline::state_machine`; implementations only make them durable and atomic.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn create_application(&self, new: &NewApplication) -> Result<ApplicationRow, StoreError>;

    async fn get_application(&self, id: Uuid) -> Result<Option<ApplicationRow>, StoreError>;

    async fn list_applications(&self, filter: &ApplicationFilter) -> Result<ApplicationPage, StoreError>;

    async fn stats(&self) -> Result<ApplicationStats, StoreError>;

    /// Atomic test-and-set: creates a `running` run or fails with `RunAlreadyActive`.
    async fn claim_run(&self) -> Result<RunRow, StoreError>;

    async fn current_run(&self) -> Result<Option<RunRow>, StoreError>;

    /// Bumps one counter plus `total_processed` and refreshes the run heartbeat.
    async fn record_run_outcome(&self, run_id: Uuid, counter: RunCounter) -> Result<RunRow, StoreError>;

    /// Finalizes a run and releases the single-run claim.
    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<RunRow, StoreError>;

    async fn list_runs(&self, limit: i64) -> Result<Vec<RunRow>, StoreError>;

    /// Marks `running` runs whose heartbeat is older than `grace` as `failed`.
    async fn recover_stale_runs(&self, grace: Duration) -> Result<u64, StoreError>;

    /// Rolls back `processing` claims older than `grace` (see `state_machine::recover_stale`).
    async fn recover_stale_applications(&self, grace: Duration) -> Result<u64, StoreError>;

    /// Oldest-first `pending` records that still have attempts left.
    async fn select_pending(&self, limit: i64) -> Result<Vec<ApplicationRow>, StoreError>;

    /// `pending → processing`. `None` when the record is no longer claimable.
    async fn claim_application(&self, id: Uuid) -> Result<Option<ApplicationRow>, StoreError>;

    /// Persists a settled attempt. Only applies to records still in `processing`.
    async fn apply_transition(&self, id: Uuid, transition: &Transition) -> Result<ApplicationRow, StoreError>;

    /// Explicit retry of a terminal `failed` record (`state_machine::retry`).
    async fn retry_application(&self, id: Uuid) -> Result<ApplicationRow, StoreError>;
}
