use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::automation::{AutomationWorker, EngineError};
use crate::cv::CvResolver;
use crate::models::{ApplicationRow, RunRow, RunStatus};
use crate::pipeline::job_marker::JobMarker;
use crate::pipeline::state_machine::{self, AttemptReport, Outcome, TransitionError};
use crate::pipeline::store::{ApplicationStore, StoreError};

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("a processing run is already in progress")]
    AlreadyRunning,

    #[error("limit must be between 1 and {max}, got {requested}")]
    InvalidLimit { requested: u32, max: u32 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("browser engine failure: {0}")]
    Engine(#[from] EngineError),

    #[error("lifecycle violation: {0}")]
    Transition(#[from] TransitionError),

    #[error("processing task aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_per_run: u32,
    /// Blocking pause between two consecutive applications of a run.
    pub delay: Duration,
    /// Age after which `processing` claims and silent `running` runs are reclaimed.
    pub stale_grace: chrono::Duration,
}

/// Runs batches of pending applications through the CV resolver and the
/// automation worker, one at a time, under a single persisted run claim.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn ApplicationStore>,
    cv: CvResolver,
    worker: Arc<dyn AutomationWorker>,
    settings: OrchestratorSettings,
    job_marker: Option<Arc<dyn JobMarker>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ApplicationStore>,
        cv: CvResolver,
        worker: Arc<dyn AutomationWorker>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            cv,
            worker,
            settings,
            job_marker: None,
        }
    }

    /// Flags the scraper's listing after every real (non dry-run) success.
    pub fn with_job_marker(mut self, marker: Arc<dyn JobMarker>) -> Self {
        self.job_marker = Some(marker);
        self
    }

    pub fn max_per_run(&self) -> u32 {
        self.settings.max_per_run
    }

    /// The `running` run, if any.
    pub async fn current_run(&self) -> Result<Option<RunRow>, StoreError> {
        self.store.current_run().await
    }

    /// Reclaims runs and applications abandoned by a previous process.
    pub async fn recover(&self) -> Result<(u64, u64), StoreError> {
        let runs = self.store.recover_stale_runs(self.settings.stale_grace).await?;
        let applications = self
            .store
            .recover_stale_applications(self.settings.stale_grace)
            .await?;
        Ok((runs, applications))
    }

    /// Processes up to `limit` pending applications, oldest first.
    ///
    /// The pass runs on its own task, so dropping the returned future (a client
    /// that disconnects mid-run) does not interrupt it. The returned run is
    /// already finalized, and every exit path after the claim finishes the run,
    /// which releases the single-run claim.
    pub async fn run_processing(&self, limit: u32) -> Result<RunRow, OrchestrationError> {
        if limit == 0 || limit > self.settings.max_per_run {
            return Err(OrchestrationError::InvalidLimit {
                requested: limit,
                max: self.settings.max_per_run,
            });
        }

        let this = self.clone();
        match tokio::spawn(async move { this.claim_and_process(limit).await }).await {
            Ok(result) => result,
            Err(e) => Err(OrchestrationError::Aborted(e.to_string())),
        }
    }

    async fn claim_and_process(self, limit: u32) -> Result<RunRow, OrchestrationError> {
        self.store.recover_stale_runs(self.settings.stale_grace).await?;
        let run = match self.store.claim_run().await {
            Ok(run) => run,
            Err(StoreError::RunAlreadyActive) => return Err(OrchestrationError::AlreadyRunning),
            Err(e) => return Err(e.into()),
        };
        info!(run_id = %run.id, limit, "Processing run started");

        // A panic inside the batch must still finish the run.
        let batch = {
            let this = self.clone();
            let run = run.clone();
            tokio::spawn(async move { this.process_batch(&run, limit).await })
        };
        let outcome = match batch.await {
            Ok(outcome) => outcome,
            Err(e) => Err(OrchestrationError::Aborted(e.to_string())),
        };
        self.worker.shutdown().await;

        let (status, message) = match &outcome {
            Ok(()) => (RunStatus::Completed, None),
            Err(e) => (RunStatus::Failed, Some(e.to_string())),
        };
        let finished = self.store.finish_run(run.id, status, message).await?;

        match outcome {
            Ok(()) => {
                info!(
                    run_id = %finished.id,
                    total = finished.total_processed,
                    successful = finished.successful,
                    failed = finished.failed,
                    skipped = finished.skipped,
                    "Processing run completed"
                );
                Ok(finished)
            }
            Err(e) => {
                error!(run_id = %finished.id, "Processing run failed: {e}");
                Err(e)
            }
        }
    }

    async fn process_batch(&self, run: &RunRow, limit: u32) -> Result<(), OrchestrationError> {
        let recovered = self
            .store
            .recover_stale_applications(self.settings.stale_grace)
            .await?;
        if recovered > 0 {
            info!(run_id = %run.id, "Returned {recovered} interrupted application(s) to the queue");
        }

        let batch = self.store.select_pending(i64::from(limit)).await?;
        info!(run_id = %run.id, "Selected {} pending application(s)", batch.len());

        for (index, candidate) in batch.iter().enumerate() {
            if index > 0 && !self.settings.delay.is_zero() {
                tokio::time::sleep(self.settings.delay).await;
            }

            let Some(claimed) = self.store.claim_application(candidate.id).await? else {
                debug!(application_id = %candidate.id, "Application no longer claimable");
                continue;
            };
            info!(
                run_id = %run.id,
                application_id = %claimed.id,
                attempt = claimed.attempts,
                "Processing {}",
                claimed.job_url
            );

            let report = self.attempt(&claimed).await?;
            let transition = state_machine::settle(&claimed, &report, Utc::now())?;
            let settled = self.store.apply_transition(claimed.id, &transition).await?;
            self.store
                .record_run_outcome(run.id, report.outcome.counter())
                .await?;

            // Dry runs succeed with a note and leave the listing untouched.
            if let (Some(marker), Outcome::Success { note: None }) = (&self.job_marker, &report.outcome) {
                match marker.mark_applied(&settled).await {
                    Ok(rows) => debug!(application_id = %settled.id, "Marked {rows} listing row(s) as applied"),
                    Err(e) => warn!(application_id = %settled.id, "Could not mark listing as applied: {e:#}"),
                }
            }

            info!(
                run_id = %run.id,
                application_id = %settled.id,
                attempt = settled.attempts,
                outcome = report.outcome.label(),
                status = %settled.status,
                "Application processed"
            );
        }
        Ok(())
    }

    /// One attempt for a claimed record. The CV file lives only for the
    /// duration of this call.
    async fn attempt(&self, claimed: &ApplicationRow) -> Result<AttemptReport, EngineError> {
        let cv = match self.cv.acquire(&claimed.cv_reference).await {
            Ok(cv) => cv,
            Err(e) => {
                warn!(application_id = %claimed.id, "CV unavailable: {e}");
                return Ok(AttemptReport::new(Outcome::skipped(format!(
                    "CV unavailable: {e}"
                ))));
            }
        };
        self.worker.submit(claimed, &cv).await
    }
}
