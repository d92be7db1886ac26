//! Automation Worker: drives a browser through one job application.
//!
//! Per-page problems (timeouts, missing elements, rejected submissions) come
//! back as an `Outcome` inside the `AttemptReport`. Only a lost browser engine
//! surfaces as `EngineError`, which aborts the whole run.
use async_trait::async_trait;
use thiserror::Error;

pub mod browser_worker;
pub mod classifier;
#[cfg(test)]
pub mod fake_driver;
pub mod profile;
pub mod screenshots;
pub mod webdriver;

pub use browser_worker::{BrowserSettings, BrowserWorker};

use crate::cv::MaterializedCv;
use crate::models::ApplicationRow;
use crate::pipeline::state_machine::AttemptReport;

pub const DRY_RUN_NOTE: &str = "DRY RUN - form filled but not submitted";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("browser engine unavailable: {0}")]
    Unavailable(String),

    #[error("browser session lost: {0}")]
    SessionLost(String),
}

#[async_trait]
pub trait AutomationWorker: Send + Sync {
    async fn submit(
        &self,
        application: &ApplicationRow,
        cv: &MaterializedCv,
    ) -> Result<AttemptReport, EngineError>;

    /// Releases the browser session, if any. Called once at the end of every run.
    async fn shutdown(&self);
}
