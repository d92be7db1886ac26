use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

impl TryFrom<String> for RunStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Which run counter a processed application contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCounter {
    Successful,
    Failed,
    Skipped,
}

impl RunCounter {
    /// `(successful, failed, skipped)` increments.
    pub fn increments(&self) -> (i32, i32, i32) {
        match self {
            RunCounter::Successful => (1, 0, 0),
            RunCounter::Failed => (0, 1, 0),
            RunCounter::Skipped => (0, 0, 1),
        }
    }
}

/// Summary of one orchestration pass, as persisted in `application_runs`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunRow {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Heartbeat, touched after every processed application.
    pub updated_at: DateTime<Utc>,
    pub total_processed: i32,
    pub successful: i32,
    pub failed: i32,
    pub skipped: i32,
    #[sqlx(try_from = "String")]
    pub status: RunStatus,
    pub error_message: Option<String>,
}

impl RunRow {
    pub fn new_running(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: now,
            finished_at: None,
            updated_at: now,
            total_processed: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            status: RunStatus::Running,
            error_message: None,
        }
    }

    pub fn count(&mut self, counter: RunCounter, now: DateTime<Utc>) {
        let (successful, failed, skipped) = counter.increments();
        self.successful += successful;
        self.failed += failed;
        self.skipped += skipped;
        self.total_processed += 1;
        self.updated_at = now;
    }

    pub fn totals_consistent(&self) -> bool {
        self.total_processed == self.successful + self.failed + self.skipped
    }
}
