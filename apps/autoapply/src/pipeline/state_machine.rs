//! Application lifecycle transitions.
//!
//! `pending → processing → {success, failed, skipped}`, with `failed` folding back
//! into `pending` while attempts remain. Every function here is pure: stores call
//! them (or mirror them in SQL) so the rules live in exactly one place.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::models::{ApplicationRow, ApplicationStatus, RunCounter};

pub const INTERRUPTED_MESSAGE: &str = "Attempt interrupted before completion (stale claim recovered)";

/// Result of one automation attempt, as classified by the worker or resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success { note: Option<String> },
    /// Retry-eligible failure (timeout, network, element missing, rejected submission).
    Failed { reason: String },
    /// Policy stop: the application can never proceed. Terminal regardless of attempts.
    Skipped { reason: String },
}

impl Outcome {
    pub fn success() -> Self {
        Outcome::Success { note: None }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Outcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Outcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn counter(&self) -> RunCounter {
        match self {
            Outcome::Success { .. } => RunCounter::Successful,
            Outcome::Failed { .. } => RunCounter::Failed,
            Outcome::Skipped { .. } => RunCounter::Skipped,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "success",
            Outcome::Failed { .. } => "failed",
            Outcome::Skipped { .. } => "skipped",
        }
    }

    fn message(&self) -> Option<String> {
        match self {
            Outcome::Success { note } => note.clone(),
            Outcome::Failed { reason } | Outcome::Skipped { reason } => Some(reason.clone()),
        }
    }
}

/// Everything an attempt produced that ends up on the application record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    pub outcome: Outcome,
    pub screenshot_path: Option<String>,
    /// Discovered on the page when the record did not carry one.
    pub job_title: Option<String>,
    pub company_name: Option<String>,
}

impl AttemptReport {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            screenshot_path: None,
            job_title: None,
            company_name: None,
        }
    }

    pub fn with_screenshot(mut self, path: Option<String>) -> Self {
        if path.is_some() {
            self.screenshot_path = path;
        }
        self
    }
}

/// Field values to persist when an attempt settles.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub status: ApplicationStatus,
    pub error_message: Option<String>,
    pub screenshot_path: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub job_title: Option<String>,
    pub company_name: Option<String>,
}

impl Transition {
    pub fn apply_to(&self, row: &mut ApplicationRow) {
        row.status = self.status;
        row.error_message = self.error_message.clone();
        row.screenshot_path = self.screenshot_path.clone();
        row.completed_at = self.completed_at;
        row.job_title = self.job_title.clone();
        row.company_name = self.company_name.clone();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("application is {actual}, expected {expected}")]
    InvalidState {
        expected: ApplicationStatus,
        actual: ApplicationStatus,
    },

    #[error("application has used all {max_attempts} attempts")]
    AttemptsExhausted { max_attempts: i32 },
}

fn expect_status(row: &ApplicationRow, expected: ApplicationStatus) -> Result<(), TransitionError> {
    if row.status == expected {
        Ok(())
    } else {
        Err(TransitionError::InvalidState {
            expected,
            actual: row.status,
        })
    }
}

/// `pending → processing`: stamps `started_at` and consumes one attempt.
pub fn claim(row: &ApplicationRow, now: DateTime<Utc>) -> Result<ApplicationRow, TransitionError> {
    expect_status(row, ApplicationStatus::Pending)?;
    if !row.attempts_remaining() {
        return Err(TransitionError::AttemptsExhausted {
            max_attempts: row.max_attempts,
        });
    }
    let mut claimed = row.clone();
    claimed.status = ApplicationStatus::Processing;
    claimed.started_at = Some(now);
    claimed.completed_at = None;
    claimed.attempts += 1;
    Ok(claimed)
}

/// `processing → {success, failed, skipped}`, folding a failure back to `pending`
/// while attempts remain.
pub fn settle(
    row: &ApplicationRow,
    report: &AttemptReport,
    now: DateTime<Utc>,
) -> Result<Transition, TransitionError> {
    expect_status(row, ApplicationStatus::Processing)?;

    let (status, completed_at) = match &report.outcome {
        Outcome::Success { .. } => (ApplicationStatus::Success, Some(now)),
        Outcome::Skipped { .. } => (ApplicationStatus::Skipped, Some(now)),
        Outcome::Failed { .. } if row.attempts_remaining() => (ApplicationStatus::Pending, None),
        Outcome::Failed { .. } => (ApplicationStatus::Failed, Some(now)),
    };

    Ok(Transition {
        status,
        error_message: report.outcome.message(),
        screenshot_path: report
            .screenshot_path
            .clone()
            .or_else(|| row.screenshot_path.clone()),
        completed_at,
        job_title: row.job_title.clone().or_else(|| report.job_title.clone()),
        company_name: row
            .company_name
            .clone()
            .or_else(|| report.company_name.clone()),
    })
}

/// Explicit operator retry of a terminal `failed` record.
///
/// Returns the record to `pending` with the error cleared and exactly one attempt
/// available, without touching `max_attempts`.
pub fn retry(row: &ApplicationRow) -> Result<ApplicationRow, TransitionError> {
    expect_status(row, ApplicationStatus::Failed)?;
    let mut reset = row.clone();
    reset.status = ApplicationStatus::Pending;
    reset.error_message = None;
    reset.completed_at = None;
    reset.attempts = (row.max_attempts - 1).min(row.attempts).max(0);
    Ok(reset)
}

/// Rollback for a record left in `processing` by an interrupted run.
///
/// Returns `None` while the claim is younger than `grace`. A record whose
/// attempts are already exhausted becomes terminal `failed` instead of `pending`.
pub fn recover_stale(row: &ApplicationRow, now: DateTime<Utc>, grace: Duration) -> Option<Transition> {
    if row.status != ApplicationStatus::Processing {
        return None;
    }
    let stale = row.started_at.map_or(true, |started| started <= now - grace);
    if !stale {
        return None;
    }

    let (status, completed_at) = if row.attempts_remaining() {
        (ApplicationStatus::Pending, None)
    } else {
        (ApplicationStatus::Failed, Some(now))
    };
    Some(Transition {
        status,
        error_message: Some(INTERRUPTED_MESSAGE.to_string()),
        screenshot_path: row.screenshot_path.clone(),
        completed_at,
        job_title: row.job_title.clone(),
        company_name: row.company_name.clone(),
    })
}

#[cfg(test)]
pub(crate) fn sample_row(max_attempts: i32) -> ApplicationRow {
    ApplicationRow {
        id: uuid::Uuid::new_v4(),
        job_url: "https://jobs.example.com/offer/42".to_string(),
        job_title: None,
        company_name: None,
        job_id: None,
        candidate_first_name: "Maria".to_string(),
        candidate_last_name: "Rossi".to_string(),
        candidate_email: format!("maria+{}@example.com", uuid::Uuid::new_v4().simple()),
        candidate_phone: None,
        candidate_message: None,
        candidate_profile: serde_json::json!({}),
        cv_reference: "maria.pdf".to_string(),
        accept_privacy: true,
        accept_marketing: false,
        accept_third_party: false,
        accept_cv_database: false,
        status: ApplicationStatus::Pending,
        attempts: 0,
        max_attempts,
        error_message: None,
        screenshot_path: None,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
    }
}
