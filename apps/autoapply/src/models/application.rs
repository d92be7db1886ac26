use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;
pub const MAX_ALLOWED_ATTEMPTS: i32 = 10;

/// Lifecycle status of an application record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Skipped,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Processing => "processing",
            ApplicationStatus::Success => "success",
            ApplicationStatus::Failed => "failed",
            ApplicationStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApplicationStatus::Pending),
            "processing" => Ok(ApplicationStatus::Processing),
            "success" => Ok(ApplicationStatus::Success),
            "failed" => Ok(ApplicationStatus::Failed),
            "skipped" => Ok(ApplicationStatus::Skipped),
            other => Err(format!("unknown application status '{other}'")),
        }
    }
}

impl TryFrom<String> for ApplicationStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One candidate-to-job submission, as persisted in `applications`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ApplicationRow {
    pub id: Uuid,
    pub job_url: String,
    pub job_title: Option<String>,
    pub company_name: Option<String>,
    pub job_id: Option<String>,

    pub candidate_first_name: String,
    pub candidate_last_name: String,
    pub candidate_email: String,
    pub candidate_phone: Option<String>,
    pub candidate_message: Option<String>,
    /// Free-form, site-specific candidate fields (key → value).
    pub candidate_profile: Value,
    pub cv_reference: String,

    pub accept_privacy: bool,
    pub accept_marketing: bool,
    pub accept_third_party: bool,
    pub accept_cv_database: bool,

    #[sqlx(try_from = "String")]
    pub status: ApplicationStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub error_message: Option<String>,
    pub screenshot_path: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ApplicationRow {
    /// String-valued entries of `candidate_profile`; non-string values are rendered as JSON.
    pub fn profile_entries(&self) -> BTreeMap<String, String> {
        self.candidate_profile
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(k, v)| {
                        let value = match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), value)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

fn default_true() -> bool {
    true
}

/// Candidate data carried by a creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateInfo {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: Option<String>,
    pub cv_reference: String,
    #[serde(default)]
    pub profile: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub accept_privacy: bool,
    #[serde(default)]
    pub accept_marketing: bool,
    #[serde(default)]
    pub accept_third_party: bool,
    #[serde(default)]
    pub accept_cv_database: bool,
}

/// Payload for queuing a new application (HTTP create, batch create, queue intake).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewApplication {
    pub job_url: String,
    pub job_title: Option<String>,
    pub company_name: Option<String>,
    pub job_id: Option<String>,
    pub max_attempts: Option<i32>,
    pub candidate: CandidateInfo,
}

impl NewApplication {
    pub fn max_attempts(&self) -> i32 {
        self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }

    /// Checks the request shape. Returns a human-readable message on the first problem.
    pub fn validate(&self) -> Result<(), String> {
        let url = reqwest::Url::parse(self.job_url.trim())
            .map_err(|e| format!("job_url is not a valid URL: {e}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err("job_url must use http or https".to_string());
        }

        let candidate = &self.candidate;
        if candidate.first_name.trim().is_empty() {
            return Err("candidate.first_name cannot be empty".to_string());
        }
        if candidate.last_name.trim().is_empty() {
            return Err("candidate.last_name cannot be empty".to_string());
        }
        let email = candidate.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err("candidate.email must be a valid email address".to_string());
        }
        if candidate.cv_reference.trim().is_empty() {
            return Err("candidate.cv_reference cannot be empty".to_string());
        }

        let max_attempts = self.max_attempts();
        if !(1..=MAX_ALLOWED_ATTEMPTS).contains(&max_attempts) {
            return Err(format!(
                "max_attempts must be between 1 and {MAX_ALLOWED_ATTEMPTS}"
            ));
        }
        Ok(())
    }

    pub fn profile_json(&self) -> Value {
        serde_json::to_value(&self.candidate.profile).unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

/// Aggregate counters over all application records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ApplicationStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub successful: i64,
    pub failed: i64,
    pub skipped: i64,
    pub today_successful: i64,
    pub week_successful: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    CompletedAt,
    Attempts,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::CompletedAt => "completed_at",
            SortField::Attempts => "attempts",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Filters and paging for listing applications.
#[derive(Debug, Clone)]
pub struct ApplicationFilter {
    pub page: u32,
    pub page_size: u32,
    pub status: Option<ApplicationStatus>,
    pub email: Option<String>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

impl Default for ApplicationFilter {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            status: None,
            email: None,
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
        }
    }
}

impl ApplicationFilter {
    pub fn offset(&self) -> i64 {
        (self.page.saturating_sub(1) as i64) * self.page_size as i64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationPage {
    pub applications: Vec<ApplicationRow>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: i64,
}

impl ApplicationPage {
    pub fn new(applications: Vec<ApplicationRow>, total: i64, filter: &ApplicationFilter) -> Self {
        let page_size = filter.page_size.max(1) as i64;
        Self {
            applications,
            total,
            page: filter.page,
            page_size: filter.page_size,
            total_pages: (total + page_size - 1) / page_size,
        }
    }
}
