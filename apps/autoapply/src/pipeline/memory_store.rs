//! In-process `ApplicationStore` used by unit tests.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::application::{SortField, SortOrder};
use crate::models::{
    ApplicationFilter, ApplicationPage, ApplicationRow, ApplicationStats, ApplicationStatus,
    NewApplication, RunCounter, RunRow, RunStatus,
};
use crate::pipeline::state_machine::{self, Transition};
use crate::pipeline::store::{ApplicationStore, StoreError};

#[derive(Default)]
struct Inner {
    applications: Vec<ApplicationRow>,
    runs: Vec<RunRow>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fully-formed row, bypassing creation rules.
    pub async fn insert(&self, row: ApplicationRow) {
        self.inner.lock().await.applications.push(row);
    }

    pub async fn insert_run(&self, run: RunRow) {
        self.inner.lock().await.runs.push(run);
    }

    pub async fn application(&self, id: Uuid) -> ApplicationRow {
        self.inner
            .lock()
            .await
            .applications
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .expect("application exists")
    }

    pub async fn runs(&self) -> Vec<RunRow> {
        self.inner.lock().await.runs.clone()
    }
}

fn find_mut(apps: &mut [ApplicationRow], id: Uuid) -> Result<&mut ApplicationRow, StoreError> {
    apps.iter_mut()
        .find(|a| a.id == id)
        .ok_or(StoreError::NotFound(id))
}

fn find_run_mut(runs: &mut [RunRow], id: Uuid) -> Result<&mut RunRow, StoreError> {
    runs.iter_mut()
        .find(|r| r.id == id)
        .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn create_application(&self, new: &NewApplication) -> Result<ApplicationRow, StoreError> {
        let mut inner = self.inner.lock().await;
        let job_url = new.job_url.trim().to_string();
        let email = new.candidate.email.trim().to_string();
        if inner
            .applications
            .iter()
            .any(|a| a.job_url == job_url && a.candidate_email == email)
        {
            return Err(StoreError::Duplicate { job_url, email });
        }

        let c = &new.candidate;
        let row = ApplicationRow {
            id: Uuid::new_v4(),
            job_url,
            job_title: new.job_title.clone(),
            company_name: new.company_name.clone(),
            job_id: new.job_id.clone(),
            candidate_first_name: c.first_name.trim().to_string(),
            candidate_last_name: c.last_name.trim().to_string(),
            candidate_email: email,
            candidate_phone: c.phone.clone(),
            candidate_message: c.message.clone(),
            candidate_profile: new.profile_json(),
            cv_reference: c.cv_reference.trim().to_string(),
            accept_privacy: c.accept_privacy,
            accept_marketing: c.accept_marketing,
            accept_third_party: c.accept_third_party,
            accept_cv_database: c.accept_cv_database,
            status: ApplicationStatus::Pending,
            attempts: 0,
            max_attempts: new.max_attempts(),
            error_message: None,
            screenshot_path: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        inner.applications.push(row.clone());
        Ok(row)
    }

    async fn get_application(&self, id: Uuid) -> Result<Option<ApplicationRow>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.applications.iter().find(|a| a.id == id).cloned())
    }

    async fn list_applications(&self, filter: &ApplicationFilter) -> Result<ApplicationPage, StoreError> {
        let inner = self.inner.lock().await;
        let mut matching: Vec<ApplicationRow> = inner
            .applications
            .iter()
            .filter(|a| filter.status.map_or(true, |s| a.status == s))
            .filter(|a| filter.email.as_deref().map_or(true, |e| a.candidate_email == e))
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            let ord = match filter.sort_by {
                SortField::CreatedAt => a.created_at.cmp(&b.created_at),
                SortField::CompletedAt => a.completed_at.cmp(&b.completed_at),
                SortField::Attempts => a.attempts.cmp(&b.attempts),
            };
            match filter.sort_order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        let total = matching.len() as i64;
        let page: Vec<ApplicationRow> = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.page_size as usize)
            .collect();
        Ok(ApplicationPage::new(page, total, filter))
    }

    async fn stats(&self) -> Result<ApplicationStats, StoreError> {
        let inner = self.inner.lock().await;
        let count = |status: ApplicationStatus| {
            inner.applications.iter().filter(|a| a.status == status).count() as i64
        };
        let now = Utc::now();
        let succeeded_since = |since: chrono::DateTime<Utc>| {
            inner
                .applications
                .iter()
                .filter(|a| a.status == ApplicationStatus::Success)
                .filter(|a| a.completed_at.map_or(false, |t| t >= since))
                .count() as i64
        };
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or(now);

        Ok(ApplicationStats {
            total: inner.applications.len() as i64,
            pending: count(ApplicationStatus::Pending),
            processing: count(ApplicationStatus::Processing),
            successful: count(ApplicationStatus::Success),
            failed: count(ApplicationStatus::Failed),
            skipped: count(ApplicationStatus::Skipped),
            today_successful: succeeded_since(midnight),
            week_successful: succeeded_since(now - Duration::days(7)),
        })
    }

    async fn claim_run(&self) -> Result<RunRow, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.runs.iter().any(|r| r.status == RunStatus::Running) {
            return Err(StoreError::RunAlreadyActive);
        }
        let run = RunRow::new_running(Utc::now());
        inner.runs.push(run.clone());
        Ok(run)
    }

    async fn current_run(&self) -> Result<Option<RunRow>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .runs
            .iter()
            .find(|r| r.status == RunStatus::Running)
            .cloned())
    }

    async fn record_run_outcome(&self, run_id: Uuid, counter: RunCounter) -> Result<RunRow, StoreError> {
        let mut inner = self.inner.lock().await;
        let run = find_run_mut(&mut inner.runs, run_id)?;
        run.count(counter, Utc::now());
        Ok(run.clone())
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<RunRow, StoreError> {
        let mut inner = self.inner.lock().await;
        let run = find_run_mut(&mut inner.runs, run_id)?;
        let now = Utc::now();
        run.status = status;
        run.error_message = error_message;
        run.finished_at = Some(now);
        run.updated_at = now;
        Ok(run.clone())
    }

    async fn list_runs(&self, limit: i64) -> Result<Vec<RunRow>, StoreError> {
        let inner = self.inner.lock().await;
        let mut runs = inner.runs.clone();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit.max(0) as usize);
        Ok(runs)
    }

    async fn recover_stale_runs(&self, grace: Duration) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut recovered = 0;
        for run in inner
            .runs
            .iter_mut()
            .filter(|r| r.status == RunStatus::Running && r.updated_at < now - grace)
        {
            run.status = RunStatus::Failed;
            run.finished_at = Some(now);
            run.error_message = Some("Run abandoned: heartbeat expired".to_string());
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn recover_stale_applications(&self, grace: Duration) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut recovered = 0;
        for row in inner.applications.iter_mut() {
            if let Some(transition) = state_machine::recover_stale(row, now, grace) {
                transition.apply_to(row);
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn select_pending(&self, limit: i64) -> Result<Vec<ApplicationRow>, StoreError> {
        let inner = self.inner.lock().await;
        let mut pending: Vec<ApplicationRow> = inner
            .applications
            .iter()
            .filter(|a| a.status == ApplicationStatus::Pending && a.attempts_remaining())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn claim_application(&self, id: Uuid) -> Result<Option<ApplicationRow>, StoreError> {
        let mut inner = self.inner.lock().await;
        let row = find_mut(&mut inner.applications, id)?;
        match state_machine::claim(row, Utc::now()) {
            Ok(claimed) => {
                *row = claimed.clone();
                Ok(Some(claimed))
            }
            Err(_) => Ok(None),
        }
    }

    async fn apply_transition(&self, id: Uuid, transition: &Transition) -> Result<ApplicationRow, StoreError> {
        let mut inner = self.inner.lock().await;
        let row = find_mut(&mut inner.applications, id)?;
        if row.status != ApplicationStatus::Processing {
            return Err(StoreError::Conflict {
                id,
                expected: ApplicationStatus::Processing.as_str(),
            });
        }
        transition.apply_to(row);
        Ok(row.clone())
    }

    async fn retry_application(&self, id: Uuid) -> Result<ApplicationRow, StoreError> {
        let mut inner = self.inner.lock().await;
        let row = find_mut(&mut inner.applications, id)?;
        let reset = state_machine::retry(row)?;
        *row = reset.clone();
        Ok(reset)
    }
}
