use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{
    ApplicationFilter, ApplicationPage, ApplicationRow, ApplicationStats, ApplicationStatus,
    NewApplication, RunCounter, RunRow, RunStatus,
};
use crate::pipeline::state_machine::{self, Transition, INTERRUPTED_MESSAGE};
use crate::pipeline::store::{ApplicationStore, StoreError};

/// `ApplicationStore` backed by PostgreSQL.
#[derive(Clone)]
pub struct PgApplicationStore {
    pool: PgPool,
}

impl PgApplicationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl ApplicationStore for PgApplicationStore {
    async fn create_application(&self, new: &NewApplication) -> Result<ApplicationRow, StoreError> {
        let candidate = &new.candidate;
        let job_url = new.job_url.trim();
        let email = candidate.email.trim();

        let inserted = sqlx::query_as::<_, ApplicationRow>(
            r#"
            INSERT INTO applications
                (id, job_url, job_title, company_name, job_id,
                 candidate_first_name, candidate_last_name, candidate_email,
                 candidate_phone, candidate_message, candidate_profile, cv_reference,
                 accept_privacy, accept_marketing, accept_third_party, accept_cv_database,
                 status, attempts, max_attempts, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, 'pending', 0, $17, $18)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_url)
        .bind(&new.job_title)
        .bind(&new.company_name)
        .bind(&new.job_id)
        .bind(candidate.first_name.trim())
        .bind(candidate.last_name.trim())
        .bind(email)
        .bind(&candidate.phone)
        .bind(&candidate.message)
        .bind(new.profile_json())
        .bind(candidate.cv_reference.trim())
        .bind(candidate.accept_privacy)
        .bind(candidate.accept_marketing)
        .bind(candidate.accept_third_party)
        .bind(candidate.accept_cv_database)
        .bind(new.max_attempts())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => Ok(row),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate {
                job_url: job_url.to_string(),
                email: email.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_application(&self, id: Uuid) -> Result<Option<ApplicationRow>, StoreError> {
        Ok(
            sqlx::query_as::<_, ApplicationRow>("SELECT * FROM applications WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn list_applications(&self, filter: &ApplicationFilter) -> Result<ApplicationPage, StoreError> {
        let status = filter.status.map(|s| s.as_str());
        let email = filter.email.as_deref();

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM applications
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR candidate_email = $2)
            "#,
        )
        .bind(status)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        // Column and direction come from closed enums, never from raw input.
        let query = format!(
            r#"
            SELECT * FROM applications
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR candidate_email = $2)
            ORDER BY {} {} NULLS LAST, id ASC
            LIMIT $3 OFFSET $4
            "#,
            filter.sort_by.column(),
            filter.sort_order.keyword(),
        );
        let applications = sqlx::query_as::<_, ApplicationRow>(&query)
            .bind(status)
            .bind(email)
            .bind(filter.page_size as i64)
            .bind(filter.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(ApplicationPage::new(applications, total, filter))
    }

    async fn stats(&self) -> Result<ApplicationStats, StoreError> {
        Ok(sqlx::query_as::<_, ApplicationStats>(
            r#"
            SELECT
                COUNT(*)                                              AS total,
                COUNT(*) FILTER (WHERE status = 'pending')            AS pending,
                COUNT(*) FILTER (WHERE status = 'processing')         AS processing,
                COUNT(*) FILTER (WHERE status = 'success')            AS successful,
                COUNT(*) FILTER (WHERE status = 'failed')             AS failed,
                COUNT(*) FILTER (WHERE status = 'skipped')            AS skipped,
                COUNT(*) FILTER (WHERE status = 'success'
                                   AND completed_at >= date_trunc('day', now())) AS today_successful,
                COUNT(*) FILTER (WHERE status = 'success'
                                   AND completed_at >= now() - interval '7 days') AS week_successful
            FROM applications
            "#,
        )
        .fetch_one(&self.pool)
        .await?)
    }

    async fn claim_run(&self) -> Result<RunRow, StoreError> {
        let now = Utc::now();
        let claimed = sqlx::query_as::<_, RunRow>(
            r#"
            INSERT INTO application_runs (id, started_at, updated_at, status)
            VALUES ($1, $2, $2, 'running')
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match claimed {
            Ok(run) => Ok(run),
            Err(e) if is_unique_violation(&e) => Err(StoreError::RunAlreadyActive),
            Err(e) => Err(e.into()),
        }
    }

    async fn current_run(&self) -> Result<Option<RunRow>, StoreError> {
        Ok(sqlx::query_as::<_, RunRow>(
            "SELECT * FROM application_runs WHERE status = 'running' LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn record_run_outcome(&self, run_id: Uuid, counter: RunCounter) -> Result<RunRow, StoreError> {
        let (successful, failed, skipped) = counter.increments();
        Ok(sqlx::query_as::<_, RunRow>(
            r#"
            UPDATE application_runs
            SET total_processed = total_processed + 1,
                successful = successful + $2,
                failed = failed + $3,
                skipped = skipped + $4,
                updated_at = $5
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(run_id)
        .bind(successful)
        .bind(failed)
        .bind(skipped)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?)
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<String>,
    ) -> Result<RunRow, StoreError> {
        let now = Utc::now();
        Ok(sqlx::query_as::<_, RunRow>(
            r#"
            UPDATE application_runs
            SET status = $2, error_message = $3, finished_at = $4, updated_at = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(error_message)
        .bind(now)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn list_runs(&self, limit: i64) -> Result<Vec<RunRow>, StoreError> {
        Ok(sqlx::query_as::<_, RunRow>(
            "SELECT * FROM application_runs ORDER BY started_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn recover_stale_runs(&self, grace: Duration) -> Result<u64, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE application_runs
            SET status = 'failed',
                finished_at = $2,
                error_message = 'Run abandoned: heartbeat expired'
            WHERE status = 'running' AND updated_at < $1
            "#,
        )
        .bind(now - grace)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            warn!("Marked {recovered} abandoned run(s) as failed");
        }
        Ok(recovered)
    }

    async fn recover_stale_applications(&self, grace: Duration) -> Result<u64, StoreError> {
        let now = Utc::now();
        // Mirrors state_machine::recover_stale in a single statement.
        let result = sqlx::query(
            r#"
            UPDATE applications
            SET status = CASE WHEN attempts < max_attempts THEN 'pending' ELSE 'failed' END,
                completed_at = CASE WHEN attempts < max_attempts THEN NULL ELSE $2 END,
                error_message = $3
            WHERE status = 'processing'
              AND (started_at IS NULL OR started_at <= $1)
            "#,
        )
        .bind(now - grace)
        .bind(now)
        .bind(INTERRUPTED_MESSAGE)
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            info!("Recovered {recovered} stale processing claim(s)");
        }
        Ok(recovered)
    }

    async fn select_pending(&self, limit: i64) -> Result<Vec<ApplicationRow>, StoreError> {
        Ok(sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT * FROM applications
            WHERE status = 'pending' AND attempts < max_attempts
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn claim_application(&self, id: Uuid) -> Result<Option<ApplicationRow>, StoreError> {
        // Conditional update mirrors state_machine::claim.
        Ok(sqlx::query_as::<_, ApplicationRow>(
            r#"
            UPDATE applications
            SET status = 'processing',
                started_at = $2,
                completed_at = NULL,
                attempts = attempts + 1
            WHERE id = $1 AND status = 'pending' AND attempts < max_attempts
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn apply_transition(&self, id: Uuid, transition: &Transition) -> Result<ApplicationRow, StoreError> {
        sqlx::query_as::<_, ApplicationRow>(
            r#"
            UPDATE applications
            SET status = $2,
                error_message = $3,
                screenshot_path = $4,
                completed_at = $5,
                job_title = $6,
                company_name = $7
            WHERE id = $1 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(transition.status.as_str())
        .bind(&transition.error_message)
        .bind(&transition.screenshot_path)
        .bind(transition.completed_at)
        .bind(&transition.job_title)
        .bind(&transition.company_name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::Conflict {
            id,
            expected: ApplicationStatus::Processing.as_str(),
        })
    }

    async fn retry_application(&self, id: Uuid) -> Result<ApplicationRow, StoreError> {
        let current = self
            .get_application(id)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        let reset = state_machine::retry(&current)?;

        // Guarded on the values we validated so a concurrent change cannot be overwritten.
        sqlx::query_as::<_, ApplicationRow>(
            r#"
            UPDATE applications
            SET status = 'pending',
                error_message = NULL,
                completed_at = NULL,
                attempts = $3
            WHERE id = $1 AND status = 'failed' AND attempts = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(current.attempts)
        .bind(reset.attempts)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::Conflict {
            id,
            expected: ApplicationStatus::Failed.as_str(),
        })
    }
}
