//! Flags the scraper's listing row once an application went through.
//!
//! The listing table belongs to the job scraper and may live in another
//! database. Marking is best effort: the application outcome is already
//! persisted when this runs.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::ApplicationRow;

#[async_trait]
pub trait JobMarker: Send + Sync {
    /// Returns how many listing rows were flagged.
    async fn mark_applied(&self, application: &ApplicationRow) -> Result<u64>;
}

/// Updates `<table>.applied` and `<table>.applied_at`, matching on the
/// application's `job_id` when it has one and on the listing URL otherwise.
pub struct PgJobMarker {
    pool: PgPool,
    table: String,
}

impl PgJobMarker {
    pub fn new(pool: PgPool, table: &str) -> Result<Self> {
        if !is_valid_table_name(table) {
            bail!("'{table}' is not a valid table name");
        }
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }
}

#[async_trait]
impl JobMarker for PgJobMarker {
    async fn mark_applied(&self, application: &ApplicationRow) -> Result<u64> {
        let job_id = application
            .job_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());

        let done = match job_id {
            Some(job_id) => {
                let sql = format!(
                    "UPDATE {} SET applied = TRUE, applied_at = NOW() WHERE id::text = $1",
                    self.table
                );
                sqlx::query(&sql).bind(job_id).execute(&self.pool).await?
            }
            None => {
                let sql = format!(
                    "UPDATE {} SET applied = TRUE, applied_at = NOW() WHERE url LIKE $1",
                    self.table
                );
                sqlx::query(&sql)
                    .bind(url_pattern(&application.job_url))
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(done.rows_affected())
    }
}

/// `schema.table` or `table`, letters, digits and underscores only. The name
/// is interpolated into SQL, so nothing else is accepted.
pub fn is_valid_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// LIKE pattern matching any stored URL that contains the listing URL without
/// its query string.
fn url_pattern(job_url: &str) -> String {
    let base = job_url.split('?').next().unwrap_or_default();
    let escaped = base
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}
