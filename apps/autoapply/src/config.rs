use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::automation::screenshots::ScreenshotMode;
use crate::automation::BrowserSettings;

/// Where CV references are resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum CvSourceConfig {
    Local {
        base_path: PathBuf,
    },
    Url {
        timeout: Duration,
    },
    /// `bucket: None` means the reference's first path segment names the bucket.
    S3 {
        bucket: Option<String>,
    },
    AzureBlob {
        account_url: String,
        container: String,
        sas_token: String,
        timeout: Duration,
    },
}

#[derive(Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: Option<String>,
}

// Credentials stay out of logs.
impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ScreenshotSettings {
    /// `None` disables capturing.
    pub mode: Option<ScreenshotMode>,
    pub path: PathBuf,
    pub upload: bool,
}

/// Where the scraper's listing table lives when successes are mirrored to it.
#[derive(Debug, Clone, PartialEq)]
pub struct JobMarkerSettings {
    /// `None` means the scraper shares `DATABASE_URL`.
    pub database_url: Option<String>,
    pub table: String,
}

/// Application configuration loaded from environment variables.
/// Startup aborts with a contextual error on missing or malformed values.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub rust_log: String,
    pub cv_source: CvSourceConfig,
    pub s3: Option<S3Settings>,
    pub browser: BrowserSettings,
    pub screenshots: ScreenshotSettings,
    pub form_profile_path: Option<PathBuf>,
    pub redis_url: Option<String>,
    pub intake_queue: String,
    pub delay_between_applications: Duration,
    pub max_applications_per_run: u32,
    pub stale_claim_grace: Duration,
    pub job_marker: Option<JobMarkerSettings>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env { lookup: &lookup };

        let cv_fetch_timeout = Duration::from_secs(env.parse_or("CV_FETCH_TIMEOUT_SECS", 30u64)?);
        let cv_source = match env.or("CV_SOURCE", "local").to_ascii_lowercase().as_str() {
            "local" => CvSourceConfig::Local {
                base_path: PathBuf::from(env.or("CV_BASE_PATH", "./cvs")),
            },
            "url" => CvSourceConfig::Url {
                timeout: cv_fetch_timeout,
            },
            "s3" => CvSourceConfig::S3 {
                bucket: env.optional("S3_BUCKET"),
            },
            "azure_blob" => CvSourceConfig::AzureBlob {
                account_url: env.require("AZURE_BLOB_ACCOUNT_URL")?,
                container: env.or("AZURE_BLOB_CONTAINER", "cvs"),
                sas_token: env.require("AZURE_BLOB_SAS_TOKEN")?,
                timeout: cv_fetch_timeout,
            },
            other => bail!("CV_SOURCE must be one of local, url, s3, azure_blob (got '{other}')"),
        };

        let upload_screenshots = env.flag_or("UPLOAD_SCREENSHOTS", false)?;
        let needs_s3 = matches!(cv_source, CvSourceConfig::S3 { .. }) || upload_screenshots;
        let s3 = if needs_s3 {
            Some(S3Settings {
                endpoint: env.require("S3_ENDPOINT")?,
                region: env.or("S3_REGION", "us-east-1"),
                access_key_id: env.require("AWS_ACCESS_KEY_ID")?,
                secret_access_key: env.require("AWS_SECRET_ACCESS_KEY")?,
                bucket: env.optional("S3_BUCKET"),
            })
        } else {
            None
        };
        if upload_screenshots && s3.as_ref().and_then(|s| s.bucket.as_ref()).is_none() {
            bail!("UPLOAD_SCREENSHOTS=true requires S3_BUCKET");
        }

        let mode = if env.flag_or("SAVE_SCREENSHOTS", true)? {
            let raw = env.or("SCREENSHOT_MODE", "all");
            Some(
                raw.parse::<ScreenshotMode>()
                    .map_err(anyhow::Error::msg)
                    .context("SCREENSHOT_MODE must be one of all, minimal, errors")?,
            )
        } else {
            None
        };

        let delay_secs: f64 = env.parse_or("DELAY_BETWEEN_APPLICATIONS_SECS", 5.0)?;
        let delay_between_applications = Duration::try_from_secs_f64(delay_secs)
            .context("DELAY_BETWEEN_APPLICATIONS_SECS must be a non-negative number")?;

        let max_applications_per_run: u32 = env.parse_or("MAX_APPLICATIONS_PER_RUN", 50)?;
        if max_applications_per_run == 0 {
            bail!("MAX_APPLICATIONS_PER_RUN must be at least 1");
        }

        let job_marker = if env.flag_or("MARK_SCRAPER_JOBS", false)? {
            let table = env.or("SCRAPER_JOBS_TABLE", "jobs");
            if !crate::pipeline::job_marker::is_valid_table_name(&table) {
                bail!("SCRAPER_JOBS_TABLE must be a plain table name (got '{table}')");
            }
            Some(JobMarkerSettings {
                database_url: env.optional("SCRAPER_DATABASE_URL"),
                table,
            })
        } else {
            None
        };

        Ok(Config {
            database_url: env.require("DATABASE_URL")?,
            port: env
                .parse_or("PORT", 8080u16)
                .context("PORT must be a valid port number")?,
            rust_log: env.or("RUST_LOG", "info"),
            cv_source,
            s3,
            browser: BrowserSettings {
                webdriver_url: env.or("WEBDRIVER_URL", "http://localhost:9515"),
                headless: env.flag_or("BROWSER_HEADLESS", true)?,
                slow_mo: Duration::from_millis(env.parse_or("BROWSER_SLOW_MO_MS", 100)?),
                page_timeout: Duration::from_millis(env.parse_or("PAGE_TIMEOUT_MS", 30_000)?),
                dry_run: env.flag_or("DRY_RUN", false)?,
            },
            screenshots: ScreenshotSettings {
                mode,
                path: PathBuf::from(env.or("SCREENSHOTS_PATH", "./data/screenshots")),
                upload: upload_screenshots,
            },
            form_profile_path: env.optional("FORM_PROFILE_PATH").map(PathBuf::from),
            redis_url: env.optional("REDIS_URL"),
            intake_queue: env.or("INTAKE_QUEUE", "autoapply:applications"),
            delay_between_applications,
            max_applications_per_run,
            stale_claim_grace: Duration::from_secs(env.parse_or("STALE_CLAIM_GRACE_SECS", 600)?),
            job_marker,
        })
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    /// Value of `key`, treating blank as unset.
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn require(&self, key: &str) -> Result<String> {
        self.optional(key)
            .with_context(|| format!("Required environment variable '{key}' is not set"))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.optional(key) {
            Some(raw) => raw
                .parse::<T>()
                .with_context(|| format!("Environment variable '{key}' has an invalid value '{raw}'")),
            None => Ok(default),
        }
    }

    fn flag_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.optional(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) => match v.as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => bail!("Environment variable '{key}' must be true or false (got '{v}')"),
            },
        }
    }
}
