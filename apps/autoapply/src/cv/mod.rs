/// CV Resolver: turns an opaque CV reference into file bytes the automation
/// worker can attach.
///
/// One backend is chosen from configuration at startup (`local`, `url`, `s3`,
/// `azure_blob`) and every reference is interpreted by that backend alone.
/// `acquire` writes the bytes to a scoped temporary directory that is removed
/// when the returned `MaterializedCv` is dropped.
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

pub mod azure;
pub mod local;
pub mod materialize;
pub mod s3;
pub mod url;

pub use materialize::MaterializedCv;

use crate::config::CvSourceConfig;

const FALLBACK_FILE_NAME: &str = "cv.pdf";

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("CV not found: {0}")]
    NotFound(String),

    #[error("CV fetch failed: {0}")]
    Fetch(String),

    #[error("invalid CV reference '{0}'")]
    InvalidReference(String),

    #[error("CV I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// CV bytes plus the file name to present to the upload field.
#[derive(Debug, Clone)]
pub struct ResolvedCv {
    pub bytes: Bytes,
    pub file_name: String,
}

/// A CV storage backend.
#[async_trait]
pub trait CvSource: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn fetch(&self, reference: &str) -> Result<ResolvedCv, ResolutionError>;
}

/// Front door used by the orchestrator.
#[derive(Clone)]
pub struct CvResolver {
    source: Arc<dyn CvSource>,
}

impl CvResolver {
    pub fn new(source: Arc<dyn CvSource>) -> Self {
        Self { source }
    }

    /// Builds the backend named by configuration. `s3` must be provided for the S3 backend.
    pub fn from_config(config: &CvSourceConfig, s3: Option<aws_sdk_s3::Client>) -> Result<Self> {
        let source: Arc<dyn CvSource> = match config {
            CvSourceConfig::Local { base_path } => {
                Arc::new(local::LocalCvSource::new(base_path.clone()))
            }
            CvSourceConfig::Url { timeout } => Arc::new(url::UrlCvSource::new(*timeout)?),
            CvSourceConfig::S3 { bucket } => {
                let client = s3.context("CV_SOURCE=s3 requires S3 settings")?;
                Arc::new(s3::S3CvSource::new(client, bucket.clone()))
            }
            CvSourceConfig::AzureBlob {
                account_url,
                container,
                sas_token,
                timeout,
            } => Arc::new(azure::AzureBlobCvSource::new(
                account_url.clone(),
                container.clone(),
                sas_token.clone(),
                *timeout,
            )?),
        };
        Ok(Self::new(source))
    }

    pub fn kind(&self) -> &'static str {
        self.source.kind()
    }

    pub async fn resolve(&self, reference: &str) -> Result<Bytes, ResolutionError> {
        Ok(self.fetch_checked(reference).await?.bytes)
    }

    /// Resolves and writes the CV to a temporary file scoped to the returned value.
    pub async fn acquire(&self, reference: &str) -> Result<MaterializedCv, ResolutionError> {
        let resolved = self.fetch_checked(reference).await?;
        MaterializedCv::write(resolved).await
    }

    async fn fetch_checked(&self, reference: &str) -> Result<ResolvedCv, ResolutionError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ResolutionError::InvalidReference(reference.to_string()));
        }
        let resolved = self.source.fetch(reference).await?;
        if resolved.bytes.is_empty() {
            return Err(ResolutionError::Fetch(format!("'{reference}' is empty")));
        }
        debug!(
            source = self.source.kind(),
            size = resolved.bytes.len(),
            "Resolved CV '{}'",
            resolved.file_name
        );
        Ok(resolved)
    }
}

/// Last path segment of a reference, without query string. Falls back to
/// `cv.pdf` when the segment has no extension.
pub(crate) fn file_name_from(reference: &str) -> String {
    let path = reference.split(['?', '#']).next().unwrap_or_default();
    let segment = path.rsplit('/').next().unwrap_or_default().trim();
    if segment.is_empty() || !segment.contains('.') {
        FALLBACK_FILE_NAME.to_string()
    } else {
        segment.to_string()
    }
}

#[cfg(test)]
pub(crate) struct StaticCvSource {
    pub files: std::collections::HashMap<String, Bytes>,
}

#[cfg(test)]
#[async_trait]
impl CvSource for StaticCvSource {
    fn kind(&self) -> &'static str {
        "static"
    }

    async fn fetch(&self, reference: &str) -> Result<ResolvedCv, ResolutionError> {
        self.files
            .get(reference)
            .map(|bytes| ResolvedCv {
                bytes: bytes.clone(),
                file_name: file_name_from(reference),
            })
            .ok_or_else(|| ResolutionError::NotFound(reference.to_string()))
    }
}
