use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use aws_sdk_s3::primitives::ByteStream;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

/// Which steps of an attempt are captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenshotMode {
    All,
    /// Before submit, final states and errors.
    Minimal,
    /// Error states and the post-submit page.
    Errors,
}

impl FromStr for ScreenshotMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(ScreenshotMode::All),
            "minimal" => Ok(ScreenshotMode::Minimal),
            "errors" => Ok(ScreenshotMode::Errors),
            other => Err(format!("unknown screenshot mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStep {
    PageLoaded,
    AfterApplyClick,
    FormVisible,
    BeforeSubmit,
    Success,
    AfterSubmit,
    /// Listing closed, already applied or external-only.
    Skipped,
    ApplyButtonMissing,
    FormMissing,
    Error,
}

impl CaptureStep {
    pub fn suffix(&self) -> &'static str {
        match self {
            CaptureStep::PageLoaded => "page_loaded",
            CaptureStep::AfterApplyClick => "after_apply_click",
            CaptureStep::FormVisible => "form_visible",
            CaptureStep::BeforeSubmit => "before_submit",
            CaptureStep::Success => "success",
            CaptureStep::AfterSubmit => "after_submit",
            CaptureStep::Skipped => "skipped",
            CaptureStep::ApplyButtonMissing => "error_no_apply_button",
            CaptureStep::FormMissing => "error_no_form",
            CaptureStep::Error => "error",
        }
    }

    fn is_error(&self) -> bool {
        matches!(
            self,
            CaptureStep::ApplyButtonMissing | CaptureStep::FormMissing | CaptureStep::Error
        )
    }
}

impl ScreenshotMode {
    pub fn captures(&self, step: CaptureStep) -> bool {
        match self {
            ScreenshotMode::All => true,
            ScreenshotMode::Minimal => {
                step.is_error()
                    || matches!(
                        step,
                        CaptureStep::BeforeSubmit
                            | CaptureStep::Success
                            | CaptureStep::AfterSubmit
                            | CaptureStep::Skipped
                    )
            }
            ScreenshotMode::Errors => step.is_error() || step == CaptureStep::AfterSubmit,
        }
    }
}

/// Optional mirror of every capture into S3 under `screenshots/`.
#[derive(Clone)]
pub struct ScreenshotUploader {
    pub client: aws_sdk_s3::Client,
    pub bucket: String,
}

/// Writes page captures (PNG + HTML) to a local directory.
#[derive(Clone)]
pub struct ScreenshotStore {
    dir: PathBuf,
    /// `None` disables capturing entirely.
    mode: Option<ScreenshotMode>,
    uploader: Option<ScreenshotUploader>,
}

impl ScreenshotStore {
    pub fn new(dir: PathBuf, mode: Option<ScreenshotMode>, uploader: Option<ScreenshotUploader>) -> Self {
        Self { dir, mode, uploader }
    }

    pub fn disabled() -> Self {
        Self::new(PathBuf::new(), None, None)
    }

    pub fn wants(&self, step: CaptureStep) -> bool {
        self.mode.map_or(false, |mode| mode.captures(step))
    }

    /// Persists one capture and returns the PNG path. Upload failures are
    /// logged and never fail the capture.
    pub async fn save(
        &self,
        application_id: Uuid,
        step: CaptureStep,
        png: Vec<u8>,
        html: String,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let base = format!(
            "app_{}_{}_{}",
            application_id,
            step.suffix(),
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        let png_path = self.dir.join(format!("{base}.png"));
        let html_path = self.dir.join(format!("{base}.html"));
        tokio::fs::write(&png_path, &png).await?;
        tokio::fs::write(&html_path, html.as_bytes()).await?;
        info!("Screenshot saved: {}", png_path.display());

        if let Some(uploader) = &self.uploader {
            let uploads = [
                (format!("screenshots/{base}.png"), png, "image/png"),
                (
                    format!("screenshots/{base}.html"),
                    html.into_bytes(),
                    "text/html; charset=utf-8",
                ),
            ];
            for (key, body, content_type) in uploads {
                if let Err(e) = uploader
                    .client
                    .put_object()
                    .bucket(&uploader.bucket)
                    .key(&key)
                    .body(ByteStream::from(body))
                    .content_type(content_type)
                    .send()
                    .await
                {
                    warn!("Screenshot upload to s3://{}/{} failed: {e}", uploader.bucket, key);
                }
            }
        }

        Ok(png_path)
    }
}
