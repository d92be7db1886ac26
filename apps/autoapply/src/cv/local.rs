use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use super::{CvSource, ResolutionError, ResolvedCv};

/// References are file names relative to `base_path`.
pub struct LocalCvSource {
    base_path: PathBuf,
}

impl LocalCvSource {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    /// Joins the reference onto the base directory, refusing anything that
    /// could escape it.
    fn path_for(&self, reference: &str) -> Result<PathBuf, ResolutionError> {
        let relative = Path::new(reference);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ResolutionError::InvalidReference(reference.to_string()));
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl CvSource for LocalCvSource {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn fetch(&self, reference: &str) -> Result<ResolvedCv, ResolutionError> {
        let path = self.path_for(reference)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ResolutionError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| super::file_name_from(reference));
        Ok(ResolvedCv {
            bytes: Bytes::from(bytes),
            file_name,
        })
    }
}
