use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::{ResolutionError, ResolvedCv};

/// A CV written to a private temporary directory.
///
/// The directory and file are deleted when this value is dropped, whatever the
/// outcome of the attempt that used it.
#[derive(Debug)]
pub struct MaterializedCv {
    _dir: TempDir,
    path: PathBuf,
    file_name: String,
    size: usize,
}

impl MaterializedCv {
    pub async fn write(resolved: ResolvedCv) -> Result<Self, ResolutionError> {
        let dir = tempfile::Builder::new().prefix("autoapply-cv-").tempdir()?;
        let file_name = sanitize(&resolved.file_name);
        let path = dir.path().join(&file_name);
        tokio::fs::write(&path, &resolved.bytes).await?;
        Ok(Self {
            _dir: dir,
            path,
            file_name,
            size: resolved.bytes.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

fn sanitize(file_name: &str) -> String {
    let cleaned: String = file_name
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches('.').trim();
    if cleaned.is_empty() {
        super::FALLBACK_FILE_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_separators() {
        assert_eq!(sanitize("maria.pdf"), "maria.pdf");
        assert_eq!(sanitize("../../x.pdf"), "_.._x.pdf");
        assert_eq!(sanitize(".."), "cv.pdf");
    }

    #[tokio::test]
    async fn test_write_reports_size() {
        let cv = MaterializedCv::write(ResolvedCv {
            bytes: bytes::Bytes::from_static(b"%PDF-1.7"),
            file_name: "luca.pdf".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(cv.size(), 8);
        assert_eq!(cv.file_name(), "luca.pdf");
        assert_eq!(std::fs::read(cv.path()).unwrap(), b"%PDF-1.7");
    }
}
