use async_trait::async_trait;

use super::{file_name_from, CvSource, ResolutionError, ResolvedCv};

/// S3-compatible object storage.
///
/// With a configured bucket the whole reference is the object key; otherwise the
/// first path segment names the bucket (`bucket/path/to/cv.pdf`).
pub struct S3CvSource {
    client: aws_sdk_s3::Client,
    bucket: Option<String>,
}

impl S3CvSource {
    pub fn new(client: aws_sdk_s3::Client, bucket: Option<String>) -> Self {
        Self { client, bucket }
    }

    fn locate<'a>(&'a self, reference: &'a str) -> Result<(&'a str, &'a str), ResolutionError> {
        let reference = reference.trim_start_matches('/');
        let located = match &self.bucket {
            Some(bucket) => Some((bucket.as_str(), reference)),
            None => reference.split_once('/'),
        };
        match located {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
            _ => Err(ResolutionError::InvalidReference(reference.to_string())),
        }
    }
}

#[async_trait]
impl CvSource for S3CvSource {
    fn kind(&self) -> &'static str {
        "s3"
    }

    async fn fetch(&self, reference: &str) -> Result<ResolvedCv, ResolutionError> {
        let (bucket, key) = self.locate(reference)?;
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| ResolutionError::Fetch(format!("s3://{bucket}/{key}: {e}")))?;

        let bytes = object
            .body
            .collect()
            .await
            .map_err(|e| ResolutionError::Fetch(format!("s3://{bucket}/{key}: {e}")))?
            .into_bytes();

        Ok(ResolvedCv {
            bytes,
            file_name: file_name_from(key),
        })
    }
}
