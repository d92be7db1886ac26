use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};

use super::{file_name_from, CvSource, ResolutionError, ResolvedCv};

const AZURE_API_VERSION: &str = "2021-08-06";

/// Azure Blob Storage over its REST API, authenticated with a SAS token.
/// References are blob names inside the configured container.
pub struct AzureBlobCvSource {
    client: Client,
    account_url: Url,
    container: String,
    sas_token: String,
}

impl AzureBlobCvSource {
    pub fn new(
        account_url: String,
        container: String,
        sas_token: String,
        timeout: Duration,
    ) -> Result<Self> {
        let account_url = Url::parse(&account_url)?;
        if account_url.cannot_be_a_base() {
            anyhow::bail!("Azure account URL {account_url} cannot hold blob paths");
        }
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            account_url,
            container: container.trim_matches('/').to_string(),
            sas_token: sas_token.trim_start_matches('?').to_string(),
        })
    }

    /// Each path segment of the blob name is percent-encoded, so spaces, `#`
    /// and `?` stay inside the name instead of reaching the SAS query.
    fn blob_url(&self, blob: &str) -> Url {
        let mut url = self.account_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(self.container.split('/').filter(|s| !s.is_empty()))
                .extend(blob.split('/').filter(|s| !s.is_empty()));
        }
        url.set_query((!self.sas_token.is_empty()).then_some(self.sas_token.as_str()));
        url
    }
}

#[async_trait]
impl CvSource for AzureBlobCvSource {
    fn kind(&self) -> &'static str {
        "azure_blob"
    }

    async fn fetch(&self, reference: &str) -> Result<ResolvedCv, ResolutionError> {
        // The URL carries the SAS token, so errors only ever mention the blob name.
        let response = self
            .client
            .get(self.blob_url(reference))
            .header("x-ms-version", AZURE_API_VERSION)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() { "timed out" } else { "request failed" };
                ResolutionError::Fetch(format!("blob '{reference}': {kind}"))
            })?;

        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(ResolutionError::Fetch(format!("blob '{reference}' does not exist")));
            }
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                return Err(ResolutionError::Fetch(format!(
                    "access to blob '{reference}' denied"
                )));
            }
            s => {
                return Err(ResolutionError::Fetch(format!("blob '{reference}' returned {s}")));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|_| ResolutionError::Fetch(format!("blob '{reference}': body read failed")))?;
        Ok(ResolvedCv {
            bytes,
            file_name: file_name_from(reference),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_url_normalizes_separators() {
        let source = AzureBlobCvSource::new(
            "https://acct.blob.core.windows.net/".to_string(),
            "/cvs/".to_string(),
            "?sv=2022&sig=abc".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            source.blob_url("/2024/maria.pdf").as_str(),
            "https://acct.blob.core.windows.net/cvs/2024/maria.pdf?sv=2022&sig=abc"
        );
    }

    #[test]
    fn test_blob_url_encodes_reserved_characters() {
        let source = AzureBlobCvSource::new(
            "https://acct.blob.core.windows.net".to_string(),
            "cvs".to_string(),
            "sv=2022&sig=abc".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();
        let url = source.blob_url("2024/maria rossi#1?.pdf");
        assert_eq!(
            url.as_str(),
            "https://acct.blob.core.windows.net/cvs/2024/maria%20rossi%231%3F.pdf?sv=2022&sig=abc"
        );
        assert_eq!(url.query(), Some("sv=2022&sig=abc"));
    }

    #[test]
    fn test_rejects_unusable_account_url() {
        for bad in ["not a url", "mailto:ops@example.com"] {
            assert!(AzureBlobCvSource::new(
                bad.to_string(),
                "cvs".to_string(),
                String::new(),
                Duration::from_secs(5),
            )
            .is_err());
        }
    }
}
