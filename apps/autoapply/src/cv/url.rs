use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Url};

use super::{file_name_from, CvSource, ResolutionError, ResolvedCv};

/// References are full http(s) URLs fetched with a bounded timeout.
pub struct UrlCvSource {
    client: Client,
}

impl UrlCvSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

pub(crate) fn parse_http_url(reference: &str) -> Result<Url, ResolutionError> {
    let url = Url::parse(reference)
        .map_err(|_| ResolutionError::InvalidReference(reference.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ResolutionError::InvalidReference(reference.to_string())),
    }
}

#[async_trait]
impl CvSource for UrlCvSource {
    fn kind(&self) -> &'static str {
        "url"
    }

    async fn fetch(&self, reference: &str) -> Result<ResolvedCv, ResolutionError> {
        let url = parse_http_url(reference)?;
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ResolutionError::Fetch(format!("timed out fetching {reference}"))
            } else {
                ResolutionError::Fetch(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolutionError::Fetch(format!(
                "GET {reference} returned {status}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ResolutionError::Fetch(e.to_string()))?;
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
    fn test_only_http_urls_are_accepted() {
        assert!(parse_http_url("https://cdn.example.com/cv.pdf").is_ok());
        assert!(parse_http_url("http://cdn.example.com/cv.pdf").is_ok());
        assert!(matches!(
            parse_http_url("file:///etc/passwd"),
            Err(ResolutionError::InvalidReference(_))
        ));
        assert!(matches!(
            parse_http_url("maria.pdf"),
            Err(ResolutionError::InvalidReference(_))
        ));
    }
}
