//! HTTP fetch seam
//! GET-only client used for stylesheets and full pages.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::OptimizerError;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; HTMLWordPress-CSS/1.0)";

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// Issue a GET. Transport errors and timeouts are `FetchFailed`;
    /// any status code comes back as a response.
    async fn get(&self, url: &str) -> Result<FetchResponse, OptimizerError>;
}

/// Fetch `url` and require a 2xx status
pub async fn download_resource(fetcher: &dyn HttpFetch, url: &str) -> Result<String, OptimizerError> {
    tracing::debug!("Fetcher: Downloading {}", url);

    let response = fetcher.get(url).await?;
    if !response.is_success() {
        return Err(OptimizerError::FetchFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status),
        });
    }

    tracing::debug!("Fetcher: Downloaded {} bytes from {}", response.body.len(), url);
    Ok(response.body)
}

pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self, OptimizerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| OptimizerError::FetchFailed {
                url: String::new(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn get(&self, url: &str) -> Result<FetchResponse, OptimizerError> {
        let failed = |e: reqwest::Error| OptimizerError::FetchFailed {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(failed)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(failed)?;

        Ok(FetchResponse { status, body })
    }
}
