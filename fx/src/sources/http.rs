//! HTTPS transport shared by every built-in source.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{FxError, FxResult};

/// Thin GET client. Only `https://` URLs are ever built or followed.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with a request timeout and client identifier.
    pub fn new(timeout: Duration, user_agent: &str) -> FxResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .https_only(true)
            .build()
            .map_err(|e| FxError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Build the request URL for a host and path.
    pub fn url(host: &str, path: &str) -> String {
        format!("https://{}{}", host, path)
    }

    /// GET a JSON document.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_json(&self, source: &str, host: &str, path: &str) -> FxResult<Value> {
        let body = self.get_text(source, host, path).await?;
        serde_json::from_str(&body).map_err(|e| FxError::parse(source, e))
    }

    /// GET a response body as text.
    pub async fn get_text(&self, source: &str, host: &str, path: &str) -> FxResult<String> {
        let url = Self::url(host, path);
        debug!(source, url = %url, "Requesting");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FxError::network(source, e))?
            .error_for_status()
            .map_err(|e| FxError::network(source, e))?;

        response.text().await.map_err(|e| FxError::network(source, e))
    }
}
