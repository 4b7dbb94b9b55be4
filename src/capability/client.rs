use crate::error::{Error, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use url::Url;

/// JSON-over-HTTP client shared by the capability backends
///
/// Requests are sent once. Retrying is the orchestrator's job, at stage
/// granularity.
#[derive(Debug, Clone)]
pub struct CapabilityClient {
    client: Client,
    base_url: Url,
}

impl CapabilityClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid backend URL '{}': {}", base_url, e)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid backend URL: {}", e)))
    }

    /// POST `body` as JSON to `path` and decode the JSON reply. Transport,
    /// status and decode failures are reported through `on_error`.
    pub async fn post_json<B, R>(
        &self,
        path: &str,
        body: &B,
        on_error: fn(String) -> Error,
    ) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| on_error(format!("Request to {} failed: {}", url, e)))?;

        let response = response
            .error_for_status()
            .map_err(|e| on_error(format!("Backend at {} returned an error: {}", url, e)))?;

        response
            .json::<R>()
            .await
            .map_err(|e| on_error(format!("Malformed response from {}: {}", url, e)))
    }
}
