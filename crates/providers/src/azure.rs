//! Submit-then-poll plumbing shared by the Azure cognitive endpoints.

use crate::retry::{with_retry, RetryPolicy};
use crate::{ensure_success, ProviderError};
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

#[derive(Clone, Debug)]
pub struct AzureConfig {
    pub endpoint: String,
    pub key: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    /// Upper bound on polling before the operation is abandoned.
    pub max_wait: Duration,
    pub max_retries: usize,
}

impl AzureConfig {
    pub fn new(endpoint: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            key: key.into(),
            request_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(300),
            max_retries: 3,
        }
    }
}

#[derive(Clone)]
pub(crate) struct AzureOperation {
    client: Client,
    cfg: AzureConfig,
    retry: RetryPolicy,
}

impl AzureOperation {
    pub(crate) fn new(cfg: AzureConfig) -> Result<Self, ProviderError> {
        if cfg.endpoint.trim().is_empty() || cfg.key.trim().is_empty() {
            return Err(ProviderError::Config(
                "azure endpoint and key are both required".into(),
            ));
        }
        let client = Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;
        Ok(Self {
            client,
            retry: RetryPolicy::new(cfg.max_retries),
            cfg,
        })
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.endpoint.trim_end_matches('/'), path)
    }

    async fn submit_once(
        &self,
        url: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<String, ProviderError> {
        let resp = self
            .client
            .post(url)
            .header(KEY_HEADER, &self.cfg.key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        resp.headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::InvalidResponse("missing Operation-Location header".into())
            })
    }

    async fn poll_once(&self, operation: &str) -> Result<serde_json::Value, ProviderError> {
        let resp = self
            .client
            .get(operation)
            .header(KEY_HEADER, &self.cfg.key)
            .send()
            .await?;
        let resp = ensure_success(resp).await?;
        Ok(resp.json().await?)
    }

    /// Posts `body` and waits for the long-running operation to finish,
    /// returning the final status document.
    pub(crate) async fn run(
        &self,
        label: &str,
        url: &str,
        content_type: &str,
        body: Bytes,
    ) -> Result<serde_json::Value, ProviderError> {
        let operation = with_retry(&self.retry, label, || {
            self.submit_once(url, content_type, body.clone())
        })
        .await?;

        let deadline = tokio::time::Instant::now() + self.cfg.max_wait;
        loop {
            tokio::time::sleep(self.cfg.poll_interval).await;
            let status = with_retry(&self.retry, label, || self.poll_once(&operation)).await?;
            match status["status"].as_str().unwrap_or_default() {
                "succeeded" => return Ok(status),
                "failed" => {
                    return Err(ProviderError::RequestFailed(format!(
                        "{} operation failed: {}",
                        label, status["error"]
                    )))
                }
                other => debug!("{} operation {}", label, other),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ProviderError::Timeout(format!(
                    "{} did not finish within {:?}",
                    label, self.cfg.max_wait
                )));
            }
        }
    }
}
