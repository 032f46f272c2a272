//! Attachment rehosting through a durable bulk-upload service.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use desk_core::{
    is_retryable_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error, RetryPolicy,
};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("upload request failed: {0}")]
    Transport(String),
    #[error("upload service returned status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("upload service returned {returned} results for {requested} urls")]
    ResultCountMismatch { requested: usize, returned: usize },
    #[error("upload response could not be decoded: {0}")]
    InvalidResponse(String),
}

/// Bulk upload of remote files to durable storage.
#[async_trait]
pub trait UploadService: Send + Sync {
    /// Returns one entry per input url, in order; `None` marks a failed item.
    async fn upload_from_urls(&self, urls: &[String]) -> Result<Vec<Option<String>>, UploadError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadClientConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for UploadClientConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.uploadthing.com".to_string(),
            api_key: String::new(),
            request_timeout_ms: 30_000,
            retry_max_attempts: 2,
            retry_base_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    #[serde(rename = "ufsUrl")]
    ufs_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResult {
    #[serde(default)]
    data: Option<UploadedFile>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// HTTP client for the upload-from-url endpoint.
///
/// Sends `{"urls": [...]}` and expects `[{"data": {"ufsUrl": ...} | null, "error": ...}]`.
#[derive(Clone)]
pub struct HttpUploadClient {
    http: reqwest::Client,
    endpoint: String,
    retry: RetryPolicy,
}

impl HttpUploadClient {
    pub fn new(config: UploadClientConfig) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let mut api_key = reqwest::header::HeaderValue::from_str(config.api_key.trim())
            .context("upload api key contains invalid header characters")?;
        api_key.set_sensitive(true);
        headers.insert("x-uploadthing-api-key", api_key);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create upload api client")?;

        Ok(Self {
            http,
            endpoint: format!(
                "{}/v6/uploadFilesFromUrl",
                config.api_base.trim_end_matches('/')
            ),
            retry: RetryPolicy::new(config.retry_max_attempts, config.retry_base_delay_ms),
        })
    }
}

#[async_trait]
impl UploadService for HttpUploadClient {
    async fn upload_from_urls(&self, urls: &[String]) -> Result<Vec<Option<String>>, UploadError> {
        let payload = json!({ "urls": urls });
        let mut attempt = 0_usize;
        let response = loop {
            attempt = attempt.saturating_add(1);
            match self
                .http
                .post(&self.endpoint)
                .header("x-desk-retry-attempt", attempt.saturating_sub(1).to_string())
                .json(&payload)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => break response,
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if self.retry.allows_retry(attempt) && is_retryable_status(status) {
                        tokio::time::sleep(retry_delay(
                            self.retry.base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }
                    return Err(UploadError::Status {
                        status,
                        detail: truncate_for_error(&body, 800),
                    });
                }
                Err(error) => {
                    if self.retry.allows_retry(attempt) && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry.base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(UploadError::Transport(error.to_string()));
                }
            }
        };

        let results = response
            .json::<Vec<UploadResult>>()
            .await
            .map_err(|error| UploadError::InvalidResponse(error.to_string()))?;
        if results.len() != urls.len() {
            return Err(UploadError::ResultCountMismatch {
                requested: urls.len(),
                returned: results.len(),
            });
        }

        Ok(results
            .into_iter()
            .zip(urls)
            .map(|(result, url)| {
                if let Some(error) = &result.error {
                    tracing::debug!(url = %url, error = %error, "attachment upload item failed");
                }
                result
                    .data
                    .and_then(|file| file.ufs_url)
                    .filter(|value| !value.trim().is_empty())
            })
            .collect())
    }
}

/// Maps each original attachment url to its durable replacement.
///
/// Items that failed to upload are absent. A failure of the whole batch
/// yields an empty map so capture can continue with the original urls.
pub async fn rehost_attachments(
    service: &dyn UploadService,
    urls: &[String],
    timeout: Duration,
) -> HashMap<String, String> {
    let mut seen = HashSet::new();
    let unique = urls
        .iter()
        .filter(|url| seen.insert(url.as_str()))
        .cloned()
        .collect::<Vec<_>>();
    if unique.is_empty() {
        return HashMap::new();
    }

    let uploaded = match tokio::time::timeout(timeout, service.upload_from_urls(&unique)).await {
        Ok(Ok(uploaded)) => uploaded,
        Ok(Err(error)) => {
            tracing::warn!(error = %error, urls = unique.len(), "attachment rehosting failed; keeping original urls");
            return HashMap::new();
        }
        Err(_) => {
            tracing::warn!(
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                urls = unique.len(),
                "attachment rehosting timed out; keeping original urls"
            );
            return HashMap::new();
        }
    };

    unique
        .into_iter()
        .zip(uploaded)
        .filter_map(|(original, durable)| durable.map(|durable| (original, durable)))
        .collect()
}
