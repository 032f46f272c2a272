use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use desk_core::{
    is_retryable_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error, RetryPolicy,
};
use desk_types::{Classification, TicketCategory};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{Classifier, ClassifierError};

pub const DEFAULT_CLASSIFIER_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str = "You triage support requests for a game community. \
Pick the single category that best fits the user's text: general_support for questions \
and account help, game_issues for bugs and gameplay problems, user_reports for reports \
about other players, staff_reports_management for complaints about staff or requests for \
management. Rate severity from 1 (minor) to 10 (urgent).";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiClassifierConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for OpenAiClassifierConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: DEFAULT_CLASSIFIER_MODEL.to_string(),
            request_timeout_ms: 20_000,
            retry_max_attempts: 2,
            retry_base_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CategoryResponse {
    category: String,
    severity: f64,
}

/// Classifier backed by an OpenAI-compatible chat completions endpoint with a
/// strict JSON schema response format.
#[derive(Clone)]
pub struct OpenAiClassifier {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    retry: RetryPolicy,
}

impl OpenAiClassifier {
    pub fn new(config: OpenAiClassifierConfig) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut bearer =
            reqwest::header::HeaderValue::from_str(&format!("Bearer {}", config.api_key.trim()))
                .context("classifier api key contains invalid header characters")?;
        bearer.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create classifier api client")?;

        let base = config.api_base.trim_end_matches('/');
        let endpoint = if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/chat/completions")
        };

        Ok(Self {
            http,
            endpoint,
            model: config.model,
            retry: RetryPolicy::new(config.retry_max_attempts, config.retry_base_delay_ms),
        })
    }
}

fn request_body(model: &str, text: &str) -> Value {
    let categories = TicketCategory::ALL
        .iter()
        .map(|category| category.as_str())
        .collect::<Vec<_>>();
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": text },
        ],
        "response_format": {
            "type": "json_schema",
            "json_schema": {
                "name": "category_response",
                "strict": true,
                "schema": {
                    "type": "object",
                    "properties": {
                        "category": {
                            "type": "string",
                            "description": "The category of the user's text.",
                            "enum": categories,
                        },
                        "severity": {
                            "type": "number",
                            "description": "Severity or urgency rating on a scale from 1 to 10.",
                        },
                    },
                    "required": ["category", "severity"],
                    "additionalProperties": false,
                },
            },
        },
    })
}

fn parse_classification(raw: &str) -> Result<Classification, ClassifierError> {
    let completion = serde_json::from_str::<ChatCompletion>(raw)
        .map_err(|error| ClassifierError::InvalidResponse(error.to_string()))?;
    let content = completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(ClassifierError::Empty)?;
    let response = serde_json::from_str::<CategoryResponse>(&content)
        .map_err(|error| ClassifierError::InvalidResponse(error.to_string()))?;

    let category = response
        .category
        .parse::<TicketCategory>()
        .map_err(|error| ClassifierError::InvalidResponse(error.to_string()))?;
    if !response.severity.is_finite() || response.severity < 1.0 {
        return Err(ClassifierError::Empty);
    }
    let severity = response.severity.round().min(10.0) as u8;
    Ok(Classification { category, severity })
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError> {
        let body = request_body(&self.model, text);
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            match self
                .http
                .post(&self.endpoint)
                .header("x-desk-retry-attempt", attempt.saturating_sub(1).to_string())
                .json(&body)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retry_after = parse_retry_after(response.headers());
                    let raw = response
                        .text()
                        .await
                        .map_err(|error| ClassifierError::Transport(error.to_string()))?;
                    if (200..300).contains(&status) {
                        let classification = parse_classification(&raw)?;
                        tracing::debug!(
                            category = classification.category.as_str(),
                            severity = classification.severity,
                            "classified ticket request"
                        );
                        return Ok(classification);
                    }
                    if self.retry.allows_retry(attempt) && is_retryable_status(status) {
                        tokio::time::sleep(retry_delay(
                            self.retry.base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }
                    return Err(ClassifierError::Status {
                        status,
                        detail: truncate_for_error(&raw, 800),
                    });
                }
                Err(error) => {
                    if self.retry.allows_retry(attempt) && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry.base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(ClassifierError::Transport(error.to_string()));
                }
            }
        }
    }
}
