//! Language-model backend client.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::error::BackendError;
use crate::models::AssembledPrompt;
use crate::settings::BackendConfig;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// One call to the language model. Implementations make a single attempt;
/// retries and timeouts belong to the dispatcher.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &AssembledPrompt, session_token: &str) -> Result<String, BackendError>;
}

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    user_query: &'a str,
    context: QueryContext<'a>,
}

#[derive(Debug, Serialize)]
struct QueryContext<'a> {
    excerpt: &'a str,
    asked_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    detail: Option<String>,
    message: Option<String>,
}

/// Server-side view of a session's remaining questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct QuotaStatus {
    pub remaining: u32,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// HTTP client for the hosted query API.
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        config.check_transport()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .https_only(!config.allow_insecure_http)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the backend how many questions the session has left today.
    pub async fn fetch_quota(&self, session_token: &str) -> Result<QuotaStatus, BackendError> {
        let response = self
            .client
            .get(format!("{}/api/quota", self.base_url))
            .bearer_auth(session_token)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json::<QuotaStatus>()
            .await
            .map_err(|e| BackendError::Transient(format!("unreadable quota response: {e}")))
    }
}

#[async_trait]
impl LanguageModel for HttpBackend {
    async fn complete(&self, prompt: &AssembledPrompt, session_token: &str) -> Result<String, BackendError> {
        debug!(
            "POST /api/query request={} excerpt_chars={}",
            prompt.request_id,
            prompt.context_excerpt.chars().count()
        );

        let body = QueryBody {
            user_query: &prompt.question,
            context: QueryContext {
                excerpt: &prompt.context_excerpt,
                asked_at: prompt.asked_at,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/query", self.base_url))
            .bearer_auth(session_token)
            .header(REQUEST_ID_HEADER, prompt.request_id.to_string())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed = response
            .json::<QueryResponse>()
            .await
            .map_err(|e| BackendError::Transient(format!("unreadable answer: {e}")))?;

        match parsed.response {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(BackendError::Transient("backend returned an empty answer".into())),
        }
    }
}

fn transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Transient("request timed out".into())
    } else if err.is_connect() {
        BackendError::Transient("could not reach the backend".into())
    } else {
        BackendError::Transient(err.to_string())
    }
}

/// Pull a human-readable message out of an error body, falling back to the
/// raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error.or(b.detail).or(b.message))
        .unwrap_or_else(|| body.trim().to_string())
}

fn classify_status(status: StatusCode, body: &str) -> BackendError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized,
        s if s.is_server_error() => BackendError::Transient(format!("server error {}", s.as_u16())),
        StatusCode::REQUEST_TIMEOUT => BackendError::Transient("backend timed out".into()),
        s => {
            let mut message = error_message(body);
            if message.is_empty() {
                message = match s {
                    StatusCode::TOO_MANY_REQUESTS => "You've reached your daily query limit".to_string(),
                    _ => format!("request refused ({})", s.as_u16()),
                };
            }
            BackendError::Rejected {
                status: s.as_u16(),
                message,
            }
        }
    }
}
