use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::warn;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_BASE_BACKOFF_MS: u64 = 250;
const MAX_BACKOFF_MS: u64 = 8_000;
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Contact handle issued by the external tag service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactId(pub String);

/// One tag as reported by the external service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTag {
    pub id: String,
    pub name: String,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Failure classes for tag-service calls. Retryable classes cover
/// timeouts, transport failures, and 408/429/5xx responses.
#[derive(Debug, thiserror::Error)]
pub enum TagServiceError {
    #[error("tag service error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("tag service request timed out")]
    Timeout,
    #[error("tag service transport failure: {0}")]
    Transport(String),
    #[error("invalid tag request: {0}")]
    InvalidRequest(String),
}

impl TagServiceError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            TagServiceError::Api { status, .. } => matches!(status, 408 | 429 | 500..=599),
            TagServiceError::Timeout | TagServiceError::Transport(_) => true,
            TagServiceError::InvalidRequest(_) => false,
        }
    }
}

/// Contract the external contact-tagging service must expose. All four
/// operations are idempotent and safe to retry.
#[async_trait]
pub trait ContactTagClient: Send + Sync {
    async fn find_or_create_contact(&self, email: &str) -> Result<ContactId, TagServiceError>;
    async fn apply_tag(&self, contact: &ContactId, tag: &str) -> Result<(), TagServiceError>;
    async fn remove_tag(&self, contact: &ContactId, tag: &str) -> Result<(), TagServiceError>;
    async fn list_tags(&self, contact: &ContactId) -> Result<Vec<RemoteTag>, TagServiceError>;
}

/// Bounded exponential backoff policy for tag-service calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let exp = (attempt.saturating_sub(1) as u32).min(8);
        let base = self.base_delay.as_millis() as u64;
        Duration::from_millis(base.saturating_mul(1 << exp).min(MAX_BACKOFF_MS))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
        )
    }
}

/// Runs one tag-service call under the policy, retrying only retryable
/// failure classes and surfacing permanent ones immediately.
pub async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, TagServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TagServiceError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "tag service call failed, retrying: {err}"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[derive(Debug, Serialize)]
struct ContactLookupRequest<'a> {
    email: &'a str,
}

#[derive(Debug, Deserialize)]
struct ContactEnvelope {
    id: String,
}

#[derive(Debug, Serialize)]
struct TagRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct RemoteTagRow {
    id: String,
    name: String,
    #[serde(default)]
    applied_at: Option<DateTime<Utc>>,
}

/// REST client for the production tag service, authenticating with a
/// bearer token.
#[derive(Debug, Clone)]
pub struct HttpContactTagClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl HttpContactTagClient {
    pub fn new(
        base_url: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Result<Self, TagServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|err| TagServiceError::Transport(err.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport_error(err: reqwest::Error) -> TagServiceError {
        if err.is_timeout() {
            TagServiceError::Timeout
        } else {
            TagServiceError::Transport(err.to_string())
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TagServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = body.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>();
        Err(TagServiceError::api(status.as_u16(), message))
    }
}

#[async_trait]
impl ContactTagClient for HttpContactTagClient {
    async fn find_or_create_contact(&self, email: &str) -> Result<ContactId, TagServiceError> {
        let response = self
            .http
            .post(self.url("/api/v1/contacts"))
            .bearer_auth(&self.api_token)
            .json(&ContactLookupRequest { email })
            .send()
            .await
            .map_err(Self::transport_error)?;

        let envelope: ContactEnvelope = Self::check(response)
            .await?
            .json()
            .await
            .map_err(Self::transport_error)?;
        Ok(ContactId(envelope.id))
    }

    async fn apply_tag(&self, contact: &ContactId, tag: &str) -> Result<(), TagServiceError> {
        let response = self
            .http
            .post(self.url(&format!("/api/v1/contacts/{}/tags", contact.0)))
            .bearer_auth(&self.api_token)
            .json(&TagRequest { name: tag })
            .send()
            .await
            .map_err(Self::transport_error)?;

        Self::check(response).await.map(|_| ())
    }

    async fn remove_tag(&self, contact: &ContactId, tag: &str) -> Result<(), TagServiceError> {
        let response = self
            .http
            .delete(self.url(&format!("/api/v1/contacts/{}/tags", contact.0)))
            .bearer_auth(&self.api_token)
            .json(&TagRequest { name: tag })
            .send()
            .await
            .map_err(Self::transport_error)?;

        Self::check(response).await.map(|_| ())
    }

    async fn list_tags(&self, contact: &ContactId) -> Result<Vec<RemoteTag>, TagServiceError> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/contacts/{}/tags", contact.0)))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let rows: Vec<RemoteTagRow> = Self::check(response)
            .await?
            .json()
            .await
            .map_err(Self::transport_error)?;

        Ok(rows
            .into_iter()
            .map(|row| RemoteTag {
                id: row.id,
                name: row.name,
                applied_at: row.applied_at,
            })
            .collect())
    }
}
