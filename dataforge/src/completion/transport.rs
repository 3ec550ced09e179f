//! Chat transport seam and its HTTP implementation.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::fmt;
use thiserror::Error;

use super::types::{ApiError, ChatRequest, ChatResponse};
use crate::config::CompletionConfig;
use crate::errors::{DataforgeError, DataforgeResult};
use crate::pipeline::RetryClass;

/// Provider messages that mean the input was refused by a content filter.
const CONTENT_REJECTION_MARKERS: [&str; 3] = [
    "Content Exists Risk",
    "content_filter",
    "content_policy_violation",
];

/// Classification of a failed exchange with the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The request timed out.
    Timeout,
    /// The connection could not be made or was dropped.
    Connect,
    /// The endpoint answered with a non-success status.
    Status(u16),
    /// The response body could not be decoded.
    Decode,
    /// The provider refused the content.
    ContentRejected,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Connect => f.write_str("connect"),
            Self::Status(code) => write!(f, "HTTP {code}"),
            Self::Decode => f.write_str("decode"),
            Self::ContentRejected => f.write_str("content rejected"),
        }
    }
}

/// A failed exchange with the completion endpoint.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    /// Failure classification.
    pub kind: TransportErrorKind,
    /// Provider or client message.
    pub message: String,
}

impl TransportError {
    /// Creates a transport error.
    #[must_use]
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a status error, recognising content-filter rejections.
    #[must_use]
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if is_content_rejection(&message) {
            TransportErrorKind::ContentRejected
        } else {
            TransportErrorKind::Status(code)
        };
        Self { kind, message }
    }

    /// Whether another attempt may succeed.
    #[must_use]
    pub fn retry_class(&self) -> RetryClass {
        match self.kind {
            TransportErrorKind::Timeout
            | TransportErrorKind::Connect
            | TransportErrorKind::Decode => RetryClass::Retryable,
            TransportErrorKind::Status(code) if code == 408 || code == 429 || code >= 500 => {
                RetryClass::Retryable
            }
            TransportErrorKind::Status(_) | TransportErrorKind::ContentRejected => RetryClass::Fatal,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_decode() {
            TransportErrorKind::Decode
        } else if let Some(status) = err.status() {
            TransportErrorKind::Status(status.as_u16())
        } else {
            TransportErrorKind::Connect
        };
        Self::new(kind, err.to_string())
    }
}

fn is_content_rejection(message: &str) -> bool {
    CONTENT_REJECTION_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Sends one chat request and returns the decoded response.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Performs a single exchange. No retrying happens here.
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError>;
}

/// Transport over HTTPS using `reqwest`.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    api_key: String,
    app_name: String,
    site_url: Option<String>,
}

impl HttpTransport {
    /// Builds a transport from the completion configuration.
    pub fn new(config: &CompletionConfig) -> DataforgeResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| DataforgeError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint(),
            api_key: config.api_key.clone(),
            app_name: config.app_name.clone(),
            site_url: config.site_url.clone(),
        })
    }

    /// The chat-completions URL requests are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Title", &self.app_name)
            .json(request);
        if let Some(ref site_url) = self.site_url {
            builder = builder.header("HTTP-Referer", site_url);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json::<ChatResponse>().await?);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = serde_json::from_str::<ApiError>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);

        tracing::debug!(status = status.as_u16(), %message, "Completion endpoint returned an error");
        Err(match status {
            StatusCode::REQUEST_TIMEOUT => TransportError::new(TransportErrorKind::Timeout, message),
            _ => TransportError::status(status.as_u16(), message),
        })
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("app_name", &self.app_name)
            .field("site_url", &self.site_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classes() {
        let retryable = [
            TransportErrorKind::Timeout,
            TransportErrorKind::Connect,
            TransportErrorKind::Decode,
            TransportErrorKind::Status(408),
            TransportErrorKind::Status(429),
            TransportErrorKind::Status(500),
            TransportErrorKind::Status(503),
        ];
        for kind in retryable {
            assert_eq!(
                TransportError::new(kind, "x").retry_class(),
                RetryClass::Retryable,
                "{kind}"
            );
        }

        let fatal = [
            TransportErrorKind::Status(400),
            TransportErrorKind::Status(401),
            TransportErrorKind::Status(404),
            TransportErrorKind::ContentRejected,
        ];
        for kind in fatal {
            assert_eq!(
                TransportError::new(kind, "x").retry_class(),
                RetryClass::Fatal,
                "{kind}"
            );
        }
    }

    #[test]
    fn test_status_detects_content_rejection() {
        let err = TransportError::status(400, "Content Exists Risk");
        assert_eq!(err.kind, TransportErrorKind::ContentRejected);
        assert_eq!(err.retry_class(), RetryClass::Fatal);

        let err = TransportError::status(400, "invalid model");
        assert_eq!(err.kind, TransportErrorKind::Status(400));
    }

    #[test]
    fn test_display() {
        let err = TransportError::status(503, "Service Unavailable");
        assert_eq!(err.to_string(), "HTTP 503: Service Unavailable");
    }

    #[test]
    fn test_http_transport_debug_redacts_key() {
        let transport = HttpTransport::new(&CompletionConfig::new("sk-very-secret")).unwrap();
        let rendered = format!("{transport:?}");
        assert!(!rendered.contains("sk-very-secret"));
        assert!(rendered.contains("https://api.deepseek.com/chat/completions"));
    }
}
