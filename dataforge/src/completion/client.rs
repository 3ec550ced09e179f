//! Completion client: one system prompt, one user message, bounded retries.

use std::sync::Arc;
use tracing::{debug, warn};

use super::transport::{ChatTransport, HttpTransport, TransportError};
use super::types::{ChatRequest, Completion};
use crate::config::CompletionConfig;
use crate::errors::{CompletionError, DataforgeResult, EmptyCompletionError};
use crate::pipeline::{RetryConfig, RetryPolicy};

/// Sends row contents to the chat-completion endpoint.
///
/// Transient transport failures are retried according to the configured
/// [`RetryPolicy`]; the number of attempts is reported on both success and
/// failure.
#[derive(Clone)]
pub struct CompletionClient {
    transport: Arc<dyn ChatTransport>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    policy: RetryPolicy,
}

impl CompletionClient {
    /// Creates a client over an arbitrary transport.
    #[must_use]
    pub fn new(transport: Arc<dyn ChatTransport>, config: &CompletionConfig) -> Self {
        Self {
            transport,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            policy: RetryPolicy::new(config.retry.clone()),
        }
    }

    /// Creates a client that talks HTTP to `config.base_url`.
    pub fn from_config(config: &CompletionConfig) -> DataforgeResult<Self> {
        let transport = HttpTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.policy = RetryPolicy::new(retry);
        self
    }

    /// The model sent with each request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The retry policy in use.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Requests a completion for `user_content` under `system_prompt`.
    ///
    /// Returns the trimmed response text.
    ///
    /// # Errors
    ///
    /// - [`CompletionError`] once the attempt budget is spent, or right away
    ///   for failures that are not worth retrying (client errors, content
    ///   rejections).
    /// - [`EmptyCompletionError`] if the endpoint answers with blank text.
    pub async fn complete(&self, system_prompt: &str, user_content: &str) -> DataforgeResult<Completion> {
        let request = ChatRequest::for_row(
            self.model.as_str(),
            system_prompt,
            user_content,
            self.temperature,
            self.max_tokens,
        );

        let outcome = self
            .policy
            .run(
                |_| self.transport.send(&request),
                TransportError::retry_class,
            )
            .await;
        let attempts = outcome.attempts;

        let response = match outcome.result {
            Ok(response) => response,
            Err(err) => {
                warn!(attempts, kind = %err.kind, error = %err.message, "Completion failed");
                return Err(CompletionError::new(attempts, err.to_string()).into());
            }
        };

        let text = response.first_text().map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return Err(EmptyCompletionError { attempts }.into());
        }

        debug!(attempts, chars = text.chars().count(), "Completion received");
        Ok(Completion {
            text: text.to_string(),
            attempts,
            model: response.model.clone(),
            finish_reason: response.finish_reason().map(str::to_string),
            usage: response.usage,
        })
    }
}

impl std::fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClient")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::transport::TransportErrorKind;
    use crate::completion::types::Role;
    use crate::errors::DataforgeError;
    use crate::testing::ScriptedTransport;

    fn client(transport: &Arc<ScriptedTransport>) -> CompletionClient {
        CompletionClient::new(transport.clone(), &CompletionConfig::new("sk-test"))
    }

    fn unavailable() -> TransportError {
        TransportError::status(503, "Service Unavailable")
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_two_failures_reports_three_attempts() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .then_err(unavailable())
                .then_err(TransportError::new(TransportErrorKind::Timeout, "timed out"))
                .then_ok("  A summary.  "),
        );

        let completion = client(&transport).complete("Summarize.", "text").await.unwrap();

        assert_eq!(completion.text, "A summary.");
        assert_eq!(completion.attempts, 3);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_exhaust_budget() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .then_err(unavailable())
                .then_err(unavailable())
                .then_err(unavailable())
                .then_ok("never reached"),
        );

        let err = client(&transport).complete("s", "u").await.unwrap_err();

        assert!(matches!(err, DataforgeError::Completion(ref e) if e.attempts == 3));
        assert!(err.to_string().contains("503"));
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_rejection_is_not_retried() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .then_err(TransportError::status(400, "Content Exists Risk"))
                .then_ok("unused"),
        );

        let err = client(&transport).complete("s", "u").await.unwrap_err();

        assert_eq!(err.attempts(), Some(1));
        assert!(!err.is_fatal());
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_blank_response_is_empty_completion() {
        let transport = Arc::new(ScriptedTransport::new().then_ok("   \n "));

        let err = client(&transport).complete("s", "u").await.unwrap_err();

        assert!(matches!(err, DataforgeError::EmptyCompletion(_)));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_request_has_system_then_user_message() {
        let transport = Arc::new(ScriptedTransport::new().then_ok("ok"));

        client(&transport)
            .complete("You are a summarizer.", "Title\nBody")
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let messages = &requests[0].messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "You are a summarizer.");
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "Title\nBody");
        assert_eq!(requests[0].model, "deepseek-chat");
    }
}
