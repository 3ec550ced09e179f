//! Chat transports that never touch the network.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::completion::{ChatRequest, ChatResponse, ChatTransport, Role, TransportError, TransportErrorKind};

fn user_content(request: &ChatRequest) -> &str {
    request
        .messages
        .iter()
        .find(|m| m.role == Role::User)
        .map_or("", |m| m.content.as_str())
}

/// A transport that replays a fixed script of responses.
///
/// Once the script is exhausted every call fails with a connect error.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<ChatResponse, TransportError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a successful response with `text`.
    #[must_use]
    pub fn then_ok(self, text: impl Into<String>) -> Self {
        self.script.lock().push_back(Ok(ChatResponse::with_text(text)));
        self
    }

    /// Appends a failure.
    #[must_use]
    pub fn then_err(self, err: TransportError) -> Self {
        self.script.lock().push_back(Err(err));
        self
    }

    /// Number of requests received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// All requests received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError> {
        self.requests.lock().push(request.clone());
        self.script.lock().pop_front().unwrap_or_else(|| {
            Err(TransportError::new(
                TransportErrorKind::Connect,
                "script exhausted",
            ))
        })
    }
}

/// A transport that answers with `prefix + user content`.
///
/// Rows whose user content is registered with [`EchoTransport::fail_on`]
/// get a non-retryable 400. An optional delay simulates endpoint latency;
/// the peak number of concurrent requests is tracked.
#[derive(Debug, Default)]
pub struct EchoTransport {
    prefix: String,
    delay: Option<Duration>,
    failing: Mutex<HashSet<String>>,
    requests: Mutex<Vec<ChatRequest>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl EchoTransport {
    /// Creates an echo transport with the given reply prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Delays every response.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes requests whose user content equals `content` fail.
    #[must_use]
    pub fn fail_on(self, content: impl Into<String>) -> Self {
        self.failing.lock().insert(content.into());
        self
    }

    /// Number of requests received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// User contents of all requests received, in arrival order.
    #[must_use]
    pub fn user_contents(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| user_content(r).to_string())
            .collect()
    }

    /// System prompts of all requests received, in arrival order.
    #[must_use]
    pub fn system_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .filter_map(|r| r.messages.iter().find(|m| m.role == Role::System))
            .map(|m| m.content.clone())
            .collect()
    }

    /// Highest number of requests that were in flight at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatTransport for EchoTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, TransportError> {
        self.requests.lock().push(request.clone());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let content = user_content(request);
        if self.failing.lock().contains(content) {
            return Err(TransportError::status(400, "Bad Request"));
        }
        Ok(ChatResponse::with_text(format!("{}{content}", self.prefix)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(user: &str) -> ChatRequest {
        ChatRequest::for_row("m", "system", user, 1.0, 16)
    }

    #[tokio::test]
    async fn test_scripted_replays_in_order() {
        let transport = ScriptedTransport::new()
            .then_err(TransportError::status(500, "boom"))
            .then_ok("second");

        assert!(transport.send(&request("a")).await.is_err());
        let ok = transport.send(&request("b")).await.unwrap();
        assert_eq!(ok.first_text(), Some("second"));

        let exhausted = transport.send(&request("c")).await.unwrap_err();
        assert_eq!(exhausted.kind, TransportErrorKind::Connect);
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_echo_prefixes_user_content() {
        let transport = EchoTransport::new("S:").fail_on("bad");

        let ok = transport.send(&request("hello")).await.unwrap();
        assert_eq!(ok.first_text(), Some("S:hello"));
        assert!(transport.send(&request("bad")).await.is_err());
        assert_eq!(transport.user_contents(), vec!["hello", "bad"]);
        assert_eq!(transport.system_prompts(), vec!["system", "system"]);
    }
}
