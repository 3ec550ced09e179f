//! Completion client for OpenAI-compatible chat endpoints.
//!
//! Each row becomes one request with exactly two messages: the stage's
//! system prompt and the row's joined source values.

mod client;
pub mod transport;
pub mod types;

pub use client::CompletionClient;
pub use transport::{ChatTransport, HttpTransport, TransportError, TransportErrorKind};
pub use types::{ChatMessage, ChatRequest, ChatResponse, Completion, Role, Usage};
