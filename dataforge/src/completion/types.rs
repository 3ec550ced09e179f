//! Wire types for OpenAI-compatible chat completions.

use serde::{Deserialize, Serialize};

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model.
    System,
    /// The row content.
    User,
    /// A model reply.
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Request body for `POST /chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation; always one system and one user message here.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
}

impl ChatRequest {
    /// Builds the two-message request used for every row.
    #[must_use]
    pub fn for_row(
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        user_content: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            model: model.into(),
            messages: vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(user_content),
            ],
            temperature,
            max_tokens,
        }
    }
}

/// Response body for chat completions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    /// Model that produced the answer.
    #[serde(default)]
    pub model: Option<String>,
    /// Generated choices.
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Token accounting.
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// Builds a single-choice response. Used by test transports.
    #[must_use]
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            model: None,
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    content: Some(text.into()),
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        }
    }

    /// Text of the first choice, if any.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
    }

    /// Finish reason of the first choice, if any.
    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.finish_reason.as_deref())
    }
}

/// One generated choice.
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    /// Choice index.
    #[serde(default)]
    pub index: u32,
    /// The generated message.
    pub message: ResponseMessage,
    /// Why generation stopped.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Message inside a choice. Content may be null for refusals.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    /// Generated text.
    #[serde(default)]
    pub content: Option<String>,
}

/// Token usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Completion tokens.
    #[serde(default)]
    pub completion_tokens: u32,
    /// Total tokens.
    #[serde(default)]
    pub total_tokens: u32,
}

/// Error envelope returned by OpenAI-compatible APIs.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    /// Error details.
    pub error: ApiErrorDetail,
}

/// Error details.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    /// Human-readable message.
    pub message: String,
    /// Provider error type.
    #[serde(default, rename = "type")]
    pub error_type: Option<String>,
    /// Provider error code; some providers send numbers.
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

/// A successful completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text, trimmed.
    pub text: String,
    /// Attempts made, including the successful one.
    pub attempts: usize,
    /// Model that answered, if reported.
    pub model: Option<String>,
    /// Finish reason, if reported.
    pub finish_reason: Option<String>,
    /// Token usage, if reported.
    pub usage: Option<Usage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serializes_two_messages() {
        let request = ChatRequest::for_row("deepseek-chat", "Summarize.", "Some text", 1.2, 8192);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value["messages"],
            json!([
                {"role": "system", "content": "Summarize."},
                {"role": "user", "content": "Some text"}
            ])
        );
        assert_eq!(value["model"], "deepseek-chat");
        assert_eq!(value["max_tokens"], 8192);
    }

    #[test]
    fn test_response_parses_first_choice() {
        let body = json!({
            "id": "chatcmpl-1",
            "model": "deepseek-chat",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "A summary."},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13}
        });
        let response: ChatResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.first_text(), Some("A summary."));
        assert_eq!(response.finish_reason(), Some("stop"));
        assert_eq!(response.usage.unwrap().total_tokens, 13);
    }

    #[test]
    fn test_response_tolerates_null_content() {
        let body = json!({"choices": [{"message": {"content": null}}]});
        let response: ChatResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.first_text(), None);
    }

    #[test]
    fn test_api_error_parses() {
        let body = r#"{"error": {"message": "Content Exists Risk", "type": "invalid_request_error", "code": 400}}"#;
        let err: ApiError = serde_json::from_str(body).unwrap();
        assert_eq!(err.error.message, "Content Exists Risk");
        assert_eq!(err.error.error_type.as_deref(), Some("invalid_request_error"));
    }
}
