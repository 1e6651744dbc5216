//! LLM integration.
//!
//! Jobs talk to an OpenAI-compatible chat-completions endpoint given by the
//! control plane. The agent only depends on the `LlmProvider` trait so the
//! transport can be swapped (and stubbed in tests).

mod openai;

pub use openai::OpenAiCompatClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A chat model that answers a whole conversation with a single reply.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Name of the model requests are sent to.
    fn model_name(&self) -> &str;

    /// Send the conversation and return the raw content of the reply.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

/// Strip the trailing end-of-turn marker from a reply.
///
/// A doubled marker is stripped completely so the result never ends in the
/// marker, which keeps the function idempotent.
pub fn strip_eot_marker<'a>(reply: &'a str, marker: &str) -> &'a str {
    if marker.is_empty() {
        return reply;
    }
    let mut stripped = reply;
    while let Some(rest) = stripped.strip_suffix(marker) {
        stripped = rest;
    }
    stripped
}

#[cfg(test)]
mod tests {
    use super::*;

    const EOT: &str = "<|eot_id|>";

    #[test]
    fn strips_trailing_marker() {
        assert_eq!(strip_eot_marker("Hello, World!<|eot_id|>", EOT), "Hello, World!");
        assert_eq!(strip_eot_marker("Hello, World!", EOT), "Hello, World!");
    }

    #[test]
    fn strip_is_idempotent() {
        for input in [
            "ls -la<|eot_id|>",
            "ls -la",
            "",
            "<|eot_id|>",
            "DONE<|eot_id|><|eot_id|>",
        ] {
            let once = strip_eot_marker(input, EOT);
            assert_eq!(strip_eot_marker(once, EOT), once, "input: {input:?}");
        }
    }

    #[test]
    fn marker_in_the_middle_is_kept() {
        assert_eq!(
            strip_eot_marker("echo <|eot_id|> done", EOT),
            "echo <|eot_id|> done"
        );
    }

    #[test]
    fn messages_serialize_with_lowercase_roles() {
        let json = serde_json::to_value(ChatMessage::assistant("uptime")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "uptime"}));
    }
}
