//! Conversation history and token accounting for one job.

use std::sync::Arc;

use tracing::warn;

use crate::error::LlmError;
use crate::llm::{ChatMessage, LlmProvider, strip_eot_marker};

/// Counts tokens the way the configured model's tokenizer would.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// `tiktoken` BPE counter selected by model name.
pub struct TiktokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

impl TiktokenCounter {
    pub fn new(model: &str) -> Result<Self, LlmError> {
        let bpe = tiktoken_rs::get_bpe_from_model(model).map_err(|e| LlmError::Tokenizer {
            model: model.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Token count of all message contents joined by single spaces.
pub fn count_tokens(counter: &dyn TokenCounter, messages: &[ChatMessage]) -> usize {
    let text = messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    counter.count(&text)
}

/// Strictly longer than `threshold` characters.
pub fn is_string_too_long(s: &str, threshold: usize) -> bool {
    s.chars().count() > threshold
}

/// The model's completion sentinel. Exact match only.
pub fn is_done(reply: &str) -> bool {
    reply == "DONE"
}

/// Condense `text` into a one-line summary with a separate system prompt.
pub async fn summarize_string(
    llm: &dyn LlmProvider,
    summarize_prompt: &str,
    text: &str,
    eot_marker: &str,
) -> Result<String, LlmError> {
    let messages = [ChatMessage::system(summarize_prompt), ChatMessage::user(text)];
    let reply = llm.complete(&messages).await?;
    Ok(strip_eot_marker(&reply, eot_marker).to_string())
}

/// Ordered message history of one job.
///
/// Always starts `[system, user]`; every loop iteration appends exactly one
/// `assistant` reply followed by one `user` message holding the command output.
pub struct ConversationContext {
    messages: Vec<ChatMessage>,
    /// Model context size in tokens; 0 disables the check.
    budget: usize,
    counter: Arc<dyn TokenCounter>,
}

impl ConversationContext {
    pub fn new(
        system_prompt: &str,
        instruction: &str,
        budget: usize,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            messages: vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(instruction),
            ],
            budget,
            counter,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn append_turn(&mut self, llm_reply: &str, exec_output: &str) {
        self.messages.push(ChatMessage::assistant(llm_reply));
        self.messages.push(ChatMessage::user(exec_output));
    }

    pub fn count_tokens(&self) -> usize {
        count_tokens(self.counter.as_ref(), &self.messages)
    }

    /// True when usage is above `threshold` of the budget. Never truncates.
    pub fn context_size_warning_check(&self, threshold: f64) -> bool {
        if self.budget == 0 {
            return false;
        }

        let tokens = self.count_tokens();
        let limit = threshold * self.budget as f64;
        if tokens as f64 > limit {
            warn!(
                tokens,
                budget = self.budget,
                threshold,
                "Conversation is approaching the model context size"
            );
            true
        } else {
            false
        }
    }
}
