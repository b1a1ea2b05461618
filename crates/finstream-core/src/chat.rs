//! Chat payloads and the chat log reducer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatSender {
    User,
    Assistant,
}

/// Chat message pushed by the server.
///
/// Assistant replies stream word by word: every partial carries the full
/// text so far with `is_complete = false`, and the last one is complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message: String,
    pub sender: ChatSender,
    #[serde(with = "crate::timestamp")]
    pub timestamp: DateTime<Utc>,
    pub is_complete: bool,
}

impl ChatMessage {
    /// Check if this is an assistant reply still being streamed.
    pub fn is_partial_assistant(&self) -> bool {
        self.sender == ChatSender::Assistant && !self.is_complete
    }
}

/// Outbound chat frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Merge an incoming message into a chat log.
///
/// An incomplete trailing assistant entry is replaced by the next assistant
/// entry instead of being appended to, until a complete one arrives.
/// Everything else is appended.
pub fn merge_chat_message(log: &mut Vec<ChatMessage>, incoming: ChatMessage) {
    let replace_last = incoming.sender == ChatSender::Assistant
        && log.last().is_some_and(ChatMessage::is_partial_assistant);

    if replace_last {
        if let Some(last) = log.last_mut() {
            *last = incoming;
        }
    } else {
        log.push(incoming);
    }
}
