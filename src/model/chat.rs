//! The chat artifact: an ordered, append-mostly log of [`ChatMessage`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Token counts the model itself reported for a message, when available.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReportedTokens {
    pub input: u64,
    pub output: u64,
}

/// A single tool invocation recorded alongside the assistant message that
/// triggered it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseRecord {
    pub name: String,
    pub input: serde_json::Value,
    pub result: Option<serde_json::Value>,
}

/// Open-ended metadata a message may carry. Modeled as a tagged union of
/// known variants plus an opaque carry-over map, per the design note on
/// dynamic metadata: forward-compatible with fields future producers add
/// without requiring a schema migration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_uses: Vec<ToolUseRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<ReportedTokens>,
    /// Suppresses this message from UI display without removing it from
    /// the conversational record (e.g. synthetic compaction bookkeeping).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub internal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(flatten, default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "is_default_metadata")]
    pub metadata: MessageMetadata,
}

fn is_default_metadata(m: &MessageMetadata) -> bool {
    m.agent_identity.is_none()
        && m.tool_uses.is_empty()
        && m.tokens.is_none()
        && !m.internal
        && m.iteration.is_none()
        && m.extra.is_empty()
}

/// A message not yet assigned an id/timestamp — what callers hand to
/// `SessionManager::add_message`.
#[derive(Debug, Clone)]
pub struct PartialMessage {
    pub role: Role,
    pub content: String,
    pub metadata: MessageMetadata,
}

impl PartialMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), metadata: MessageMetadata::default() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), metadata: MessageMetadata::default() }
    }
}

impl ChatMessage {
    pub fn from_partial(partial: PartialMessage, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: partial.role,
            content: partial.content,
            timestamp: now,
            metadata: partial.metadata,
        }
    }
}

/// The chat artifact. `total_messages` is cumulative across compactions —
/// it never decreases, even though `messages` shrinks when old entries are
/// folded into a [`crate::model::Memory`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSession {
    pub messages: Vec<ChatMessage>,
    pub total_messages: u64,
    pub oldest_timestamp: Option<DateTime<Utc>>,
    pub newest_timestamp: Option<DateTime<Utc>>,
}

impl ChatSession {
    pub fn push(&mut self, message: ChatMessage) {
        self.oldest_timestamp.get_or_insert(message.timestamp);
        self.newest_timestamp = Some(message.timestamp);
        self.messages.push(message);
        self.total_messages += 1;
    }

    /// Retain only the last `keep` messages (the compaction tail), updating
    /// the in-file timestamp watermarks. `total_messages` is untouched —
    /// it tracks lifetime count, not in-file count.
    pub fn retain_tail(&mut self, keep: usize) {
        if self.messages.len() > keep {
            let drop_count = self.messages.len() - keep;
            self.messages.drain(0..drop_count);
        }
        self.oldest_timestamp = self.messages.first().map(|m| m.timestamp);
        self.newest_timestamp = self.messages.last().map(|m| m.timestamp);
    }
}
