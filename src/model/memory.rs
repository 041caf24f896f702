//! The memory artifact: a versioned, bucketed summary replacing messages
//! that have been folded out of the chat file.
//!
//! Canonical vocabulary decision (see SPEC_FULL.md §9.1-a): the persisted
//! shape uses exactly the three eviction-priority buckets the data model
//! names — `critical` (never dropped), `important` (dropped last), `minor`
//! (dropped first). The five compaction-phase buckets the agent is asked
//! to produce (`completed`/`in_progress`/`pending`/`blockers`/`decisions`)
//! are a parsing-time vocabulary that folds into these three; see
//! `crate::compaction::grammar`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySummary {
    /// Never dropped under pressure.
    pub critical: Vec<String>,
    /// Dropped last under pressure.
    pub important: Vec<String>,
    /// Dropped first under pressure.
    pub minor: Vec<String>,
}

impl MemorySummary {
    pub fn is_empty(&self) -> bool {
        self.critical.is_empty() && self.important.is_empty() && self.minor.is_empty()
    }

    /// All bucket contents joined for downstream rendering/estimation, in
    /// eviction order (critical, important, minor).
    pub fn buckets(&self) -> [&[String]; 3] {
        [&self.critical, &self.important, &self.minor]
    }
}

/// Records the span of messages a compaction folded into this memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionInfo {
    pub messages_compacted: u64,
    pub oldest_message_timestamp: DateTime<Utc>,
    pub newest_message_timestamp: DateTime<Utc>,
    pub compacted_at: DateTime<Utc>,
}

/// The compressed representation of all messages no longer in the chat
/// file. Strictly supersedes the previous memory on every successful
/// compaction: `version` increments by one, and the covered time range is
/// monotonically non-decreasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub summary: MemorySummary,
    pub compaction_info: CompactionInfo,
}

impl Memory {
    pub fn next_version(previous: Option<&Memory>) -> u32 {
        previous.map(|m| m.version + 1).unwrap_or(1)
    }
}
