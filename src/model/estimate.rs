//! Derived token-estimation records produced by [`crate::token`].

use serde::{Deserialize, Serialize};

/// Per-section token counts plus the total/limit/needs-compaction verdict
/// for one assembled request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenEstimate {
    pub agent_tokens: u64,
    pub context_tokens: u64,
    pub checkpoint_tokens: u64,
    pub messages_tokens: u64,
    pub user_prompt_tokens: u64,
    pub total: u64,
    pub limit: u64,
    pub needs_compaction: bool,
}

impl TokenEstimate {
    pub fn system_tokens(&self) -> u64 {
        self.agent_tokens + self.context_tokens + self.checkpoint_tokens + self.messages_tokens
    }
}
