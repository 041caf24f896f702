//! Host-supplied tunables (§6 "Settings": no environment variables are
//! consumed directly by the core). The two fixed constants (`TOKEN_LIMIT`,
//! `COMPACTION_THRESHOLD`) live as `pub const`s in [`crate::token`]; this
//! struct only carries the "(default N)"-style knobs §4.4 and §4.5 leave
//! to the implementer, the way the teacher's `config/types.rs` exposes
//! `#[serde(default = "...")]` fields with documented defaults rather than
//! hardcoding them inline.

use crate::context_assembler::ContextAssemblerConfig;
use serde::{Deserialize, Serialize};

fn default_compaction_keep_tokens() -> u64 {
    10_000
}

/// Constructed by the host, not read from disk by the core itself — this
/// crate has no CLI (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManagerConfig {
    /// Tunables for `ContextAssembler` (commit log depth, project scan
    /// depth).
    #[serde(default)]
    pub context: ContextAssemblerConfig,

    /// `limit` passed to `determine_messages_to_keep` during compaction
    /// (§4.5 step 2). Default matches the spec's literal `10000`.
    #[serde(default = "default_compaction_keep_tokens")]
    pub compaction_keep_tokens: u64,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self { context: ContextAssemblerConfig::default(), compaction_keep_tokens: default_compaction_keep_tokens() }
    }
}
