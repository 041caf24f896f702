//! Data model for the session & memory subsystem: the entities, their
//! invariants, and the deterministic identity scheme tying them together.

mod agent_description;
mod chat;
mod context;
mod estimate;
mod memory;
mod session;

pub use agent_description::AgentDescription;
pub use chat::{ChatMessage, ChatSession, MessageMetadata, PartialMessage, ReportedTokens, Role, ToolUseRecord};
pub use context::{CommitDigest, CurrentTask, DagSummary, SessionContext};
pub use estimate::TokenEstimate;
pub use memory::{CompactionInfo, Memory, MemorySummary};
pub use session::{AgentType, ArtifactNames, Session, SessionId, SessionKey, SessionStats, SessionStatus, SessionType};
