//! Session & memory subsystem for a multi-agent coding orchestrator.
//!
//! This crate is the core of the host desktop tool's Session & Memory
//! subsystem: it maintains per-agent conversational state across many
//! long-lived sessions, assembles bounded LLM requests by composing agent
//! role, project context, compressed memory, and recent messages, and
//! performs automatic and forced compaction to stay under a fixed token
//! budget while preserving conversational continuity.
//!
//! The graphical shell, DAG layout/visualization, git worktree
//! management, feature/task status machines, authentication, the LLM
//! client transport, and all UI styling are out of scope — they are
//! consumed as named collaborator interfaces (see [`collaborators`]).
//!
//! No CLI; this crate is a library.

pub mod collaborators;
pub mod compaction;
pub mod config;
pub mod context_assembler;
pub mod error;
pub mod events;
pub mod manager;
pub mod model;
pub mod prompt;
pub mod registry;
pub mod store;
pub mod token;

pub use config::SessionManagerConfig;
pub use error::{Result, SessionError};
pub use events::{EventAction, EventBus, SessionUpdateEvent, Subscription};
pub use manager::{AgentRequest, RequestBreakdown, RequestPreview, SessionManager};
pub use token::{CHARS_PER_TOKEN, COMPACTION_THRESHOLD, TOKEN_LIMIT};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
