//! Error taxonomy for the session & memory subsystem.
//!
//! Every fallible operation in this crate returns [`SessionError`]. Variants
//! map 1:1 onto the error taxonomy in the session/memory design: surfaced
//! failures are never swallowed into silent no-ops, with the sole exception
//! of best-effort context assembly (missing `CLAUDE.md`, a non-repo
//! directory, …) which degrades to empty fields rather than erroring.

use crate::model::SessionId;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    /// A session or one of its companion artifacts does not exist on disk.
    #[error("session or artifact not found: {0}")]
    NotFound(String),

    /// `buildRequest` was called before the agent description or context
    /// were ever set for this session.
    #[error("missing prerequisite for session {session_id}: {what}")]
    MissingPrerequisite { session_id: SessionId, what: &'static str },

    /// An on-disk artifact exists but failed to deserialize.
    #[error("corrupt artifact at {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// The agent service or a git subprocess invocation failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A caller-supplied deadline elapsed before the operation completed.
    #[error("deadline exceeded for session {0}")]
    DeadlineExceeded(SessionId),

    /// A compaction (or other exclusive operation) was already in flight
    /// for this session.
    #[error("session {0} is busy with a concurrent compaction")]
    Busy(SessionId),

    /// A partial write was detected on boot/open and could not be
    /// reconciled from the on-disk watermark.
    #[error("session {0} is in an inconsistent state and needs manual repair")]
    StateInconsistent(SessionId),

    /// Low-level filesystem failure not otherwise classified above.
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn corrupt(path: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Corrupt { path: path.into(), source }
    }
}
