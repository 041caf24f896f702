//! The [`Session`] descriptor: the addressable unit of the subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable session identity, `{sessionType}-{featureId}[-{taskId}][-{taskState}]`.
///
/// Derivation is deterministic: the same key always produces the same id,
/// so `getOrCreateSession` can tell "already exists" from "first access"
/// without a lookup table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn derive(key: &SessionKey) -> Self {
        let mut id = format!("{}-{}", key.session_type, key.feature_id);
        if let Some(task_id) = &key.task_id {
            id.push('-');
            id.push_str(task_id);
        }
        if let Some(task_state) = &key.task_state {
            id.push('-');
            id.push_str(task_state);
        }
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What kind of thing the session is conversing about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Feature,
    Task,
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionType::Feature => "feature",
            SessionType::Task => "task",
        };
        f.write_str(s)
    }
}

/// Which role the agent on the other end of the session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Feature,
    Dev,
    Qa,
    Harness,
    Merge,
    Project,
}

/// The key used to derive (and look up) a session's deterministic id.
#[derive(Debug, Clone)]
pub struct SessionKey {
    pub session_type: SessionType,
    pub agent_type: AgentType,
    pub feature_id: String,
    pub task_id: Option<String>,
    pub task_state: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Archived,
}

/// Cumulative counters tracked for the life of a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_messages: u64,
    pub total_tokens: u64,
    pub total_compactions: u64,
    pub last_request_tokens: u64,
    pub last_compaction_at: Option<DateTime<Utc>>,
}

/// Filenames of the four companion artifacts a session owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactNames {
    pub chat: String,
    pub memory: String,
    pub context: String,
    pub agent_description: String,
}

impl ArtifactNames {
    pub fn for_session(id: &SessionId) -> Self {
        Self {
            chat: format!("chat_{}.json", id.as_str()),
            memory: format!("memory_{}.json", id.as_str()),
            context: format!("context_{}.json", id.as_str()),
            agent_description: format!("agent-description_{}.json", id.as_str()),
        }
    }
}

/// The addressable unit of the subsystem. Created on first access for a
/// `(feature, task?, state?)` key; archived explicitly; never deleted
/// implicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub session_type: SessionType,
    pub agent_type: AgentType,
    pub feature_id: String,
    pub task_id: Option<String>,
    pub task_state: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stats: SessionStats,
    pub artifacts: ArtifactNames,
}

impl Session {
    pub fn new(key: SessionKey, now: DateTime<Utc>) -> Self {
        let id = SessionId::derive(&key);
        let artifacts = ArtifactNames::for_session(&id);
        Self {
            id,
            session_type: key.session_type,
            agent_type: key.agent_type,
            feature_id: key.feature_id,
            task_id: key.task_id,
            task_state: key.task_state,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            stats: SessionStats::default(),
            artifacts,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, SessionStatus::Active)
    }
}
