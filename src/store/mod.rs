//! C3 — SessionStore: crash-safe persistence of session descriptors and
//! their four companion artifacts under `<projectRoot>/.dagent/sessions/`.
//!
//! All writes go through [`atomic::write_atomic`] (write `.tmp`, fsync,
//! rename). A missing file on read is reported as [`SessionError::NotFound`];
//! a file that exists but fails to parse is [`SessionError::Corrupt`] and is
//! never silently overwritten.

mod atomic;

use crate::error::{Result, SessionError};
use crate::model::{AgentDescription, ChatSession, Memory, Session, SessionContext, SessionId, SessionStatus};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

const ARCHIVED_PREFIX: &str = "archived_";
const COMPANION_PREFIXES: &[&str] = &["chat_", "memory_", "context_", "agent-description_"];

pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    /// `<projectRoot>/.dagent/sessions`. The directory is created lazily —
    /// nothing touches disk until the first save.
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self { root: project_root.as_ref().join(".dagent").join("sessions") }
    }

    fn path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    async fn save_artifact<T: Serialize>(&self, filename: &str, value: &T) -> Result<()> {
        let path = self.path(filename);
        let mut bytes = serde_json::to_vec_pretty(value).map_err(|e| SessionError::corrupt(path.display().to_string(), e))?;
        bytes.push(b'\n');
        atomic::write_atomic(&path, &bytes).await.map_err(|e| SessionError::io(path.display().to_string(), e))
    }

    async fn load_artifact<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        let path = self.path(filename);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(SessionError::io(path.display().to_string(), e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| SessionError::corrupt(path.display().to_string(), e))
    }

    /// Like `load_artifact`, but a missing file is `Ok(None)` rather than
    /// `NotFound` — for artifacts that are legitimately absent until the
    /// caller sets them (context, agent description, memory-before-first-compaction).
    async fn try_load_artifact<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        match self.load_artifact(filename).await {
            Ok(value) => Ok(Some(value)),
            Err(SessionError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ---- Session record ----

    pub async fn save_session(&self, session: &Session) -> Result<()> {
        self.save_artifact(&format!("{}.json", session.id), session).await
    }

    pub async fn load_session(&self, id: &SessionId) -> Result<Session> {
        let archived_name = format!("{ARCHIVED_PREFIX}{id}.json");
        if let Some(session) = self.try_load_artifact::<Session>(&archived_name).await? {
            return Ok(session);
        }
        self.load_artifact(&format!("{id}.json")).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SessionError::io(self.root.display().to_string(), e)),
        };

        let mut ids = std::collections::BTreeSet::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| SessionError::io(self.root.display().to_string(), e))? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = session_record_id(&name) {
                ids.insert(id);
            }
        }

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            sessions.push(self.load_session(&SessionId::from(id)).await?);
        }
        Ok(sessions)
    }

    // ---- Chat artifact ----

    pub async fn save_chat(&self, id: &SessionId, chat: &ChatSession) -> Result<()> {
        self.save_artifact(&format!("chat_{id}.json"), chat).await
    }

    pub async fn load_chat(&self, id: &SessionId) -> Result<ChatSession> {
        self.load_artifact(&format!("chat_{id}.json")).await
    }

    /// Crash recovery (§5): a crash between writing the new memory and
    /// truncating the chat leaves "an already-folded memory and a still
    /// full chat". Reconciles by dropping any chat message at or before
    /// `memory.compaction_info.newest_message_timestamp`, persisting the
    /// result if it changed anything. A no-op when there is no memory yet,
    /// or the chat is already consistent with it.
    pub async fn reconcile(&self, id: &SessionId) -> Result<ChatSession> {
        let mut chat = match self.load_chat(id).await {
            Ok(chat) => chat,
            Err(SessionError::NotFound(_)) => return Ok(ChatSession::default()),
            Err(e) => return Err(e),
        };
        let Some(memory) = self.load_memory(id).await? else {
            return Ok(chat);
        };

        let watermark = memory.compaction_info.newest_message_timestamp;
        let stale_count = chat.messages.iter().take_while(|m| m.timestamp <= watermark).count();
        if stale_count == 0 {
            return Ok(chat);
        }

        chat.messages.drain(0..stale_count);
        chat.oldest_timestamp = chat.messages.first().map(|m| m.timestamp);
        if chat.messages.is_empty() {
            chat.newest_timestamp = None;
        }
        self.save_chat(id, &chat).await?;
        Ok(chat)
    }

    // ---- Memory artifact ----

    pub async fn save_memory(&self, id: &SessionId, memory: &Memory) -> Result<()> {
        self.save_artifact(&format!("memory_{id}.json"), memory).await
    }

    pub async fn load_memory(&self, id: &SessionId) -> Result<Option<Memory>> {
        self.try_load_artifact(&format!("memory_{id}.json")).await
    }

    // ---- Context artifact ----

    pub async fn save_context(&self, id: &SessionId, context: &SessionContext) -> Result<()> {
        self.save_artifact(&format!("context_{id}.json"), context).await
    }

    pub async fn load_context(&self, id: &SessionId) -> Result<Option<SessionContext>> {
        self.try_load_artifact(&format!("context_{id}.json")).await
    }

    // ---- Agent description (role) artifact ----

    pub async fn save_agent_description(&self, id: &SessionId, description: &AgentDescription) -> Result<()> {
        self.save_artifact(&format!("agent-description_{id}.json"), description).await
    }

    pub async fn load_agent_description(&self, id: &SessionId) -> Result<Option<AgentDescription>> {
        self.try_load_artifact(&format!("agent-description_{id}.json")).await
    }

    // ---- Archival ----

    /// Rewrites a session's four companion artifacts (and its record) to an
    /// archive-prefixed name, leaving the prior content intact under the
    /// new name rather than erasing it. Idempotent: archiving an already
    /// archived session is a no-op.
    pub async fn archive_session(&self, id: &SessionId) -> Result<Session> {
        let mut session = self.load_session(id).await?;
        if matches!(session.status, SessionStatus::Archived) {
            return Ok(session);
        }

        session.status = SessionStatus::Archived;
        session.updated_at = chrono::Utc::now();

        // Write the archived copy first — durable before anything is removed.
        self.save_artifact(&format!("{ARCHIVED_PREFIX}{id}.json"), &session).await?;

        for (kind, name) in [
            ("chat", format!("chat_{id}.json")),
            ("memory", format!("memory_{id}.json")),
            ("context", format!("context_{id}.json")),
            ("agent-description", format!("agent-description_{id}.json")),
        ] {
            self.archive_companion(&name, &format!("{ARCHIVED_PREFIX}{name}")).await?;
            let _ = kind;
        }

        let _ = tokio::fs::remove_file(self.path(&format!("{id}.json"))).await;

        Ok(session)
    }

    async fn archive_companion(&self, original_name: &str, archived_name: &str) -> Result<()> {
        let original_path = self.path(original_name);
        let bytes = match tokio::fs::read(&original_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(SessionError::io(original_path.display().to_string(), e)),
        };
        let archived_path = self.path(archived_name);
        atomic::write_atomic(&archived_path, &bytes).await.map_err(|e| SessionError::io(archived_path.display().to_string(), e))?;
        let _ = tokio::fs::remove_file(&original_path).await;
        Ok(())
    }
}

/// Returns the session id if `name` is a plain-or-archived *session record*
/// filename (as opposed to one of the four companion artifact filenames).
fn session_record_id(name: &str) -> Option<String> {
    let stem = name.strip_suffix(".json")?;
    let stem = stem.strip_prefix(ARCHIVED_PREFIX).unwrap_or(stem);
    if COMPANION_PREFIXES.iter().any(|prefix| stem.starts_with(prefix)) {
        return None;
    }
    Some(stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentType, SessionKey, SessionType};
    use chrono::Utc;

    fn store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (SessionStore::new(dir.path()), dir)
    }

    fn sample_session() -> Session {
        Session::new(
            SessionKey { session_type: SessionType::Feature, agent_type: AgentType::Feature, feature_id: "feat-1".to_string(), task_id: None, task_state: None },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let (store, _dir) = store();
        let session = sample_session();
        store.save_session(&session).await.unwrap();
        let loaded = store.load_session(&session.id).await.unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.feature_id, session.feature_id);
    }

    #[tokio::test]
    async fn load_missing_session_is_not_found() {
        let (store, _dir) = store();
        let err = store.load_session(&SessionId::from("nope")).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn corrupt_artifact_surfaces_distinct_error() {
        let (store, dir) = store();
        let path = dir.path().join(".dagent").join("sessions").join("broken.json");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let err = store.load_session(&SessionId::from("broken")).await.unwrap_err();
        assert!(matches!(err, SessionError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn missing_memory_artifact_is_none_not_error() {
        let (store, _dir) = store();
        let session = sample_session();
        let memory = store.load_memory(&session.id).await.unwrap();
        assert!(memory.is_none());
    }

    #[tokio::test]
    async fn list_sessions_ignores_companion_artifact_files() {
        let (store, _dir) = store();
        let session = sample_session();
        store.save_session(&session).await.unwrap();
        store.save_chat(&session.id, &ChatSession::default()).await.unwrap();

        let listed = store.list_sessions().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, session.id);
    }

    #[tokio::test]
    async fn archive_moves_companions_and_is_idempotent() {
        let (store, _dir) = store();
        let session = sample_session();
        store.save_session(&session).await.unwrap();
        store.save_chat(&session.id, &ChatSession::default()).await.unwrap();

        let archived = store.archive_session(&session.id).await.unwrap();
        assert!(matches!(archived.status, SessionStatus::Archived));

        // Original chat filename is gone; archived one holds the content.
        let original_chat = store.path(&format!("chat_{}.json", session.id));
        assert!(!original_chat.exists());

        // Loading still resolves to the archived copy.
        let reloaded = store.load_session(&session.id).await.unwrap();
        assert!(matches!(reloaded.status, SessionStatus::Archived));

        // Archiving again is a no-op, not an error.
        let archived_again = store.archive_session(&session.id).await.unwrap();
        assert!(matches!(archived_again.status, SessionStatus::Archived));
    }

    #[tokio::test]
    async fn reconciliation_prefers_archived_copy_when_both_present() {
        let (store, _dir) = store();
        let session = sample_session();
        store.save_session(&session).await.unwrap();

        // Simulate a crash mid-archive: archived copy written, original not
        // yet removed.
        let mut archived = session.clone();
        archived.status = SessionStatus::Archived;
        store.save_artifact(&format!("{ARCHIVED_PREFIX}{}.json", session.id), &archived).await.unwrap();

        let loaded = store.load_session(&session.id).await.unwrap();
        assert!(matches!(loaded.status, SessionStatus::Archived));
    }

    #[tokio::test]
    async fn reconcile_drops_chat_messages_at_or_before_memory_watermark() {
        let (store, _dir) = store();
        let session = sample_session();
        store.save_session(&session).await.unwrap();

        let now = Utc::now();
        let mut chat = ChatSession::default();
        for i in 0..5i64 {
            chat.push(crate::model::ChatMessage::from_partial(crate::model::PartialMessage::user(format!("m{i}")), now + chrono::Duration::seconds(i)));
        }
        store.save_chat(&session.id, &chat).await.unwrap();

        let memory = Memory {
            version: 1,
            created_at: now,
            updated_at: now,
            summary: crate::model::MemorySummary::default(),
            compaction_info: crate::model::CompactionInfo {
                messages_compacted: 3,
                oldest_message_timestamp: now,
                newest_message_timestamp: now + chrono::Duration::seconds(2),
                compacted_at: now,
            },
        };
        store.save_memory(&session.id, &memory).await.unwrap();

        let reconciled = store.reconcile(&session.id).await.unwrap();
        assert_eq!(reconciled.messages.len(), 2);
        assert_eq!(reconciled.messages[0].content, "m3");

        let reloaded = store.load_chat(&session.id).await.unwrap();
        assert_eq!(reloaded.messages.len(), 2);
    }

    #[tokio::test]
    async fn reconcile_is_a_no_op_without_a_memory_artifact() {
        let (store, _dir) = store();
        let session = sample_session();
        store.save_session(&session).await.unwrap();
        let mut chat = ChatSession::default();
        chat.push(crate::model::ChatMessage::from_partial(crate::model::PartialMessage::user("hi"), Utc::now()));
        store.save_chat(&session.id, &chat).await.unwrap();

        let reconciled = store.reconcile(&session.id).await.unwrap();
        assert_eq!(reconciled.messages.len(), 1);
    }

    #[test]
    fn session_record_id_distinguishes_companions_from_records() {
        assert_eq!(session_record_id("feature-feat-1.json").as_deref(), Some("feature-feat-1"));
        assert_eq!(session_record_id("chat_feature-feat-1.json"), None);
        assert_eq!(session_record_id("archived_feature-feat-1.json").as_deref(), Some("feature-feat-1"));
        assert_eq!(session_record_id("archived_chat_feature-feat-1.json"), None);
    }
}
