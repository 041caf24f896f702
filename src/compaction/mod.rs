//! C5 — CompactionEngine: the LLM-driven compression protocol that folds
//! old chat messages into a new [`Memory`], producing a [`CompactionResult`].
//!
//! Runs the seven-step protocol of §4.5 verbatim. Transport and parse
//! failures are reported as a non-`success` [`CompactionResult`] rather
//! than an `Err` — the session is left exactly as it was and the caller
//! decides whether to retry (§4.5, "Failure semantics"). A failure
//! *during the atomic swap*, after the new memory is already durably
//! written, is the one case that is genuinely fatal: it is surfaced as
//! [`SessionError::StateInconsistent`] and left for
//! [`crate::store::SessionStore::reconcile`] to repair on next load (§5).

pub mod grammar;

use crate::collaborators::{AgentService, StreamEvent, StreamQuery};
use crate::error::{Result, SessionError};
use crate::events::{EventAction, EventBus, SessionUpdateEvent};
use crate::model::{CompactionInfo, Memory, Session};
use crate::store::SessionStore;
use crate::token::{determine_messages_to_keep, estimate_tokens_reclaimed};
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// `CompactionResult { success, newMemory, messagesCompacted, tokensReclaimed, error? }` (§4.5).
#[derive(Debug, Clone)]
pub struct CompactionResult {
    pub success: bool,
    pub new_memory: Option<Memory>,
    pub messages_compacted: u64,
    pub tokens_reclaimed: u64,
    pub error: Option<String>,
}

impl CompactionResult {
    fn no_op() -> Self {
        Self { success: true, new_memory: None, messages_compacted: 0, tokens_reclaimed: 0, error: None }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self { success: false, new_memory: None, messages_compacted: 0, tokens_reclaimed: 0, error: Some(error.into()) }
    }
}

pub struct CompactionEngine {
    store: Arc<SessionStore>,
    agent_service: Arc<dyn AgentService>,
    events: Arc<EventBus>,
}

impl CompactionEngine {
    pub fn new(store: Arc<SessionStore>, agent_service: Arc<dyn AgentService>, events: Arc<EventBus>) -> Self {
        Self { store, agent_service, events }
    }

    /// Runs the full protocol for `session`, using `keep_limit` as the
    /// `determine_messages_to_keep` budget (§4.5 step 2). Callers hold the
    /// per-session lock (§5) for the duration of this call; both the
    /// automatic and `forceCompact` entry points share this one method.
    pub async fn compact(&self, session: &mut Session, feature_id: &str, keep_limit: u64, cancellation: CancellationToken) -> Result<CompactionResult> {
        // Step 1: snapshot.
        let chat = self.store.load_chat(&session.id).await?;
        let previous_memory = self.store.load_memory(&session.id).await?;

        // Step 2: tail to retain.
        let keep_count = determine_messages_to_keep(&chat.messages, keep_limit);
        if chat.messages.len() <= keep_count {
            return Ok(CompactionResult::no_op());
        }
        let fold_count = chat.messages.len() - keep_count;
        let to_fold = &chat.messages[..fold_count];

        // Step 3: build the prompt.
        let system_prompt = grammar::build_system_prompt(previous_memory.as_ref());
        let user_prompt = grammar::build_user_prompt(to_fold);

        // Step 4: issue the query, parse the response.
        let query = StreamQuery { system_prompt, user_prompt, cancellation };
        let stream = self.agent_service.stream_query(query).await;
        let response = match collect_text(stream).await {
            Ok(text) => text,
            Err(message) => {
                tracing::warn!(session_id = %session.id, "compaction transport error: {message}");
                return Ok(CompactionResult::failed(message));
            }
        };

        let summary = match grammar::parse_compaction_response(&response) {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(session_id = %session.id, "compaction parse error: {e}");
                return Ok(CompactionResult::failed(e.to_string()));
            }
        };

        // Step 5: construct the new memory.
        let now = Utc::now();
        let tokens_reclaimed = estimate_tokens_reclaimed(to_fold, previous_memory.as_ref());
        let new_memory = Memory {
            version: Memory::next_version(previous_memory.as_ref()),
            created_at: previous_memory.as_ref().map(|m| m.created_at).unwrap_or(now),
            updated_at: now,
            summary,
            compaction_info: CompactionInfo {
                messages_compacted: fold_count as u64,
                oldest_message_timestamp: to_fold.first().map(|m| m.timestamp).unwrap_or(now),
                newest_message_timestamp: to_fold.last().map(|m| m.timestamp).unwrap_or(now),
                compacted_at: now,
            },
        };

        // Step 6: atomic swap. Writing the memory first is the only write
        // that can fail without leaving the session inconsistent — nothing
        // downstream of it has happened yet.
        self.store.save_memory(&session.id, &new_memory).await?;

        let mut new_chat = chat;
        new_chat.retain_tail(keep_count);
        if let Err(e) = self.store.save_chat(&session.id, &new_chat).await {
            tracing::error!(session_id = %session.id, "chat truncation failed after memory was written: {e}");
            return Err(SessionError::StateInconsistent(session.id.clone()));
        }

        session.stats.total_compactions += 1;
        session.stats.last_compaction_at = Some(now);
        session.updated_at = now;
        if let Err(e) = self.store.save_session(session).await {
            tracing::error!(session_id = %session.id, "session record write failed after chat truncation: {e}");
            return Err(SessionError::StateInconsistent(session.id.clone()));
        }

        // Step 7: emit the lifecycle event.
        self.events.publish(SessionUpdateEvent::new(session.id.clone(), feature_id, session.task_id.clone(), EventAction::Compacted, now));

        Ok(CompactionResult { success: true, new_memory: Some(new_memory), messages_compacted: fold_count as u64, tokens_reclaimed, error: None })
    }
}

/// Drains a `StreamEvent` sequence into its concatenated text, per the
/// collaborator contract in §6 — tool-use/result events are not expected
/// from a pure-summarization call and are ignored rather than rejected,
/// keeping this forward-compatible with providers that narrate tool calls
/// even when none are offered.
async fn collect_text(mut stream: futures::stream::BoxStream<'static, StreamEvent>) -> std::result::Result<String, String> {
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Text(chunk) => text.push_str(&chunk),
            StreamEvent::ToolUse { .. } | StreamEvent::ToolResult { .. } => {}
            StreamEvent::Done => break,
            StreamEvent::Error(message) => return Err(message),
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentType, ChatSession, PartialMessage, SessionKey, SessionType};
    use async_trait::async_trait;
    use futures::stream;

    struct ScriptedAgent {
        response: String,
    }

    #[async_trait]
    impl AgentService for ScriptedAgent {
        async fn stream_query(&self, _query: StreamQuery) -> futures::stream::BoxStream<'static, StreamEvent> {
            let events = vec![StreamEvent::Text(self.response.clone()), StreamEvent::Done];
            Box::pin(stream::iter(events))
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl AgentService for FailingAgent {
        async fn stream_query(&self, _query: StreamQuery) -> futures::stream::BoxStream<'static, StreamEvent> {
            Box::pin(stream::iter(vec![StreamEvent::Error("provider unavailable".to_string())]))
        }
    }

    fn sample_session() -> Session {
        Session::new(
            SessionKey { session_type: SessionType::Feature, agent_type: AgentType::Dev, feature_id: "feat-1".to_string(), task_id: None, task_state: None },
            Utc::now(),
        )
    }

    fn scripted_response() -> String {
        "## Completed\n- Shipped login\n\n## In Progress\n- nothing\n\n## Pending\n- write docs\n\n\
         ## Blockers\n\n## Key Decisions\n- use Postgres\n"
            .to_string()
    }

    async fn populated_store(session: &Session, message_count: usize) -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        store.save_session(session).await.unwrap();
        let mut chat = ChatSession::default();
        let now = Utc::now();
        for i in 0..message_count {
            chat.push(crate::model::ChatMessage::from_partial(PartialMessage::user(format!("message {i}")), now + chrono::Duration::seconds(i as i64)));
        }
        store.save_chat(&session.id, &chat).await.unwrap();
        (store, dir)
    }

    // S6.
    #[tokio::test]
    async fn compact_retains_tail_and_bumps_memory_version() {
        let mut session = sample_session();
        let (store, _dir) = populated_store(&session, 20).await;
        let store = Arc::new(store);
        let agent: Arc<dyn AgentService> = Arc::new(ScriptedAgent { response: scripted_response() });
        let events = Arc::new(EventBus::new());
        let engine = CompactionEngine::new(store.clone(), agent, events);

        let result = engine.compact(&mut session, "feat-1", 10_000, CancellationToken::new()).await.unwrap();
        assert!(result.success);
        let new_memory = result.new_memory.unwrap();
        assert_eq!(new_memory.version, 1);

        let chat = store.load_chat(&session.id).await.unwrap();
        let keep_count = determine_messages_to_keep(&vec_of(20), 10_000);
        assert_eq!(chat.messages.len(), keep_count);
        assert_eq!(new_memory.compaction_info.messages_compacted, 20 - keep_count as u64);
        assert_eq!(session.stats.total_compactions, 1);
    }

    fn vec_of(n: usize) -> Vec<crate::model::ChatMessage> {
        let now = Utc::now();
        (0..n).map(|i| crate::model::ChatMessage::from_partial(PartialMessage::user(format!("message {i}")), now + chrono::Duration::seconds(i as i64))).collect()
    }

    #[tokio::test]
    async fn no_op_when_under_keep_limit() {
        let mut session = sample_session();
        let (store, _dir) = populated_store(&session, 2).await;
        let store = Arc::new(store);
        let agent: Arc<dyn AgentService> = Arc::new(ScriptedAgent { response: scripted_response() });
        let events = Arc::new(EventBus::new());
        let engine = CompactionEngine::new(store, agent, events);

        let result = engine.compact(&mut session, "feat-1", 10_000, CancellationToken::new()).await.unwrap();
        assert!(result.success);
        assert!(result.new_memory.is_none());
        assert_eq!(result.messages_compacted, 0);
    }

    #[tokio::test]
    async fn transport_error_leaves_state_unchanged() {
        let mut session = sample_session();
        let (store, _dir) = populated_store(&session, 20).await;
        let store = Arc::new(store);
        let agent: Arc<dyn AgentService> = Arc::new(FailingAgent);
        let events = Arc::new(EventBus::new());
        let engine = CompactionEngine::new(store.clone(), agent, events);

        let result = engine.compact(&mut session, "feat-1", 10_000, CancellationToken::new()).await.unwrap();
        assert!(!result.success);
        assert!(result.error.is_some());

        let chat = store.load_chat(&session.id).await.unwrap();
        assert_eq!(chat.messages.len(), 20);
        assert!(store.load_memory(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn parse_failure_leaves_state_unchanged() {
        let mut session = sample_session();
        let (store, _dir) = populated_store(&session, 20).await;
        let store = Arc::new(store);
        let agent: Arc<dyn AgentService> = Arc::new(ScriptedAgent { response: "no headings here".to_string() });
        let events = Arc::new(EventBus::new());
        let engine = CompactionEngine::new(store.clone(), agent, events);

        let result = engine.compact(&mut session, "feat-1", 10_000, CancellationToken::new()).await.unwrap();
        assert!(!result.success);
        assert!(store.load_memory(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn emits_compacted_event_on_success() {
        let mut session = sample_session();
        let (store, _dir) = populated_store(&session, 20).await;
        let store = Arc::new(store);
        let agent: Arc<dyn AgentService> = Arc::new(ScriptedAgent { response: scripted_response() });
        let events = Arc::new(EventBus::new());

        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let _sub = events.subscribe(move |event| received_clone.lock().unwrap().push(event.action));

        let engine = CompactionEngine::new(store, agent, events);
        let result = engine.compact(&mut session, "feat-1", 10_000, CancellationToken::new()).await.unwrap();
        assert!(result.success);
        assert_eq!(*received.lock().unwrap(), vec![EventAction::Compacted]);
    }
}
