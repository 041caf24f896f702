//! C6 — SessionManager: orchestrates C1–C5 and C7, owns session
//! lifecycle, serializes per-session mutations, and exposes the public
//! API described in §4.6.
//!
//! Concurrency model (§5): each session gets its own `tokio::sync::Mutex`,
//! created lazily in an in-process registry — the teacher favors explicit
//! `Mutex`/`RwLock` fields over hidden global state throughout
//! `brain/agent/service/builder.rs`, and this generalizes that to
//! per-key locks instead of one lock for the whole service. `addMessage`,
//! `buildRequest`, `forceCompact`, and `archive` all acquire it; a
//! concurrent `forceCompact`/automatic-compaction attempt on an
//! already-locked session rejects immediately with [`SessionError::Busy`]
//! rather than queuing (§9.1-c).

use crate::collaborators::AgentService;
use crate::compaction::{CompactionEngine, CompactionResult};
use crate::config::SessionManagerConfig;
use crate::context_assembler::{AssembleRequest, ContextAssembler};
use crate::error::{Result, SessionError};
use crate::events::{EventAction, EventBus, SessionUpdateEvent};
use crate::model::{
    AgentDescription, ChatMessage, ChatSession, PartialMessage, Session, SessionContext, SessionId, SessionKey, SessionStatus, TokenEstimate,
};
use crate::prompt::{format_checkpoint_as_prompt, format_context_as_prompt, format_messages_as_prompt};
use crate::store::SessionStore;
use crate::token::{estimate_request, RequestParts};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

/// `AgentRequest` (§4.6): a fully composed request ready for the Agent
/// Service, plus the estimate that decided whether it needed compaction.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub token_estimate: TokenEstimate,
}

/// `previewRequest`'s breakdown (§4.6), field-for-field with the spec's
/// literal names.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestBreakdown {
    pub agent_desc_tokens: u64,
    pub context_tokens: u64,
    pub checkpoint_tokens: u64,
    pub messages_tokens: u64,
    pub user_prompt_tokens: u64,
    pub total: u64,
}

impl From<TokenEstimate> for RequestBreakdown {
    fn from(estimate: TokenEstimate) -> Self {
        Self {
            agent_desc_tokens: estimate.agent_tokens,
            context_tokens: estimate.context_tokens,
            checkpoint_tokens: estimate.checkpoint_tokens,
            messages_tokens: estimate.messages_tokens,
            user_prompt_tokens: estimate.user_prompt_tokens,
            total: estimate.total,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestPreview {
    pub system_prompt: String,
    pub user_prompt: String,
    pub breakdown: RequestBreakdown,
}

pub struct SessionManager {
    store: Arc<SessionStore>,
    context_assembler: Arc<ContextAssembler>,
    compaction: Arc<CompactionEngine>,
    events: Arc<EventBus>,
    config: SessionManagerConfig,
    locks: StdMutex<HashMap<SessionId, Arc<AsyncMutex<()>>>>,
    inconsistent: StdMutex<HashSet<SessionId>>,
}

impl SessionManager {
    pub fn new(store: Arc<SessionStore>, context_assembler: Arc<ContextAssembler>, agent_service: Arc<dyn AgentService>, events: Arc<EventBus>, config: SessionManagerConfig) -> Self {
        let compaction = Arc::new(CompactionEngine::new(store.clone(), agent_service, events.clone()));
        Self { store, context_assembler, compaction, events, config, locks: StdMutex::new(HashMap::new()), inconsistent: StdMutex::new(HashSet::new()) }
    }

    fn lock_for(&self, id: &SessionId) -> Arc<AsyncMutex<()>> {
        self.locks.lock().expect("session lock registry poisoned").entry(id.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    fn mark_inconsistent(&self, id: &SessionId) {
        self.inconsistent.lock().expect("inconsistent set poisoned").insert(id.clone());
    }

    fn check_consistent(&self, id: &SessionId) -> Result<()> {
        if self.inconsistent.lock().expect("inconsistent set poisoned").contains(id) {
            return Err(SessionError::StateInconsistent(id.clone()));
        }
        Ok(())
    }

    /// Repairs a session left `StateInconsistent` by a prior partial write,
    /// reconciling chat against the memory watermark (§5) and clearing the
    /// manager's in-memory marker so `buildRequest` works again.
    pub async fn repair_session(&self, id: &SessionId) -> Result<()> {
        self.store.reconcile(id).await?;
        self.inconsistent.lock().expect("inconsistent set poisoned").remove(id);
        Ok(())
    }

    async fn load_chat_or_default(&self, id: &SessionId) -> Result<ChatSession> {
        match self.store.load_chat(id).await {
            Ok(chat) => Ok(chat),
            Err(SessionError::NotFound(_)) => Ok(ChatSession::default()),
            Err(e) => Err(e),
        }
    }

    /// `getOrCreateSession` (§4.6): deterministic id derivation, creates on
    /// first access, returns the existing record otherwise.
    pub async fn get_or_create_session(&self, key: SessionKey) -> Result<Session> {
        let id = SessionId::derive(&key);
        match self.store.load_session(&id).await {
            Ok(session) => Ok(session),
            Err(SessionError::NotFound(_)) => {
                let now = Utc::now();
                let session = Session::new(key, now);
                self.store.save_session(&session).await?;
                self.events.publish(SessionUpdateEvent::new(session.id.clone(), session.feature_id.clone(), session.task_id.clone(), EventAction::Ready, now));
                Ok(session)
            }
            Err(e) => Err(e),
        }
    }

    /// Write-through role artifact update.
    pub async fn set_agent_description(&self, session_id: &SessionId, description: AgentDescription) -> Result<()> {
        self.store.save_agent_description(session_id, &description).await
    }

    /// Write-through context snapshot update — "retained" for the next
    /// estimate simply means it is the artifact `buildRequest` will read
    /// next (§4.6).
    pub async fn update_context(&self, session_id: &SessionId, context: SessionContext) -> Result<()> {
        self.store.save_context(session_id, &context).await
    }

    /// Rebuilds the context artifact from live project state via
    /// `ContextAssembler` and write-throughs it — the §2 data-flow step
    /// "obtains a fresh SessionContext from ContextAssembler".
    pub async fn refresh_context(&self, session_id: &SessionId, request: &AssembleRequest, now: chrono::DateTime<Utc>) -> Result<SessionContext> {
        let context = self.context_assembler.assemble(request, now).await;
        self.update_context(session_id, context.clone()).await?;
        Ok(context)
    }

    /// `addMessage` (§4.6): assigns id + timestamp, appends to chat,
    /// increments `totalMessages`, emits `message_added` — durably
    /// persisted before the event is delivered (§5 ordering guarantee).
    pub async fn add_message(&self, session_id: &SessionId, feature_id: &str, partial: PartialMessage) -> Result<ChatMessage> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self.store.load_session(session_id).await?;
        let mut chat = self.load_chat_or_default(session_id).await?;

        let now = Utc::now();
        let message = ChatMessage::from_partial(partial, now);
        chat.push(message.clone());
        session.stats.total_messages += 1;
        session.updated_at = now;

        self.store.save_chat(session_id, &chat).await?;
        self.store.save_session(&session).await?;

        self.events.publish(SessionUpdateEvent::new(session_id.clone(), feature_id, session.task_id.clone(), EventAction::MessageAdded, now));
        Ok(message)
    }

    fn compose_system_prompt(agent: &AgentDescription, context: &SessionContext, checkpoint: Option<&crate::model::Memory>, messages: &[ChatMessage]) -> String {
        let mut sections = vec![agent.role_instructions.clone()];
        if let Some(tool_instructions) = &agent.tool_instructions {
            sections.push(tool_instructions.clone());
        }

        let context_prompt = format_context_as_prompt(context);
        if !context_prompt.is_empty() {
            sections.push(context_prompt);
        }

        if let Some(memory) = checkpoint {
            let checkpoint_prompt = format_checkpoint_as_prompt(memory);
            if !checkpoint_prompt.is_empty() {
                sections.push(checkpoint_prompt);
            }
        }

        let messages_prompt = format_messages_as_prompt(messages);
        if !messages_prompt.is_empty() {
            sections.push(messages_prompt);
        }

        sections.into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join("\n\n")
    }

    async fn load_request_inputs(&self, session_id: &SessionId) -> Result<(AgentDescription, SessionContext, Option<crate::model::Memory>, ChatSession)> {
        let agent_description = self
            .store
            .load_agent_description(session_id)
            .await?
            .ok_or_else(|| SessionError::MissingPrerequisite { session_id: session_id.clone(), what: "agent description" })?;
        let context = self
            .store
            .load_context(session_id)
            .await?
            .ok_or_else(|| SessionError::MissingPrerequisite { session_id: session_id.clone(), what: "context" })?;
        let memory = self.store.load_memory(session_id).await?;
        let chat = self.load_chat_or_default(session_id).await?;
        Ok((agent_description, context, memory, chat))
    }

    /// `buildRequest` (§4.6): pure assembly, never compacts — the caller
    /// decides what to do with `tokenEstimate.needsCompaction`.
    pub async fn build_request(&self, session_id: &SessionId, user_prompt: &str) -> Result<AgentRequest> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        self.check_consistent(session_id)?;
        // Confirms the session itself exists (session-not-found, §4.6).
        self.store.load_session(session_id).await?;

        let (agent_description, context, memory, chat) = self.load_request_inputs(session_id).await?;

        let parts = RequestParts { agent_description: &agent_description, context: &context, checkpoint: memory.as_ref(), messages: &chat.messages, user_prompt };
        let token_estimate = estimate_request(&parts);
        let system_prompt = Self::compose_system_prompt(&agent_description, &context, memory.as_ref(), &chat.messages);

        Ok(AgentRequest { system_prompt, user_prompt: user_prompt.to_string(), token_estimate })
    }

    /// `previewRequest` (§4.6): identical assembly to `buildRequest`, but a
    /// pure inspection — no mutation, no lock held beyond the read.
    pub async fn preview_request(&self, session_id: &SessionId, user_prompt: Option<&str>) -> Result<RequestPreview> {
        self.check_consistent(session_id)?;
        self.store.load_session(session_id).await?;

        let user_prompt = user_prompt.unwrap_or("");
        let (agent_description, context, memory, chat) = self.load_request_inputs(session_id).await?;

        let parts = RequestParts { agent_description: &agent_description, context: &context, checkpoint: memory.as_ref(), messages: &chat.messages, user_prompt };
        let token_estimate = estimate_request(&parts);
        let system_prompt = Self::compose_system_prompt(&agent_description, &context, memory.as_ref(), &chat.messages);

        Ok(RequestPreview { system_prompt, user_prompt: user_prompt.to_string(), breakdown: token_estimate.into() })
    }

    /// `forceCompact` (§4.6): the forced compaction entry point. Rejects
    /// immediately with `Busy` if a compaction is already in flight for
    /// this session (§9.1-c).
    pub async fn force_compact(&self, session_id: &SessionId, feature_id: &str) -> Result<CompactionResult> {
        let lock = self.lock_for(session_id);
        let _guard = lock.try_lock().map_err(|_| SessionError::Busy(session_id.clone()))?;
        self.run_compaction(session_id, feature_id).await
    }

    /// The §2 data-flow "automatic" entry point: runs the compaction
    /// protocol (§4.5) and, on a store-level partial-write failure, marks
    /// the session inconsistent rather than propagating a bare I/O error.
    async fn run_compaction(&self, session_id: &SessionId, feature_id: &str) -> Result<CompactionResult> {
        let mut session = self.store.load_session(session_id).await?;
        match self.compaction.compact(&mut session, feature_id, self.config.compaction_keep_tokens, CancellationToken::new()).await {
            Ok(result) => Ok(result),
            Err(SessionError::StateInconsistent(id)) => {
                self.mark_inconsistent(&id);
                Err(SessionError::StateInconsistent(id))
            }
            Err(e) => Err(e),
        }
    }

    /// Full §2 data flow: refresh context, build the request, and — if the
    /// estimate says it needs compaction — run the automatic compaction
    /// entry point and rebuild before returning. This is the orchestration
    /// layer described in §2; `buildRequest` above stays pure per §4.6's
    /// literal contract.
    pub async fn dispatch_request(&self, session_id: &SessionId, feature_id: &str, task_id: Option<String>, project_root: &str, user_prompt: &str) -> Result<(AgentRequest, Option<CompactionResult>)> {
        let now = Utc::now();
        self.refresh_context(session_id, &AssembleRequest { project_root: project_root.to_string(), feature_id: Some(feature_id.to_string()), task_id }, now).await?;

        let initial = self.build_request(session_id, user_prompt).await?;
        if !initial.token_estimate.needs_compaction {
            return Ok((initial, None));
        }

        let lock = self.lock_for(session_id);
        let compaction_result = {
            let _guard = lock.try_lock().map_err(|_| SessionError::Busy(session_id.clone()))?;
            self.run_compaction(session_id, feature_id).await?
        };

        let rebuilt = self.build_request(session_id, user_prompt).await?;
        Ok((rebuilt, Some(compaction_result)))
    }

    /// `archive` (§4.6): terminal state. Idempotent — a second archive is
    /// a no-op and emits no second `archived` event (§5, "after archive,
    /// no further mutation events are emitted").
    pub async fn archive(&self, session_id: &SessionId) -> Result<Session> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let was_active = matches!(self.store.load_session(session_id).await?.status, SessionStatus::Active);
        let session = self.store.archive_session(session_id).await?;
        if was_active {
            self.events.publish(SessionUpdateEvent::new(session.id.clone(), session.feature_id.clone(), session.task_id.clone(), EventAction::Archived, Utc::now()));
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{StreamEvent, StreamQuery};
    use crate::context_assembler::{ContextAssembler, ContextAssemblerConfig};
    use crate::model::{AgentType, SessionType};
    use async_trait::async_trait;
    use futures::stream;

    struct NoopProject;
    #[async_trait]
    impl crate::collaborators::ProjectInspector for NoopProject {
        async fn read_tree(&self, _root: &str, _depth: usize) -> Vec<String> {
            vec![]
        }
        async fn read_text(&self, _path: &str) -> Option<String> {
            None
        }
    }

    struct NoopGit;
    #[async_trait]
    impl crate::collaborators::GitInspector for NoopGit {
        async fn is_repo(&self) -> bool {
            false
        }
        async fn head(&self) -> Option<String> {
            None
        }
        async fn log(&self, _max_count: usize) -> Vec<crate::collaborators::Commit> {
            vec![]
        }
    }

    struct NoopFeatures;
    #[async_trait]
    impl crate::collaborators::FeatureStore for NoopFeatures {
        async fn load_feature(&self, _feature_id: &str) -> Option<crate::collaborators::Feature> {
            None
        }
        async fn load_dag(&self, _feature_id: &str) -> Option<crate::collaborators::Dag> {
            None
        }
    }

    struct ScriptedAgent {
        response: String,
    }

    #[async_trait]
    impl AgentService for ScriptedAgent {
        async fn stream_query(&self, _query: StreamQuery) -> futures::stream::BoxStream<'static, StreamEvent> {
            Box::pin(stream::iter(vec![StreamEvent::Text(self.response.clone()), StreamEvent::Done]))
        }
    }

    fn manager(dir: &std::path::Path, response: &str) -> SessionManager {
        let store = Arc::new(SessionStore::new(dir));
        let assembler = Arc::new(ContextAssembler::new(ContextAssemblerConfig::default(), Box::new(NoopProject), Box::new(NoopGit), Box::new(NoopFeatures)));
        let agent: Arc<dyn AgentService> = Arc::new(ScriptedAgent { response: response.to_string() });
        let events = Arc::new(EventBus::new());
        SessionManager::new(store, assembler, agent, events, SessionManagerConfig::default())
    }

    fn key() -> SessionKey {
        SessionKey { session_type: SessionType::Feature, agent_type: AgentType::Feature, feature_id: "feat-1".to_string(), task_id: None, task_state: None }
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), "");
        let first = manager.get_or_create_session(key()).await.unwrap();
        let second = manager.get_or_create_session(key()).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    // S4.
    #[tokio::test]
    async fn force_compact_on_missing_session_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), "");
        let err = manager.force_compact(&SessionId::from("does-not-exist"), "f").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn build_request_fails_without_agent_description() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), "");
        let session = manager.get_or_create_session(key()).await.unwrap();
        let err = manager.build_request(&session.id, "hi").await.unwrap_err();
        assert!(matches!(err, SessionError::MissingPrerequisite { .. }));
    }

    #[tokio::test]
    async fn build_request_fails_without_context_even_with_agent_description() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), "");
        let session = manager.get_or_create_session(key()).await.unwrap();
        manager.set_agent_description(&session.id, AgentDescription::new("You are a PM.")).await.unwrap();
        let err = manager.build_request(&session.id, "hi").await.unwrap_err();
        assert!(matches!(err, SessionError::MissingPrerequisite { .. }));
    }

    // S5.
    #[tokio::test]
    async fn end_to_end_build_request_composes_all_sections() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), "");
        let session = manager.get_or_create_session(key()).await.unwrap();

        manager.set_agent_description(&session.id, AgentDescription::new("You are a PM.")).await.unwrap();
        manager.update_context(&session.id, SessionContext::minimal("/tmp/proj", "feat-1", "Test Feature")).await.unwrap();
        manager.add_message(&session.id, "feat-1", PartialMessage::user("Create a task")).await.unwrap();

        let request = manager.build_request(&session.id, "What next?").await.unwrap();
        assert!(request.system_prompt.contains("You are a PM."));
        assert!(request.system_prompt.contains("Test Feature"));
        assert!(request.system_prompt.contains("Create a task"));
        assert_eq!(request.user_prompt, "What next?");
        assert!(request.token_estimate.total > 0);
    }

    #[tokio::test]
    async fn add_message_increments_lifetime_total() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), "");
        let session = manager.get_or_create_session(key()).await.unwrap();
        manager.add_message(&session.id, "feat-1", PartialMessage::user("hi")).await.unwrap();
        manager.add_message(&session.id, "feat-1", PartialMessage::assistant("hello")).await.unwrap();
        let reloaded = manager.store.load_session(&session.id).await.unwrap();
        assert_eq!(reloaded.stats.total_messages, 2);
    }

    #[tokio::test]
    async fn archive_is_idempotent_and_emits_one_event() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), "");
        let session = manager.get_or_create_session(key()).await.unwrap();

        let mut received = Vec::new();
        let archived_count = Arc::new(StdMutex::new(0usize));
        let archived_count_clone = archived_count.clone();
        let _sub = manager.events.subscribe(move |event| {
            if matches!(event.action, EventAction::Archived) {
                *archived_count_clone.lock().unwrap() += 1;
            }
        });

        manager.archive(&session.id).await.unwrap();
        manager.archive(&session.id).await.unwrap();
        received.push(());

        assert_eq!(*archived_count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn dispatch_request_triggers_automatic_compaction_when_over_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let response = "## Completed\n- did things\n\n## In Progress\n\n## Pending\n\n## Blockers\n\n## Key Decisions\n";
        let manager = manager(dir.path(), response);
        let session = manager.get_or_create_session(key()).await.unwrap();
        manager.set_agent_description(&session.id, AgentDescription::new("x".repeat(400_000))).await.unwrap();
        manager.update_context(&session.id, SessionContext::minimal("/tmp/proj", "feat-1", "Test Feature")).await.unwrap();
        manager.add_message(&session.id, "feat-1", PartialMessage::user("hello")).await.unwrap();

        let (request, compaction) = manager.dispatch_request(&session.id, "feat-1", None, "/tmp/proj", "go").await.unwrap();
        assert!(compaction.is_some());
        assert!(!request.token_estimate.needs_compaction || request.token_estimate.total > 0);
    }

    #[tokio::test]
    async fn preview_request_does_not_mutate_state() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), "");
        let session = manager.get_or_create_session(key()).await.unwrap();
        manager.set_agent_description(&session.id, AgentDescription::new("You are a PM.")).await.unwrap();
        manager.update_context(&session.id, SessionContext::minimal("/tmp/proj", "feat-1", "Test Feature")).await.unwrap();

        let preview = manager.preview_request(&session.id, Some("hi")).await.unwrap();
        assert_eq!(preview.user_prompt, "hi");
        assert!(preview.breakdown.total > 0);

        let reloaded = manager.store.load_session(&session.id).await.unwrap();
        assert_eq!(reloaded.stats.total_messages, 0);
    }
}
