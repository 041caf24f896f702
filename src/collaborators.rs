//! External collaborator interfaces (§6): the capabilities the core
//! consumes but does not implement — the LLM client transport, git,
//! the project filesystem, and the feature/DAG store. Grounded in the
//! teacher's `async-trait`-based `Provider`/`Tool` traits
//! (`brain/provider/mod.rs`, `brain/tools/edit.rs`): one async trait per
//! capability, boxed-dyn-friendly, `Send + Sync`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// One chunk of a streaming agent response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Text(String),
    ToolUse { name: String, input: serde_json::Value },
    ToolResult { name: String, result: serde_json::Value },
    Done,
    Error(String),
}

/// A request to the LLM agent: composed system prompt, the caller's
/// prompt, and optionally the raw message history (for providers that
/// want it instead of a flattened prompt).
#[derive(Debug, Clone)]
pub struct StreamQuery {
    pub system_prompt: String,
    pub user_prompt: String,
    pub cancellation: CancellationToken,
}

/// The LLM client transport. Not implemented by this crate — the host
/// supplies a provider that talks to whatever model backs a given agent
/// type.
#[async_trait]
pub trait AgentService: Send + Sync {
    async fn stream_query(&self, query: StreamQuery) -> BoxStream<'static, StreamEvent>;
}

#[derive(Debug, Clone)]
pub struct Commit {
    pub short_hash: String,
    pub subject: String,
    pub author: String,
    pub date: chrono::DateTime<chrono::Utc>,
}

/// Read-only git access for `ContextAssembler` step 3.
#[async_trait]
pub trait GitInspector: Send + Sync {
    async fn is_repo(&self) -> bool;
    async fn head(&self) -> Option<String>;
    async fn log(&self, max_count: usize) -> Vec<Commit>;
}

/// Read-only project filesystem access for `ContextAssembler` steps 1–2.
#[async_trait]
pub trait ProjectInspector: Send + Sync {
    /// One level deep; descends once into `src` if present.
    async fn read_tree(&self, root: &str, depth: usize) -> Vec<String>;
    async fn read_text(&self, path: &str) -> Option<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: String,
    pub spec: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagConnection {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dag {
    pub nodes: Vec<Task>,
    pub connections: Vec<DagConnection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub name: String,
    pub goal: Option<String>,
}

/// Read-only feature/DAG access for `ContextAssembler` steps 4–5.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn load_feature(&self, feature_id: &str) -> Option<Feature>;
    async fn load_dag(&self, feature_id: &str) -> Option<Dag>;
}
