//! C4 — ContextAssembler: on-demand reconstruction of a [`SessionContext`]
//! from project structure, docs, git history, and the feature/DAG store.
//!
//! Every step degrades to an empty field on failure rather than raising —
//! a non-repo directory or a missing `CLAUDE.md` is not an error here, it's
//! just absent context. The assembler itself is idempotent: the same
//! collaborator responses always produce the same `SessionContext`.

mod relative_date;

use crate::collaborators::{FeatureStore, GitInspector, ProjectInspector};
use crate::model::{CommitDigest, CurrentTask, DagSummary, SessionContext};
use std::collections::BTreeMap;

pub use relative_date::relative_date;

const CLAUDE_MD: &str = "CLAUDE.md";
const PROJECT_MD: &str = "PROJECT.md";

/// Tunables the host may override; defaults match §4.4's "(default 10)".
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContextAssemblerConfig {
    #[serde(default = "default_max_context_commits")]
    pub max_context_commits: usize,
    #[serde(default = "default_project_scan_depth")]
    pub project_scan_depth: usize,
}

fn default_max_context_commits() -> usize {
    10
}

fn default_project_scan_depth() -> usize {
    1
}

impl Default for ContextAssemblerConfig {
    fn default() -> Self {
        Self { max_context_commits: 10, project_scan_depth: 1 }
    }
}

pub struct ContextAssembler {
    config: ContextAssemblerConfig,
    project: Box<dyn ProjectInspector>,
    git: Box<dyn GitInspector>,
    features: Box<dyn FeatureStore>,
}

/// What to assemble context *about* — the feature/task identity that
/// narrows steps 4–5. Project and git steps (1–3) always run.
#[derive(Debug, Clone, Default)]
pub struct AssembleRequest {
    pub project_root: String,
    pub feature_id: Option<String>,
    pub task_id: Option<String>,
}

impl ContextAssembler {
    pub fn new(
        config: ContextAssemblerConfig,
        project: Box<dyn ProjectInspector>,
        git: Box<dyn GitInspector>,
        features: Box<dyn FeatureStore>,
    ) -> Self {
        Self { config, project, git, features }
    }

    pub async fn assemble(&self, request: &AssembleRequest, now: chrono::DateTime<chrono::Utc>) -> SessionContext {
        let project_structure = self.scan_project_structure(&request.project_root).await;
        let claude_md = self.project.read_text(CLAUDE_MD).await;
        let project_md = self.project.read_text(PROJECT_MD).await;
        let recent_commits = self.recent_commits(now).await;

        let mut feature_name = String::new();
        let mut feature_goal = None;
        let mut dag_summary = None;
        let mut current_task = None;

        if let Some(feature_id) = &request.feature_id {
            if let Some(feature) = self.features.load_feature(feature_id).await {
                feature_name = feature.name;
                feature_goal = feature.goal;
            }

            if let Some(dag) = self.features.load_dag(feature_id).await {
                dag_summary = Some(summarize_dag(&dag));

                if let Some(task_id) = &request.task_id {
                    current_task = dag.nodes.iter().find(|t| &t.id == task_id).map(|task| {
                        let (blocked_by, blocking) = dependency_ids(&dag, task_id);
                        CurrentTask { id: task.id.clone(), title: task.title.clone(), state: task.status.clone(), blocked_by, blocking }
                    });
                }
            }
        }

        SessionContext {
            project_root: request.project_root.clone(),
            feature_id: request.feature_id.clone().unwrap_or_default(),
            feature_name,
            feature_goal,
            current_task,
            dag_summary,
            project_structure,
            claude_md,
            project_md,
            recent_commits,
            attachments: Vec::new(),
        }
    }

    async fn scan_project_structure(&self, root: &str) -> Option<String> {
        let entries = self.project.read_tree(root, self.config.project_scan_depth).await;
        if entries.is_empty() {
            return None;
        }
        Some(entries.join("\n"))
    }

    async fn recent_commits(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<CommitDigest> {
        if !self.git.is_repo().await || self.git.head().await.is_none() {
            return Vec::new();
        }
        self.git
            .log(self.config.max_context_commits)
            .await
            .into_iter()
            .map(|commit| CommitDigest {
                short_hash: commit.short_hash,
                message: commit.subject,
                author: commit.author,
                relative_date: relative_date(commit.date, now),
            })
            .collect()
    }
}

fn summarize_dag(dag: &crate::collaborators::Dag) -> DagSummary {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for task in &dag.nodes {
        *counts.entry(task.status.clone()).or_default() += 1;
    }
    let task_lines = dag
        .nodes
        .iter()
        .map(|task| match &task.spec {
            Some(spec) => format!("[{}] {}: {}", task.status, task.title, spec),
            None => format!("[{}] {}", task.status, task.title),
        })
        .collect();
    DagSummary { status_counts: counts.into_iter().collect(), task_lines }
}

fn dependency_ids(dag: &crate::collaborators::Dag, task_id: &str) -> (Vec<String>, Vec<String>) {
    let mut blocked_by = Vec::new();
    let mut blocking = Vec::new();
    for connection in &dag.connections {
        if connection.to == task_id {
            blocked_by.push(connection.from.clone());
        }
        if connection.from == task_id {
            blocking.push(connection.to.clone());
        }
    }
    (blocked_by, blocking)
}
