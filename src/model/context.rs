//! The context artifact: an ephemeral, rebuilt-per-request snapshot of the
//! project, feature, task, DAG, and history surrounding a session.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitDigest {
    pub short_hash: String,
    pub message: String,
    pub author: String,
    /// Pre-formatted relative date string ("3 days ago") — computed once by
    /// the assembler at build time so the context snapshot is stable.
    pub relative_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentTask {
    pub id: String,
    pub title: String,
    pub state: String,
    pub blocked_by: Vec<String>,
    pub blocking: Vec<String>,
}

/// A `status: count` rollup plus a flat, human-scannable task list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DagSummary {
    pub status_counts: Vec<(String, u64)>,
    pub task_lines: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    pub project_root: String,
    pub feature_id: String,
    pub feature_name: String,
    pub feature_goal: Option<String>,
    pub current_task: Option<CurrentTask>,
    pub dag_summary: Option<DagSummary>,
    pub project_structure: Option<String>,
    pub claude_md: Option<String>,
    pub project_md: Option<String>,
    pub recent_commits: Vec<CommitDigest>,
    pub attachments: Vec<String>,
}

impl SessionContext {
    pub fn minimal(project_root: impl Into<String>, feature_id: impl Into<String>, feature_name: impl Into<String>) -> Self {
        Self {
            project_root: project_root.into(),
            feature_id: feature_id.into(),
            feature_name: feature_name.into(),
            ..Default::default()
        }
    }
}
