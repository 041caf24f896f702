//! C2 — PromptFormatter: pure functions rendering context, memory, and
//! message sequences into markdown-like prompt fragments.
//!
//! Every section is omitted when its source data is absent, so a sparse
//! `SessionContext` (no commits, no CLAUDE.md) produces a correspondingly
//! sparse prompt rather than empty headings.

use crate::model::{ChatMessage, Memory, Role, SessionContext};
use std::fmt::Write;

/// `## Project Context`, plus the optional sub-sections the data supports.
pub fn format_context_as_prompt(ctx: &SessionContext) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## Project Context");
    let _ = writeln!(out, "Feature: {} ({})", ctx.feature_name, ctx.feature_id);
    if let Some(goal) = &ctx.feature_goal {
        let _ = writeln!(out, "Goal: {goal}");
    }

    if let Some(task) = &ctx.current_task {
        let _ = writeln!(out, "\n## Current Task");
        let _ = writeln!(out, "{} [{}]: {}", task.id, task.state, task.title);
        if !task.blocked_by.is_empty() {
            let _ = writeln!(out, "Blocked by: {}", task.blocked_by.join(", "));
        }
        if !task.blocking.is_empty() {
            let _ = writeln!(out, "Blocking: {}", task.blocking.join(", "));
        }
    }

    if let Some(structure) = &ctx.project_structure {
        let _ = writeln!(out, "\n## Project Structure");
        let _ = writeln!(out, "{structure}");
    }

    if let Some(claude_md) = &ctx.claude_md {
        let _ = writeln!(out, "\n## CLAUDE.md");
        let _ = writeln!(out, "{claude_md}");
    }

    if let Some(project_md) = &ctx.project_md {
        let _ = writeln!(out, "\n## PROJECT.md");
        let _ = writeln!(out, "{project_md}");
    }

    if !ctx.recent_commits.is_empty() {
        let _ = writeln!(out, "\n## Recent Commits");
        for commit in &ctx.recent_commits {
            let _ = writeln!(out, "- {} {} ({}, {})", commit.short_hash, commit.message, commit.author, commit.relative_date);
        }
    }

    if !ctx.attachments.is_empty() {
        let _ = writeln!(out, "\n## Attachments");
        for attachment in &ctx.attachments {
            let _ = writeln!(out, "- {attachment}");
        }
    }

    out.trim_end().to_string()
}

/// `## Session Checkpoint` with the five display subsections, each
/// omitted if empty. The persisted `critical`/`important`/`minor` buckets
/// are subdivided back into the five-way display vocabulary by the
/// `[decision]`/`[blocker]` tags the compaction parser embeds (see
/// `crate::compaction::grammar`); untagged items in `critical` render as
/// Completed, untagged items in `important` render as In Progress.
pub fn format_checkpoint_as_prompt(memory: &Memory) -> String {
    const DECISION_TAG: &str = "[decision] ";
    const BLOCKER_TAG: &str = "[blocker] ";

    let mut completed = Vec::new();
    let mut decisions = Vec::new();
    for item in &memory.summary.critical {
        if let Some(rest) = item.strip_prefix(DECISION_TAG) {
            decisions.push(rest.to_string());
        } else {
            completed.push(item.clone());
        }
    }

    let mut in_progress = Vec::new();
    let mut blockers = Vec::new();
    for item in &memory.summary.important {
        if let Some(rest) = item.strip_prefix(BLOCKER_TAG) {
            blockers.push(rest.to_string());
        } else {
            in_progress.push(item.clone());
        }
    }

    let pending = &memory.summary.minor;

    let sections: [(&str, &[String]); 5] = [
        ("Completed", &completed),
        ("In Progress", &in_progress),
        ("Pending", pending),
        ("Blockers", &blockers),
        ("Key Decisions", &decisions),
    ];

    if sections.iter().all(|(_, items)| items.is_empty()) {
        return String::new();
    }

    let mut out = String::new();
    let _ = writeln!(out, "## Session Checkpoint");
    for (heading, items) in sections {
        if items.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n### {heading}");
        for item in items {
            let _ = writeln!(out, "- {item}");
        }
    }
    out.trim_end().to_string()
}

/// `## Recent Conversation` followed by one `**Role**` block per message,
/// in order. Empty input yields an empty string.
pub fn format_messages_as_prompt(messages: &[ChatMessage]) -> String {
    if messages.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    let _ = writeln!(out, "## Recent Conversation");
    for message in messages {
        let label = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        };
        let _ = writeln!(out, "\n**{label}**");
        let _ = writeln!(out, "{}", message.content);
    }
    out.trim_end().to_string()
}
