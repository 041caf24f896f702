//! C1 — TokenEstimator: deterministic, stateless token-counting heuristics.
//!
//! Exactness is not the goal (model-authoritative counting is explicitly a
//! non-goal); determinism and conservative-enough overheads are. Every
//! function here is pure and never suspends (§5), so the `SessionManager`
//! can call them freely on the hot path of every request.

use crate::model::{AgentDescription, ChatMessage, Memory, SessionContext, TokenEstimate};

/// Characters per token for the heuristic estimate.
pub const CHARS_PER_TOKEN: u64 = 4;
/// Hard ceiling on total request tokens.
pub const TOKEN_LIMIT: u64 = 100_000;
/// Threshold above which a request needs compaction before dispatch.
pub const COMPACTION_THRESHOLD: u64 = 90_000;

const MESSAGE_OVERHEAD: u64 = 10;
const CHECKPOINT_OVERHEAD: u64 = 50;
const CONTEXT_OVERHEAD: u64 = 100;
const AGENT_DESCRIPTION_OVERHEAD: u64 = 20;

/// What `SessionManager::build_request` feeds to `estimate_request`.
pub struct RequestParts<'a> {
    pub agent_description: &'a AgentDescription,
    pub context: &'a SessionContext,
    pub checkpoint: Option<&'a Memory>,
    pub messages: &'a [ChatMessage],
    pub user_prompt: &'a str,
}

/// `ceil(len(s)/4)`; empty or absent input is zero tokens.
pub fn estimate_tokens(s: &str) -> u64 {
    if s.is_empty() {
        return 0;
    }
    let chars = s.chars().count() as u64;
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Sum over messages of `estimate_tokens(content) + 10`; if a message
/// carries model-reported token counts, those substitute for the content
/// estimate but the `+10` structural overhead still applies.
pub fn estimate_messages_tokens(messages: &[ChatMessage]) -> u64 {
    messages
        .iter()
        .map(|m| {
            let content_tokens = match m.metadata.tokens {
                Some(reported) => reported.input + reported.output,
                None => estimate_tokens(&m.content),
            };
            content_tokens + MESSAGE_OVERHEAD
        })
        .sum()
}

/// Sum of `estimate_tokens(join(bucket, "\n"))` over all three summary
/// buckets, plus a fixed overhead. Panics on a `None` memory — callers
/// that have no memory yet should simply not call this (mirrors the
/// spec's "must fail loudly when given a nil memory").
pub fn estimate_checkpoint_tokens(memory: &Memory) -> u64 {
    memory
        .summary
        .buckets()
        .iter()
        .map(|bucket| estimate_tokens(&bucket.join("\n")))
        .sum::<u64>()
        + CHECKPOINT_OVERHEAD
}

/// Sum of token estimates of all populated text fields of a context, plus
/// overhead. Array fields (commits, attachments, task lines) are joined
/// with newlines before estimating.
///
/// `project_root` and `feature_id` are identifiers, not prompt content —
/// they are excluded from the estimate (this is what makes S1's literal
/// `total = 20 + 100 + 0 + 0 = 120` hold for a context that only carries
/// those two fields plus an empty `feature_name`).
pub fn estimate_context_tokens(ctx: &SessionContext) -> u64 {
    let mut total = 0u64;
    total += estimate_tokens(&ctx.feature_name);
    if let Some(goal) = &ctx.feature_goal {
        total += estimate_tokens(goal);
    }
    if let Some(task) = &ctx.current_task {
        total += estimate_tokens(&task.id);
        total += estimate_tokens(&task.title);
        total += estimate_tokens(&task.state);
        total += estimate_tokens(&task.blocked_by.join("\n"));
        total += estimate_tokens(&task.blocking.join("\n"));
    }
    if let Some(dag) = &ctx.dag_summary {
        let status_line = dag
            .status_counts
            .iter()
            .map(|(status, count)| format!("{status}: {count}"))
            .collect::<Vec<_>>()
            .join(", ");
        total += estimate_tokens(&status_line);
        total += estimate_tokens(&dag.task_lines.join("\n"));
    }
    if let Some(structure) = &ctx.project_structure {
        total += estimate_tokens(structure);
    }
    if let Some(claude_md) = &ctx.claude_md {
        total += estimate_tokens(claude_md);
    }
    if let Some(project_md) = &ctx.project_md {
        total += estimate_tokens(project_md);
    }
    if !ctx.recent_commits.is_empty() {
        let joined = ctx
            .recent_commits
            .iter()
            .map(|c| format!("{} {} {} {}", c.short_hash, c.message, c.author, c.relative_date))
            .collect::<Vec<_>>()
            .join("\n");
        total += estimate_tokens(&joined);
    }
    if !ctx.attachments.is_empty() {
        total += estimate_tokens(&ctx.attachments.join("\n"));
    }
    total + CONTEXT_OVERHEAD
}

/// `tokens(roleInstructions) + tokens(toolInstructions) + 20`.
pub fn estimate_agent_description_tokens(desc: &AgentDescription) -> u64 {
    estimate_tokens(&desc.role_instructions)
        + desc.tool_instructions.as_deref().map(estimate_tokens).unwrap_or(0)
        + AGENT_DESCRIPTION_OVERHEAD
}

/// Composes every section into a full [`TokenEstimate`].
/// `total = system + userPrompt` where `system = agent + context +
/// checkpoint? + messages`.
pub fn estimate_request(parts: &RequestParts<'_>) -> TokenEstimate {
    let agent_tokens = estimate_agent_description_tokens(parts.agent_description);
    let context_tokens = estimate_context_tokens(parts.context);
    let checkpoint_tokens = parts.checkpoint.map(estimate_checkpoint_tokens).unwrap_or(0);
    let messages_tokens = estimate_messages_tokens(parts.messages);
    let user_prompt_tokens = estimate_tokens(parts.user_prompt);

    let total = agent_tokens + context_tokens + checkpoint_tokens + messages_tokens + user_prompt_tokens;

    TokenEstimate {
        agent_tokens,
        context_tokens,
        checkpoint_tokens,
        messages_tokens,
        user_prompt_tokens,
        total,
        limit: TOKEN_LIMIT,
        needs_compaction: total > COMPACTION_THRESHOLD,
    }
}

/// Predicted token savings if `messages` were folded into memory, combined
/// with the current checkpoint (if any). Heuristic: the new memory will be
/// roughly 30% the size of what it replaces.
pub fn estimate_tokens_reclaimed(messages: &[ChatMessage], current_checkpoint: Option<&Memory>) -> u64 {
    let checkpoint_tokens = current_checkpoint.map(estimate_checkpoint_tokens).unwrap_or(0);
    let combined = checkpoint_tokens + estimate_messages_tokens(messages);
    let new_memory_estimate = (combined as f64 * 0.30).round() as u64;
    combined.saturating_sub(new_memory_estimate)
}

/// Greedily walks `messages` from newest to oldest, accumulating per-message
/// cost (content tokens + overhead) until the next message would exceed
/// `limit`. Always keeps at least one message, even if it alone exceeds
/// the limit — there is no smaller unit to fall back to.
pub fn determine_messages_to_keep(messages: &[ChatMessage], limit: u64) -> usize {
    if messages.is_empty() {
        return 0;
    }

    let mut running = 0u64;
    let mut keep = 0usize;
    for message in messages.iter().rev() {
        let cost = {
            let content_tokens = match message.metadata.tokens {
                Some(reported) => reported.input + reported.output,
                None => estimate_tokens(&message.content),
            };
            content_tokens + MESSAGE_OVERHEAD
        };
        if keep > 0 && running + cost > limit {
            break;
        }
        running += cost;
        keep += 1;
    }
    keep.max(1)
}
