//! The compaction prompt/response grammar (§9.1-b): what the
//! [`super::CompactionEngine`] asks the agent for, and how it parses the
//! answer back into a [`MemorySummary`].
//!
//! Grounded in the teacher's `compact_context` prompt
//! (`brain/agent/service/context.rs`), which already asks for exactly this
//! shape of `## `-prefixed markdown sections. Parsing is line-oriented: a
//! `## <Heading>` line opens a bucket, subsequent non-empty lines
//! (optionally `- `-prefixed) are items, a blank run or the next heading
//! closes it. Unrecognized headings are ignored; a response with zero
//! recognized headings is a parse failure.

use crate::model::{ChatMessage, Memory, MemorySummary};
use crate::prompt::{format_checkpoint_as_prompt, format_messages_as_prompt};

const DECISION_TAG: &str = "[decision] ";
const BLOCKER_TAG: &str = "[blocker] ";

const HEADINGS: &[&str] = &["Completed", "In Progress", "Pending", "Blockers", "Key Decisions"];

/// The instructions half of the compaction request: carries the existing
/// checkpoint (if any) so the agent can preserve items that are not
/// superseded, per §4.5 step 3.
pub fn build_system_prompt(current_memory: Option<&Memory>) -> String {
    let mut out = String::from(
        "You are compacting a long-running coding-agent conversation. \
         Produce a structured checkpoint that will be the ONLY memory of \
         everything discussed so far once the messages below are removed \
         from the conversation. Preserve every item already in the \
         checkpoint below unless it has since been superseded or completed — \
         do not silently drop prior decisions or pending work.",
    );

    if let Some(memory) = current_memory {
        let rendered = format_checkpoint_as_prompt(memory);
        if !rendered.is_empty() {
            out.push_str("\n\n");
            out.push_str(&rendered);
        }
    }

    out
}

/// The message half: the conversation slice being folded, plus the
/// response-shape instruction.
pub fn build_user_prompt(messages_to_fold: &[ChatMessage]) -> String {
    let mut out = format_messages_as_prompt(messages_to_fold);
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(
        "Summarize the conversation above into exactly these five \
         `## `-prefixed sections, each as a bullet list (omit a section \
         only if it is genuinely empty):\n\n\
         ## Completed\n\
         Work that is finished and verified.\n\n\
         ## In Progress\n\
         Work that is underway but not yet done.\n\n\
         ## Pending\n\
         Work not yet started.\n\n\
         ## Blockers\n\
         Anything stopping progress.\n\n\
         ## Key Decisions\n\
         Decisions made and why, so they are not revisited.",
    );
    out
}

#[derive(Debug, thiserror::Error)]
#[error("compaction response had no recognized `## ` section headings")]
pub struct ParseError;

/// Parses the agent's structured response into the persisted three-bucket
/// [`MemorySummary`], per the §9.1-a mapping: `Completed`/`Key Decisions`
/// fold into `critical`, `In Progress`/`Blockers` into `important`,
/// `Pending` into `minor`. `Key Decisions` and `Blockers` items are tagged
/// so `PromptFormatter::format_checkpoint_as_prompt` can subdivide them
/// back out on render.
pub fn parse_compaction_response(response: &str) -> Result<MemorySummary, ParseError> {
    let mut sections: std::collections::HashMap<&str, Vec<String>> = std::collections::HashMap::new();
    let mut current: Option<&str> = None;

    for raw_line in response.lines() {
        let line = raw_line.trim();
        if let Some(heading) = line.strip_prefix("## ") {
            current = HEADINGS.iter().find(|h| **h == heading.trim()).copied();
            continue;
        }
        if line.is_empty() {
            continue;
        }
        if let Some(active) = current {
            let item = line.strip_prefix("- ").unwrap_or(line).trim();
            if !item.is_empty() {
                sections.entry(active).or_default().push(item.to_string());
            }
        }
    }

    if sections.is_empty() {
        return Err(ParseError);
    }

    let mut critical = Vec::new();
    critical.extend(sections.remove("Completed").unwrap_or_default());
    critical.extend(sections.remove("Key Decisions").unwrap_or_default().into_iter().map(|item| format!("{DECISION_TAG}{item}")));

    let mut important = Vec::new();
    important.extend(sections.remove("In Progress").unwrap_or_default());
    important.extend(sections.remove("Blockers").unwrap_or_default().into_iter().map(|item| format!("{BLOCKER_TAG}{item}")));

    let minor = sections.remove("Pending").unwrap_or_default();

    Ok(MemorySummary { critical, important, minor })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_five_headings_into_three_buckets() {
        let response = "## Completed\n- Shipped login\n\n## In Progress\n- Wiring billing\n\n\
                         ## Pending\n- Write docs\n\n## Blockers\n- Waiting on API keys\n\n\
                         ## Key Decisions\n- Use Postgres for storage\n";
        let summary = parse_compaction_response(response).unwrap();
        assert_eq!(summary.critical, vec!["Shipped login".to_string(), "[decision] Use Postgres for storage".to_string()]);
        assert_eq!(summary.important, vec!["Wiring billing".to_string(), "[blocker] Waiting on API keys".to_string()]);
        assert_eq!(summary.minor, vec!["Write docs".to_string()]);
    }

    #[test]
    fn ignores_unrecognized_headings() {
        let response = "## Random Heading\n- noise\n\n## Completed\n- Shipped login\n";
        let summary = parse_compaction_response(response).unwrap();
        assert_eq!(summary.critical, vec!["Shipped login".to_string()]);
    }

    #[test]
    fn zero_recognized_headings_is_a_parse_failure() {
        let response = "## Random Heading\n- noise\n";
        assert!(parse_compaction_response(response).is_err());
    }

    #[test]
    fn items_work_with_or_without_bullet_prefix() {
        let response = "## Completed\nShipped login\n- Shipped billing\n";
        let summary = parse_compaction_response(response).unwrap();
        assert_eq!(summary.critical, vec!["Shipped login".to_string(), "Shipped billing".to_string()]);
    }

    #[test]
    fn build_user_prompt_embeds_messages_and_instructions() {
        use crate::model::{ChatMessage, PartialMessage};
        use chrono::Utc;
        let messages = vec![ChatMessage::from_partial(PartialMessage::user("hello"), Utc::now())];
        let prompt = build_user_prompt(&messages);
        assert!(prompt.contains("hello"));
        assert!(prompt.contains("## Completed"));
    }

    #[test]
    fn build_system_prompt_includes_existing_checkpoint() {
        use crate::model::CompactionInfo;
        use chrono::Utc;
        let now = Utc::now();
        let memory = Memory {
            version: 1,
            created_at: now,
            updated_at: now,
            summary: MemorySummary { critical: vec!["Shipped login".to_string()], important: vec![], minor: vec![] },
            compaction_info: CompactionInfo { messages_compacted: 1, oldest_message_timestamp: now, newest_message_timestamp: now, compacted_at: now },
        };
        let prompt = build_system_prompt(Some(&memory));
        assert!(prompt.contains("Shipped login"));
    }
}
