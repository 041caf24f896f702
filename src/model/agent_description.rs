//! The role artifact: static per-agent-type instructions.

use serde::{Deserialize, Serialize};

/// Immutable for the life of a session unless explicitly reconfigured via
/// `SessionManager::set_agent_description`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentDescription {
    pub role_instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_instructions: Option<String>,
}

impl AgentDescription {
    pub fn new(role_instructions: impl Into<String>) -> Self {
        Self { role_instructions: role_instructions.into(), tool_instructions: None }
    }

    pub fn with_tool_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.tool_instructions = Some(instructions.into());
        self
    }
}
