use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::SubagentError;

/// Named profile a subagent runs under: which tools it may use, how long it
/// may run, and what gets appended to its system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentType {
    pub name: String,
    pub description: String,
    /// When set, the child's execution context only admits these tools.
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Extra instructions appended to the child's system prompt.
    #[serde(default)]
    pub prompt_addition: Option<String>,
}

fn default_max_turns() -> u32 {
    30
}

impl AgentType {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            allowed_tools: None,
            max_turns: default_max_turns(),
            prompt_addition: None,
        }
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = Some(tools);
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_prompt_addition(mut self, addition: impl Into<String>) -> Self {
        self.prompt_addition = Some(addition.into());
        self
    }
}

/// Lookup table of agent type profiles, keyed by name.
#[derive(Debug, Default)]
pub struct AgentTypeRegistry {
    types: HashMap<String, AgentType>,
}

impl AgentTypeRegistry {
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// Registry pre-loaded with the stock profiles.
    pub fn with_builtin_types() -> Self {
        let mut registry = Self::new();
        registry.register(
            AgentType::new("explorer", "read-only codebase exploration")
                .with_allowed_tools(vec!["file_read".into(), "grep".into(), "glob".into()]),
        );
        registry.register(AgentType::new(
            "general",
            "full-capability worker for delegated tasks",
        ));
        registry.register(
            AgentType::new("reviewer", "reads code and reports findings")
                .with_allowed_tools(vec!["file_read".into(), "grep".into()])
                .with_prompt_addition("Report findings; do not modify files."),
        );
        registry
    }

    /// Register a profile. Replaces any existing profile with the same name.
    pub fn register(&mut self, agent_type: AgentType) {
        self.types.insert(agent_type.name.clone(), agent_type);
    }

    pub fn get(&self, name: &str) -> Result<&AgentType, SubagentError> {
        self.types.get(name).ok_or_else(|| {
            SubagentError::UnknownAgentType {
                name: name.to_string(),
            }
        })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
