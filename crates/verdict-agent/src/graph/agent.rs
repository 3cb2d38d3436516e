use std::collections::BTreeSet;

use verdict_core::config::AgentConfig;

/// An agent definition: a named role bound to a fixed capability set.
///
/// An agent with neither callable tools nor delegate targets is terminal
/// and may only produce a final result.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSpec {
    /// Unique identifier within the graph.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Shown to delegating agents when they pick a target.
    pub description: String,
    /// Role instructions sent with every decision request.
    pub instructions: String,
    /// Tool ids this agent may call.
    pub callable_tools: BTreeSet<String>,
    /// Agent ids this agent may delegate to.
    pub delegate_targets: BTreeSet<String>,
    /// Named model profile; `None` selects the default model.
    pub model: Option<String>,
}

impl AgentSpec {
    /// Create an agent with no capabilities.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            instructions: String::new(),
            callable_tools: BTreeSet::new(),
            delegate_targets: BTreeSet::new(),
            model: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.callable_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delegates<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.delegate_targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_model(mut self, profile: impl Into<String>) -> Self {
        self.model = Some(profile.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.callable_tools.is_empty() && self.delegate_targets.is_empty()
    }

    pub fn can_call(&self, tool: &str) -> bool {
        self.callable_tools.contains(tool)
    }

    pub fn can_delegate_to(&self, agent: &str) -> bool {
        self.delegate_targets.contains(agent)
    }
}

impl From<&AgentConfig> for AgentSpec {
    fn from(config: &AgentConfig) -> Self {
        let mut spec = AgentSpec::new(&config.id, &config.name)
            .with_description(&config.description)
            .with_instructions(&config.prompt)
            .with_tools(config.can_use.iter().cloned())
            .with_delegates(config.can_delegate_to.iter().cloned());
        spec.model = config.model.clone();
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_builder() {
        let agent = AgentSpec::new("analyst", "Repository analyst")
            .with_description("Checks feasibility")
            .with_instructions("Use the analyzer.")
            .with_tools(["repo_analyzer"])
            .with_model("structured_output");

        assert_eq!(agent.id, "analyst");
        assert!(agent.can_call("repo_analyzer"));
        assert!(!agent.can_call("team_directory"));
        assert!(!agent.can_delegate_to("reviewer"));
        assert!(!agent.is_terminal());
        assert_eq!(agent.model.as_deref(), Some("structured_output"));
    }

    #[test]
    fn test_terminal_agent() {
        assert!(AgentSpec::new("summarizer", "Summarizer").is_terminal());
    }

    #[test]
    fn test_from_config() {
        let config = AgentConfig {
            id: "router".into(),
            name: "Router".into(),
            description: "Routes".into(),
            prompt: "Route the ticket.".into(),
            can_use: vec![],
            can_delegate_to: vec!["analyst".into(), "reviewer".into()],
            model: None,
        };
        let spec = AgentSpec::from(&config);
        assert_eq!(spec.instructions, "Route the ticket.");
        assert!(spec.can_delegate_to("reviewer"));
        assert_eq!(spec.delegate_targets.len(), 2);
    }
}
