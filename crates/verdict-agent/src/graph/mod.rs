//! Agent graph: a fixed set of agent definitions plus one entry agent.
//!
//! Agents are connected by delegation edges (`delegate_targets`) and bound
//! to the tools they may call. A graph is validated once at startup and is
//! read-only afterwards; the `DelegationRouter` walks it with an explicit
//! frame stack.

pub mod agent;
pub mod context;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use verdict_core::config::{GraphConfig, ModelConfig};
use verdict_core::error::{Result, VerdictError};
use verdict_core::types::DelegateSummary;
use verdict_tools::ToolRegistry;

pub use agent::AgentSpec;
pub use context::FrameContext;

#[derive(Debug, Clone)]
pub struct AgentGraph {
    pub id: String,
    pub name: String,
    entry_agent: String,
    agents: BTreeMap<String, Arc<AgentSpec>>,
}

impl AgentGraph {
    /// Build a graph. Agent ids must be unique.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        entry_agent: impl Into<String>,
        agents: Vec<AgentSpec>,
    ) -> Result<Self> {
        let mut map = BTreeMap::new();
        for agent in agents {
            if map.contains_key(&agent.id) {
                return Err(VerdictError::InvalidGraph(format!(
                    "agent '{}' defined twice",
                    agent.id
                )));
            }
            map.insert(agent.id.clone(), Arc::new(agent));
        }
        Ok(Self {
            id: id.into(),
            name: name.into(),
            entry_agent: entry_agent.into(),
            agents: map,
        })
    }

    pub fn from_config(config: &GraphConfig) -> Result<Self> {
        Self::new(
            &config.id,
            config.name.clone().unwrap_or_else(|| config.id.clone()),
            &config.entry_agent,
            config.agents.iter().map(AgentSpec::from).collect(),
        )
    }

    pub fn entry_agent(&self) -> &str {
        &self.entry_agent
    }

    /// Look up an agent by id.
    pub fn resolve(&self, agent_id: &str) -> Result<Arc<AgentSpec>> {
        self.agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| VerdictError::UnknownAgent(agent_id.to_string()))
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentSpec> {
        self.agents.values().map(|a| a.as_ref())
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Delegation targets of `agent`, as offered in a decision request.
    pub fn delegate_summaries(&self, agent: &AgentSpec) -> Vec<DelegateSummary> {
        agent
            .delegate_targets
            .iter()
            .filter_map(|id| self.agents.get(id))
            .map(|a| DelegateSummary {
                id: a.id.clone(),
                name: a.name.clone(),
                description: a.description.clone(),
            })
            .collect()
    }

    /// Check that every reference in the graph resolves.
    ///
    /// Fails with `InvalidGraph` when the entry agent is missing, a delegate
    /// target or tool does not exist, or an agent names an unknown model
    /// profile. With `reject_cycles` a delegation cycle is also rejected.
    pub fn validate(
        &self,
        tools: &ToolRegistry,
        models: &HashMap<String, ModelConfig>,
        reject_cycles: bool,
    ) -> Result<()> {
        if !self.agents.contains_key(&self.entry_agent) {
            return Err(VerdictError::InvalidGraph(format!(
                "entry agent '{}' is not defined",
                self.entry_agent
            )));
        }

        for agent in self.agents.values() {
            for target in &agent.delegate_targets {
                if !self.agents.contains_key(target) {
                    return Err(VerdictError::InvalidGraph(format!(
                        "agent '{}' delegates to unknown agent '{}'",
                        agent.id, target
                    )));
                }
            }
            for tool in &agent.callable_tools {
                if !tools.contains(tool) {
                    return Err(VerdictError::InvalidGraph(format!(
                        "agent '{}' uses unregistered tool '{}'",
                        agent.id, tool
                    )));
                }
            }
            if let Some(ref profile) = agent.model {
                if !models.contains_key(profile) {
                    return Err(VerdictError::InvalidGraph(format!(
                        "agent '{}' uses unknown model profile '{}'",
                        agent.id, profile
                    )));
                }
            }
        }

        if reject_cycles {
            if let Some(cycle) = self.find_cycle() {
                return Err(VerdictError::InvalidGraph(format!(
                    "delegation cycle: {}",
                    cycle.join(" -> ")
                )));
            }
        }
        Ok(())
    }

    /// Find one delegation cycle, returned as the agent path that closes it.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnPath,
            Done,
        }

        let mut marks: HashMap<&str, Mark> =
            self.agents.keys().map(|k| (k.as_str(), Mark::Unvisited)).collect();

        for start in self.agents.keys() {
            if marks.get(start.as_str()) != Some(&Mark::Unvisited) {
                continue;
            }
            // Iterative DFS: (agent, index of the next target to visit).
            let mut path: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            marks.insert(start.as_str(), Mark::OnPath);

            while let Some((node, next)) = path.last().copied() {
                let targets: Vec<&str> = self
                    .agents
                    .get(node)
                    .map(|a| a.delegate_targets.iter().map(|s| s.as_str()).collect())
                    .unwrap_or_default();

                if next >= targets.len() {
                    marks.insert(node, Mark::Done);
                    path.pop();
                    continue;
                }
                if let Some(top) = path.last_mut() {
                    top.1 += 1;
                }

                let target = targets[next];
                match marks.get(target).copied() {
                    Some(Mark::OnPath) => {
                        let from = path.iter().position(|(n, _)| *n == target).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            path[from..].iter().map(|(n, _)| n.to_string()).collect();
                        cycle.push(target.to_string());
                        return Some(cycle);
                    }
                    Some(Mark::Unvisited) => {
                        marks.insert(target, Mark::OnPath);
                        path.push((target, 0));
                    }
                    _ => {}
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdict_core::types::ToolSpec;
    use verdict_test_utils::{sample_config, MockTransport};

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new(Arc::new(MockTransport::new()));
        reg.register(ToolSpec::new("repo_analyzer", "Repo", "http://t/repo"))
            .unwrap();
        reg
    }

    fn graph(agents: Vec<AgentSpec>) -> AgentGraph {
        AgentGraph::new("g", "Graph", "router", agents).unwrap()
    }

    #[test]
    fn test_resolve() {
        let g = graph(vec![AgentSpec::new("router", "Router")]);
        assert_eq!(g.resolve("router").unwrap().name, "Router");
        let err = g.resolve("ghost").unwrap_err();
        assert!(matches!(err, VerdictError::UnknownAgent(ref id) if id == "ghost"));
    }

    #[test]
    fn test_duplicate_agent_rejected() {
        let err = AgentGraph::new(
            "g",
            "Graph",
            "router",
            vec![AgentSpec::new("router", "A"), AgentSpec::new("router", "B")],
        )
        .unwrap_err();
        assert!(matches!(err, VerdictError::InvalidGraph(_)));
    }

    #[test]
    fn test_validate_sample_graph() {
        let config = sample_config();
        let g = AgentGraph::from_config(&config.graph).unwrap();
        let mut reg = ToolRegistry::new(Arc::new(MockTransport::new()));
        for tool in &config.graph.tools {
            reg.register(tool.to_spec()).unwrap();
        }
        g.validate(&reg, &config.models, true).unwrap();
        assert_eq!(g.entry_agent(), "router");
        assert_eq!(g.len(), 4);
        assert_eq!(g.name, "Ticket evaluation");
    }

    #[test]
    fn test_validate_missing_entry() {
        let g = AgentGraph::new("g", "Graph", "nobody", vec![AgentSpec::new("router", "R")]).unwrap();
        let err = g.validate(&registry(), &HashMap::new(), false).unwrap_err();
        assert!(err.to_string().contains("entry agent 'nobody'"));
    }

    #[test]
    fn test_validate_dangling_references() {
        let g = graph(vec![AgentSpec::new("router", "R").with_delegates(["ghost"])]);
        let err = g.validate(&registry(), &HashMap::new(), false).unwrap_err();
        assert!(err.to_string().contains("unknown agent 'ghost'"));

        let g = graph(vec![AgentSpec::new("router", "R").with_tools(["weather"])]);
        let err = g.validate(&registry(), &HashMap::new(), false).unwrap_err();
        assert!(err.to_string().contains("unregistered tool 'weather'"));

        let g = graph(vec![AgentSpec::new("router", "R").with_model("summarizer")]);
        let err = g.validate(&registry(), &HashMap::new(), false).unwrap_err();
        assert!(err.to_string().contains("unknown model profile 'summarizer'"));
    }

    #[test]
    fn test_cycles_allowed_unless_rejected() {
        let g = graph(vec![
            AgentSpec::new("router", "R").with_delegates(["a"]),
            AgentSpec::new("a", "A").with_delegates(["b"]),
            AgentSpec::new("b", "B").with_delegates(["a"]),
        ]);
        g.validate(&registry(), &HashMap::new(), false).unwrap();

        let cycle = g.find_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.contains(&"a".to_string()) && cycle.contains(&"b".to_string()));

        let err = g.validate(&registry(), &HashMap::new(), true).unwrap_err();
        assert!(err.to_string().contains("delegation cycle"));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let g = graph(vec![
            AgentSpec::new("router", "R").with_delegates(["a", "b"]),
            AgentSpec::new("a", "A").with_delegates(["c"]),
            AgentSpec::new("b", "B").with_delegates(["c"]),
            AgentSpec::new("c", "C"),
        ]);
        assert!(g.find_cycle().is_none());
    }

    #[test]
    fn test_delegate_summaries() {
        let g = graph(vec![
            AgentSpec::new("router", "R").with_delegates(["a"]),
            AgentSpec::new("a", "Analyst").with_description("Checks the repo"),
        ]);
        let router = g.resolve("router").unwrap();
        let sums = g.delegate_summaries(&router);
        assert_eq!(sums.len(), 1);
        assert_eq!(sums[0].description, "Checks the repo");
    }
}
