//! Scripted fakes and fixtures shared by the Verdict test suites.
//!
//! `ScriptedModel` stands in for the model-invocation capability and
//! `MockTransport` for the tool services, so router and gateway tests run
//! without network access.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use verdict_core::config::{AppConfig, ModelConfig};
use verdict_core::error::{Result, VerdictError};
use verdict_core::traits::{ModelInvoker, ToolTransport};
use verdict_core::types::{AgentDecision, DecisionRequest, TicketPayload, ToolOutput, ToolSpec};

/// Graph used across the test suites:
/// `router -> {analyst, reviewer}`, `reviewer -> {summarizer}`,
/// `analyst` may call `repo_analyzer`, `reviewer` may call `team_directory`.
pub const SAMPLE_CONFIG: &str = r#"
[model]
model_id = "test-model"

[models.summarizer]
model_id = "test-model-small"

[router]
max_depth = 25
tool_max_attempts = 3
tool_initial_backoff_ms = 10
tool_max_backoff_ms = 50

[graph]
id = "ticket-eval"
name = "Ticket evaluation"
entry_agent = "router"

[[graph.tools]]
id = "repo_analyzer"
name = "Repository analyzer"
server_url = "http://tools.test/repo"
timeout_secs = 5
input_schema = { type = "object", required = ["repo"] }

[[graph.tools]]
id = "team_directory"
name = "Team directory"
server_url = "http://tools.test/directory"

[[graph.agents]]
id = "router"
name = "Router"
description = "Routes the ticket to specialists"
prompt = "Decide which specialist evaluates each part of the ticket."
can_delegate_to = ["analyst", "reviewer"]

[[graph.agents]]
id = "analyst"
name = "Repository analyst"
description = "Checks the ticket against the codebase"
prompt = "Use the repository analyzer to check feasibility."
can_use = ["repo_analyzer"]

[[graph.agents]]
id = "reviewer"
name = "Criteria reviewer"
description = "Reviews acceptance criteria"
prompt = "Review the acceptance criteria."
can_use = ["team_directory"]
can_delegate_to = ["summarizer"]

[[graph.agents]]
id = "summarizer"
name = "Summarizer"
description = "Writes the verdict"
prompt = "Summarize the findings."
model = "summarizer"
"#;

/// The parsed sample configuration.
pub fn sample_config() -> AppConfig {
    AppConfig::parse(SAMPLE_CONFIG).expect("sample config parses")
}

/// A well-formed ticket.
pub fn ticket() -> TicketPayload {
    TicketPayload::new(
        "Add password reset",
        "Users need a way to reset a forgotten password via email.",
        "A reset link is emailed; the link expires after 1 hour.",
    )
}

// ── ScriptedModel ───────────────────────────────────────────────

struct ModelStep {
    result: std::result::Result<AgentDecision, ScriptedFailure>,
    delay: Option<Duration>,
}

#[derive(Clone)]
enum ScriptedFailure {
    Invocation(String),
    Malformed(String),
}

/// Model invoker that replays scripted decisions per agent id.
#[derive(Default)]
pub struct ScriptedModel {
    steps: Mutex<HashMap<String, VecDeque<ModelStep>>>,
    requests: Mutex<Vec<(String, DecisionRequest)>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, agent: &str, step: ModelStep) {
        self.steps
            .lock()
            .unwrap()
            .entry(agent.to_string())
            .or_default()
            .push_back(step);
    }

    /// Queue a decision for the next step of `agent`.
    pub fn on(&self, agent: &str, decision: AgentDecision) -> &Self {
        self.push(
            agent,
            ModelStep {
                result: Ok(decision),
                delay: None,
            },
        );
        self
    }

    /// Queue a decision that is returned after `delay`.
    pub fn on_after(&self, agent: &str, decision: AgentDecision, delay: Duration) -> &Self {
        self.push(
            agent,
            ModelStep {
                result: Ok(decision),
                delay: Some(delay),
            },
        );
        self
    }

    /// Queue an invocation failure.
    pub fn fail(&self, agent: &str, message: &str) -> &Self {
        self.push(
            agent,
            ModelStep {
                result: Err(ScriptedFailure::Invocation(message.to_string())),
                delay: None,
            },
        );
        self
    }

    /// Queue a response that does not match the decision shape.
    pub fn malformed(&self, agent: &str, raw: &str) -> &Self {
        self.push(
            agent,
            ModelStep {
                result: Err(ScriptedFailure::Malformed(raw.to_string())),
                delay: None,
            },
        );
        self
    }

    /// Every request received, with the model id it was sent to.
    pub fn requests(&self) -> Vec<(String, DecisionRequest)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl ModelInvoker for ScriptedModel {
    fn decide(
        &self,
        config: &ModelConfig,
        request: DecisionRequest,
    ) -> BoxFuture<'_, Result<AgentDecision>> {
        let model_id = config.model_id.clone();
        Box::pin(async move {
            let agent = request.agent_id.clone();
            self.requests.lock().unwrap().push((model_id, request));
            let step = self
                .steps
                .lock()
                .unwrap()
                .get_mut(&agent)
                .and_then(|q| q.pop_front());
            let Some(step) = step else {
                return Err(VerdictError::ModelInvocation(format!(
                    "no scripted decision left for agent '{}'",
                    agent
                )));
            };
            if let Some(delay) = step.delay {
                tokio::time::sleep(delay).await;
            }
            match step.result {
                Ok(decision) => Ok(decision),
                Err(ScriptedFailure::Invocation(m)) => Err(VerdictError::ModelInvocation(m)),
                Err(ScriptedFailure::Malformed(raw)) => Err(VerdictError::MalformedDecision(raw)),
            }
        })
    }
}

// ── MockTransport ───────────────────────────────────────────────

#[derive(Clone)]
enum ToolOutcome {
    Output(ToolOutput),
    TransportFailure(String),
}

/// One scripted tool response.
#[derive(Clone)]
pub struct ToolScript {
    outcome: ToolOutcome,
    delay: Option<Duration>,
}

impl ToolScript {
    pub fn ok(content: serde_json::Value) -> Self {
        Self {
            outcome: ToolOutcome::Output(ToolOutput::success(content)),
            delay: None,
        }
    }

    pub fn tool_error(content: serde_json::Value) -> Self {
        Self {
            outcome: ToolOutcome::Output(ToolOutput::error(content)),
            delay: None,
        }
    }

    pub fn transport_failure(message: &str) -> Self {
        Self {
            outcome: ToolOutcome::TransportFailure(message.to_string()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Tool transport that replays scripted responses per tool id.
///
/// Scripts are consumed in order; the last one repeats. Unscripted tools
/// echo their input.
#[derive(Default)]
pub struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<ToolScript>>>,
    calls: Mutex<HashMap<String, usize>>,
    finished: Mutex<HashMap<String, usize>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, tool: &str, script: ToolScript) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(tool.to_string())
            .or_default()
            .push_back(script);
        self
    }

    /// Number of calls started for `tool`.
    pub fn calls(&self, tool: &str) -> usize {
        self.calls.lock().unwrap().get(tool).copied().unwrap_or(0)
    }

    /// Number of calls for `tool` that ran to completion.
    pub fn finished(&self, tool: &str) -> usize {
        self.finished.lock().unwrap().get(tool).copied().unwrap_or(0)
    }

    fn next_script(&self, tool: &str) -> Option<ToolScript> {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.get_mut(tool)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl ToolTransport for MockTransport {
    fn call(&self, spec: &ToolSpec, input: serde_json::Value) -> BoxFuture<'_, Result<ToolOutput>> {
        let tool = spec.id.clone();
        Box::pin(async move {
            *self.calls.lock().unwrap().entry(tool.clone()).or_default() += 1;
            let script = self.next_script(&tool);

            if let Some(delay) = script.as_ref().and_then(|s| s.delay) {
                tokio::time::sleep(delay).await;
            }
            *self.finished.lock().unwrap().entry(tool.clone()).or_default() += 1;

            match script.map(|s| s.outcome) {
                Some(ToolOutcome::Output(out)) => Ok(out),
                Some(ToolOutcome::TransportFailure(message)) => {
                    Err(VerdictError::ToolTransport { tool, message })
                }
                None => Ok(ToolOutput::success(serde_json::json!({
                    "tool": tool,
                    "echo": input,
                }))),
            }
        })
    }
}
