use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, VerdictError};

/// Unique evaluation job identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A ticket submitted for evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketPayload {
    pub title: String,
    pub description: String,
    pub acceptance_criteria: String,
}

impl TicketPayload {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        acceptance_criteria: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            acceptance_criteria: acceptance_criteria.into(),
        }
    }

    /// Reject blank fields before any job exists for this payload.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("title", &self.title),
            ("description", &self.description),
            ("acceptance_criteria", &self.acceptance_criteria),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(VerdictError::InvalidPayload(format!("{} is required", name)));
            }
        }
        Ok(())
    }

    /// Render the ticket as the initial task for the entry agent.
    pub fn as_task(&self) -> String {
        format!(
            "## Ticket\n\n**Title**: {}\n\n**Description**:\n{}\n\n**Acceptance criteria**:\n{}\n",
            self.title.trim(),
            self.description.trim(),
            self.acceptance_criteria.trim()
        )
    }
}

/// Lifecycle phase of an evaluation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Kind of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    Delegated,
    ToolInvoked,
    ToolResult,
    Progress,
    Completed,
    Failed,
}

impl EventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One ordered, immutable record in a job's event log.
///
/// Serialized in the shape the streaming clients expect:
/// `{type, message, timestamp, progressPercent?, jobId, sequence, payload?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<u8>,
    pub job_id: JobId,
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// An event before the bus has assigned its sequence and timestamp.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub kind: EventKind,
    pub message: String,
    pub progress_percent: Option<u8>,
    pub payload: Option<serde_json::Value>,
}

impl EventDraft {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            progress_percent: None,
            payload: None,
        }
    }

    pub fn with_progress(mut self, percent: u8) -> Self {
        self.progress_percent = Some(percent.min(100));
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Receipt returned synchronously by a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReceipt {
    pub job_id: JobId,
    pub created_at: DateTime<Utc>,
}

/// A registered external tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub id: String,
    pub name: String,
    /// Network endpoint the tool call is sent to.
    pub endpoint: String,
    #[serde(default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
    #[serde(default = "empty_object_schema")]
    pub output_schema: serde_json::Value,
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

fn default_tool_timeout() -> u64 {
    30
}

impl ToolSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            endpoint: endpoint.into(),
            input_schema: empty_object_schema(),
            output_schema: empty_object_schema(),
            timeout_secs: default_tool_timeout(),
        }
    }

    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Check that every `required` property of the input schema is present.
    pub fn check_input(&self, input: &serde_json::Value) -> Result<()> {
        let Some(required) = self.input_schema.get("required").and_then(|r| r.as_array()) else {
            return Ok(());
        };
        let missing: Vec<&str> = required
            .iter()
            .filter_map(|k| k.as_str())
            .filter(|k| input.get(*k).is_none())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(VerdictError::ToolValidation(format!(
                "{}: missing required input {}",
                self.id,
                missing.join(", ")
            )))
        }
    }
}

/// Output of a tool call that reached the tool service.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: serde_json::Value,
    /// The service answered, but flagged the result as an error.
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: serde_json::Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(content: serde_json::Value) -> Self {
        Self {
            content,
            is_error: true,
        }
    }
}

/// The single action an agent chooses at each step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentDecision {
    ToolCall {
        tool: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    Delegate {
        agent: String,
        #[serde(default)]
        task: String,
    },
    FinalResult { result: serde_json::Value },
}

impl AgentDecision {
    pub fn tool_call(tool: impl Into<String>, input: serde_json::Value) -> Self {
        Self::ToolCall {
            tool: tool.into(),
            input,
        }
    }

    pub fn delegate(agent: impl Into<String>, task: impl Into<String>) -> Self {
        Self::Delegate {
            agent: agent.into(),
            task: task.into(),
        }
    }

    pub fn final_result(result: serde_json::Value) -> Self {
        Self::FinalResult { result }
    }
}

/// A tool offered to an agent in a decision request.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSummary {
    pub id: String,
    pub name: String,
    pub input_schema: serde_json::Value,
}

/// A delegation target offered to an agent in a decision request.
#[derive(Debug, Clone, Serialize)]
pub struct DelegateSummary {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Everything the model-invocation capability needs to choose one step.
#[derive(Debug, Clone)]
pub struct DecisionRequest {
    pub job_id: JobId,
    pub agent_id: String,
    pub instructions: String,
    /// Rendered frame context (task plus accumulated results).
    pub context: String,
    pub tools: Vec<ToolSummary>,
    pub delegates: Vec<DelegateSummary>,
}
