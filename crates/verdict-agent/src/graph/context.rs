/// Working context of one delegation frame.
///
/// A frame starts from its task (the ticket for the entry agent, a sub-task
/// for delegates) and accumulates tool results and the final results of the
/// agents it delegated to. The whole context is rendered into every decision
/// request for the frame's agent.
#[derive(Debug, Clone, Default)]
pub struct FrameContext {
    background: Option<String>,
    task: String,
    entries: Vec<ContextEntry>,
}

#[derive(Debug, Clone)]
struct ContextEntry {
    source: EntrySource,
    value: serde_json::Value,
}

#[derive(Debug, Clone)]
enum EntrySource {
    Tool { id: String, failed: bool },
    Agent { id: String },
}

impl FrameContext {
    /// Context for the entry frame.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            background: None,
            task: task.into(),
            entries: Vec::new(),
        }
    }

    /// Context for a delegated frame: the ticket as background plus the sub-task.
    pub fn delegated(ticket: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            background: Some(ticket.into()),
            task: task.into(),
            entries: Vec::new(),
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a tool result. `failed` marks tool-reported or validation errors.
    pub fn push_tool_result(&mut self, tool: &str, value: serde_json::Value, failed: bool) {
        self.entries.push(ContextEntry {
            source: EntrySource::Tool {
                id: tool.to_string(),
                failed,
            },
            value,
        });
    }

    /// Record the final result of a delegated agent.
    pub fn push_agent_result(&mut self, agent: &str, value: serde_json::Value) {
        self.entries.push(ContextEntry {
            source: EntrySource::Agent {
                id: agent.to_string(),
            },
            value,
        });
    }

    /// Render as markdown for the decision request.
    pub fn render(&self) -> String {
        let mut out = String::new();

        if let Some(ref background) = self.background {
            out.push_str(background.trim_end());
            out.push_str("\n\n## Your task\n\n");
        }
        let task = self.task.trim();
        out.push_str(if task.is_empty() { "(no task given)" } else { task });
        out.push('\n');

        if !self.entries.is_empty() {
            out.push_str("\n## Results so far\n\n");
            for entry in &self.entries {
                let display = match &entry.value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                match &entry.source {
                    EntrySource::Tool { id, failed: false } => {
                        out.push_str(&format!("- tool `{}` returned: {}\n", id, display))
                    }
                    EntrySource::Tool { id, failed: true } => {
                        out.push_str(&format!("- tool `{}` failed: {}\n", id, display))
                    }
                    EntrySource::Agent { id } => {
                        out.push_str(&format!("- agent `{}` reported: {}\n", id, display))
                    }
                }
            }
        }
        out
    }
}
