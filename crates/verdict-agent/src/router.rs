use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use verdict_core::config::AppConfig;
use verdict_core::error::{Result, VerdictError};
use verdict_core::traits::{ModelInvoker, ToolTransport};
use verdict_core::types::{AgentDecision, DecisionRequest, EventDraft, EventKind, ToolOutput};
use verdict_llm::calculate_backoff;
use verdict_tools::ToolRegistry;

use crate::graph::{AgentGraph, AgentSpec, FrameContext};
use crate::jobs::JobRecord;

/// One entry of the delegation stack.
struct Frame {
    agent: Arc<AgentSpec>,
    context: FrameContext,
}

/// Drives one job through the agent graph.
///
/// Starting from the entry agent, each step asks the model for one
/// decision: call a tool, delegate to another agent, or return a final
/// result. Delegation pushes a frame; a final result pops one and is handed
/// to the parent frame. The job completes when the entry frame returns.
pub struct DelegationRouter {
    graph: Arc<AgentGraph>,
    tools: Arc<ToolRegistry>,
    model: Arc<dyn ModelInvoker>,
    config: Arc<AppConfig>,
}

impl DelegationRouter {
    pub fn new(
        graph: Arc<AgentGraph>,
        tools: Arc<ToolRegistry>,
        model: Arc<dyn ModelInvoker>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            graph,
            tools,
            model,
            config,
        }
    }

    /// Build the registry and graph from configuration and validate them.
    pub fn from_config(
        config: Arc<AppConfig>,
        transport: Arc<dyn ToolTransport>,
        model: Arc<dyn ModelInvoker>,
    ) -> Result<Self> {
        let mut tools = ToolRegistry::new(transport);
        for tool in &config.graph.tools {
            tools.register(tool.to_spec())?;
        }
        let graph = AgentGraph::from_config(&config.graph)?;
        graph.validate(&tools, &config.models, config.router.reject_cycles)?;
        info!(
            graph = %graph.id,
            agents = graph.len(),
            tools = tools.len(),
            entry = %graph.entry_agent(),
            "Agent graph loaded"
        );
        Ok(Self::new(Arc::new(graph), Arc::new(tools), model, config))
    }

    pub fn graph(&self) -> &AgentGraph {
        &self.graph
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run the job to a terminal state. Emits exactly one terminal event.
    pub async fn run(&self, job: &JobRecord) {
        let cancel = job.cancel_token().clone();
        if cancel.is_cancelled() {
            job.fail(&VerdictError::Cancelled);
            return;
        }

        let entry = self.graph.entry_agent().to_string();
        job.mark_running(&entry);
        job.publish(
            EventDraft::new(
                EventKind::Started,
                format!("Evaluating ticket '{}'", job.payload().title.trim()),
            )
            .with_progress(0)
            .with_payload(serde_json::json!({ "agent": entry })),
        );
        info!(job_id = %job.id(), entry = %entry, "Evaluation started");

        match self.drive(job, &cancel).await {
            Ok(result) => {
                info!(job_id = %job.id(), "Evaluation completed");
                job.complete(result);
            }
            Err(e) => {
                if matches!(e, VerdictError::Cancelled) {
                    info!(job_id = %job.id(), "Evaluation cancelled");
                } else {
                    error!(job_id = %job.id(), error = %e, "Evaluation failed");
                }
                job.fail(&e);
            }
        }
    }

    async fn drive(&self, job: &JobRecord, cancel: &CancellationToken) -> Result<serde_json::Value> {
        let limits = &self.config.router;
        let ticket = job.payload().as_task();

        let mut current = Frame {
            agent: self.graph.resolve(self.graph.entry_agent())?,
            context: FrameContext::new(ticket.clone()),
        };
        let mut parents: Vec<Frame> = Vec::new();
        let mut steps = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(VerdictError::Cancelled);
            }
            steps += 1;
            if steps > limits.max_steps {
                return Err(VerdictError::StepLimitExceeded(limits.max_steps));
            }

            let depth = parents.len() + 1;
            let agent = current.agent.clone();
            let decision = self.decide(job, &current, steps, cancel).await?;
            debug!(job_id = %job.id(), agent_id = %agent.id, step = steps, depth, ?decision, "Decision");

            // Only declared actions pass. A terminal agent declares none, so
            // any tool call or delegation from it fails here.
            match decision {
                AgentDecision::ToolCall { tool, input } => {
                    if !agent.can_call(&tool) {
                        return Err(VerdictError::UnauthorizedToolCall {
                            agent: agent.id.clone(),
                            tool,
                        });
                    }
                    self.run_tool(job, &agent, &mut current.context, &tool, input, cancel)
                        .await?;
                }
                AgentDecision::Delegate { agent: target, task } => {
                    if !agent.can_delegate_to(&target) {
                        return Err(VerdictError::UnauthorizedDelegation {
                            agent: agent.id.clone(),
                            target,
                        });
                    }
                    if depth >= limits.max_depth {
                        return Err(VerdictError::DelegationDepthExceeded(limits.max_depth));
                    }
                    let target_spec = self.graph.resolve(&target)?;

                    job.publish(
                        EventDraft::new(
                            EventKind::Delegated,
                            format!("{} delegated to {}", agent.name, target_spec.name),
                        )
                        .with_payload(serde_json::json!({
                            "from": agent.id,
                            "agent": target_spec.id,
                            "task": task,
                            "depth": depth + 1,
                        })),
                    );
                    job.set_current_agent(&target_spec.id);

                    let child = Frame {
                        agent: target_spec,
                        context: FrameContext::delegated(ticket.clone(), task),
                    };
                    parents.push(std::mem::replace(&mut current, child));
                }
                AgentDecision::FinalResult { result } => match parents.pop() {
                    None => return Ok(result),
                    Some(parent) => {
                        debug!(job_id = %job.id(), from = %agent.id, to = %parent.agent.id, "Returning to parent");
                        current = parent;
                        current.context.push_agent_result(&agent.id, result);
                        job.set_current_agent(&current.agent.id);
                    }
                },
            }
        }
    }

    /// Ask the model for the frame's next decision, bounded by the step timeout.
    async fn decide(
        &self,
        job: &JobRecord,
        frame: &Frame,
        step: usize,
        cancel: &CancellationToken,
    ) -> Result<AgentDecision> {
        let agent = &frame.agent;
        let profile = self.config.model_profile(agent.model.as_deref())?;
        let request = DecisionRequest {
            job_id: job.id().clone(),
            agent_id: agent.id.clone(),
            instructions: agent.instructions.clone(),
            context: frame.context.render(),
            tools: self.tools.summaries(&agent.callable_tools),
            delegates: self.graph.delegate_summaries(agent),
        };

        let timeout_secs = self.config.router.step_timeout_secs;
        tokio::select! {
            _ = cancel.cancelled() => Err(VerdictError::Cancelled),
            outcome = tokio::time::timeout(
                Duration::from_secs(timeout_secs),
                self.model.decide(profile, request),
            ) => match outcome {
                Ok(decision) => decision,
                Err(_) => Err(VerdictError::StepTimeout {
                    step: format!("step {} ({})", step, agent.id),
                    timeout_secs,
                }),
            },
        }
    }

    /// Emit `ToolInvoked`, call the tool with retries, emit `ToolResult` and
    /// record the outcome in the frame context.
    async fn run_tool(
        &self,
        job: &JobRecord,
        agent: &AgentSpec,
        context: &mut FrameContext,
        tool: &str,
        input: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<()> {
        job.publish(
            EventDraft::new(EventKind::ToolInvoked, format!("{} is calling {}", agent.name, tool))
                .with_payload(serde_json::json!({
                    "agent": agent.id,
                    "tool": tool,
                    "input": input,
                })),
        );

        match self.call_with_retry(job, tool, input, cancel).await {
            Ok(ToolOutput { content, is_error }) => {
                let message = if is_error {
                    format!("{} reported an error", tool)
                } else {
                    format!("{} returned", tool)
                };
                job.publish(
                    EventDraft::new(EventKind::ToolResult, message).with_payload(serde_json::json!({
                        "agent": agent.id,
                        "tool": tool,
                        "success": !is_error,
                        "output": content,
                    })),
                );
                context.push_tool_result(tool, content, is_error);
                Ok(())
            }
            Err(e @ VerdictError::ToolValidation(_)) => {
                // The agent sent bad input; let it correct itself.
                job.publish(
                    EventDraft::new(EventKind::ToolResult, format!("{} rejected its input", tool))
                        .with_payload(serde_json::json!({
                            "agent": agent.id,
                            "tool": tool,
                            "success": false,
                            "error": e.to_string(),
                        })),
                );
                context.push_tool_result(tool, serde_json::Value::String(e.to_string()), true);
                Ok(())
            }
            Err(e @ VerdictError::ToolCallExhausted { .. }) => {
                job.publish(
                    EventDraft::new(EventKind::ToolResult, format!("{} failed", tool))
                        .with_payload(serde_json::json!({
                            "agent": agent.id,
                            "tool": tool,
                            "success": false,
                            "error": e.to_string(),
                        })),
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Call a tool, retrying transport failures and timeouts with backoff.
    ///
    /// The call itself runs in its own task: on cancellation the task is
    /// left to finish on its own and its result is discarded.
    async fn call_with_retry(
        &self,
        job: &JobRecord,
        tool: &str,
        input: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput> {
        let limits = &self.config.router;
        let max_attempts = limits.tool_max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            let registry = self.tools.clone();
            let tool_id = tool.to_string();
            let call_input = input.clone();
            let handle = tokio::spawn(async move { registry.invoke(&tool_id, call_input).await });

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(VerdictError::Cancelled),
                joined = handle => joined.unwrap_or_else(|e| {
                    Err(VerdictError::ToolTransport {
                        tool: tool.to_string(),
                        message: format!("tool task failed: {}", e),
                    })
                }),
            };

            match outcome {
                Err(e) if e.is_retryable_tool_failure() => {
                    if attempt >= max_attempts {
                        return Err(VerdictError::ToolCallExhausted {
                            tool: tool.to_string(),
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }
                    let backoff = calculate_backoff(
                        attempt - 1,
                        limits.tool_initial_backoff_ms,
                        limits.tool_max_backoff_ms,
                    );
                    warn!(
                        job_id = %job.id(),
                        tool,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retrying tool call"
                    );
                    job.publish(
                        EventDraft::new(
                            EventKind::Progress,
                            format!("Retrying {} (attempt {}/{})", tool, attempt + 1, max_attempts),
                        )
                        .with_payload(serde_json::json!({
                            "tool": tool,
                            "attempt": attempt + 1,
                            "max_attempts": max_attempts,
                            "error": e.to_string(),
                        })),
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(VerdictError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
