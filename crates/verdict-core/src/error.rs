use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerdictError {
    // Graph / configuration errors
    #[error("Invalid agent graph: {0}")]
    InvalidGraph(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Routing errors
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent {agent} is not allowed to call tool {tool}")]
    UnauthorizedToolCall { agent: String, tool: String },

    #[error("Agent {agent} is not allowed to delegate to {target}")]
    UnauthorizedDelegation { agent: String, target: String },

    #[error("Delegation depth exceeded (max {0} frames)")]
    DelegationDepthExceeded(usize),

    #[error("Job exceeded max steps ({0})")]
    StepLimitExceeded(usize),

    #[error("Step timed out after {timeout_secs}s: {step}")]
    StepTimeout { step: String, timeout_secs: u64 },

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool transport failed: {tool}: {message}")]
    ToolTransport { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    #[error("Tool {tool} failed after {attempts} attempts: {message}")]
    ToolCallExhausted {
        tool: String,
        attempts: u32,
        message: String,
    },

    // Model errors
    #[error("Model invocation failed: {0}")]
    ModelInvocation(String),

    #[error("Malformed agent decision: {0}")]
    MalformedDecision(String),

    // Job errors
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Job cancelled")]
    Cancelled,

    // Gateway errors
    #[error("Gateway error: {0}")]
    Gateway(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VerdictError {
    /// Stable machine-readable cause, carried in `Failed` event payloads
    /// and gateway error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidGraph(_) => "invalid_graph",
            Self::Config(_) | Self::ConfigNotFound(_) => "config",
            Self::UnknownAgent(_) => "unknown_agent",
            Self::UnauthorizedToolCall { .. } => "unauthorized_tool_call",
            Self::UnauthorizedDelegation { .. } => "unauthorized_delegation",
            Self::DelegationDepthExceeded(_) => "delegation_depth_exceeded",
            Self::StepLimitExceeded(_) => "step_limit_exceeded",
            Self::StepTimeout { .. } => "step_timeout",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::ToolTransport { .. } => "tool_transport",
            Self::ToolTimeout { .. } => "tool_timeout",
            Self::ToolValidation(_) => "tool_validation",
            Self::ToolCallExhausted { .. } => "tool_call_exhausted",
            Self::ModelInvocation(_) | Self::MalformedDecision(_) => "model_invocation_failure",
            Self::JobNotFound(_) => "job_not_found",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Cancelled => "cancelled",
            Self::Gateway(_) => "gateway",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }

    /// Whether a failed tool call may be attempted again.
    pub fn is_retryable_tool_failure(&self) -> bool {
        matches!(self, Self::ToolTransport { .. } | Self::ToolTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, VerdictError>;
