use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VerdictError};
use crate::types::ToolSpec;

/// Top-level Verdict configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default model profile, used by agents without a `model` override.
    pub model: ModelConfig,
    /// Named model profiles (e.g. `base`, `structured_output`, `summarizer`).
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    pub graph: GraphConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

impl ModelConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            provider: default_provider(),
            model_id: model_id.into(),
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Retry configuration for model invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Delegation router limits and tool retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Maximum number of frames on the delegation stack.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Maximum number of steps per job.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Bounded wait for one model invocation.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
    /// Total attempts per tool call, including the first.
    #[serde(default = "default_tool_max_attempts")]
    pub tool_max_attempts: u32,
    #[serde(default = "default_tool_initial_backoff")]
    pub tool_initial_backoff_ms: u64,
    #[serde(default = "default_tool_max_backoff")]
    pub tool_max_backoff_ms: u64,
    /// Reject graphs whose delegation edges form a cycle.
    #[serde(default)]
    pub reject_cycles: bool,
    /// Retry failed model invocations. Off unless configured.
    #[serde(default)]
    pub model_retry: Option<RetryConfig>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_steps: default_max_steps(),
            step_timeout_secs: default_step_timeout(),
            tool_max_attempts: default_tool_max_attempts(),
            tool_initial_backoff_ms: default_tool_initial_backoff(),
            tool_max_backoff_ms: default_tool_max_backoff(),
            reject_cycles: false,
            model_retry: None,
        }
    }
}

fn default_max_depth() -> usize { 25 }
fn default_max_steps() -> usize { 100 }
fn default_step_timeout() -> u64 { 120 }
fn default_tool_max_attempts() -> u32 { 3 }
fn default_tool_initial_backoff() -> u64 { 250 }
fn default_tool_max_backoff() -> u64 { 5000 }

/// Job retention and admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// How long a terminal, unobserved job is kept before eviction.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Maximum number of jobs running at once (unlimited when unset).
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    /// Cap on retained events per job (full log when unset).
    #[serde(default)]
    pub max_retained_events: Option<usize>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention(),
            sweep_interval_secs: default_sweep_interval(),
            max_concurrent: None,
            max_retained_events: None,
        }
    }
}

fn default_retention() -> u64 { 600 }
fn default_sweep_interval() -> u64 { 30 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String { "127.0.0.1:8000".to_string() }

/// Declarative agent graph: tools, agents and the entry agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(alias = "default_agent")]
    pub entry_agent: String,
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub id: String,
    pub name: String,
    pub server_url: String,
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ToolConfig {
    pub fn to_spec(&self) -> ToolSpec {
        let mut spec = ToolSpec::new(&self.id, &self.name, &self.server_url);
        if let Some(ref schema) = self.input_schema {
            spec = spec.with_input_schema(schema.clone());
        }
        if let Some(ref schema) = self.output_schema {
            spec = spec.with_output_schema(schema.clone());
        }
        if let Some(secs) = self.timeout_secs {
            spec = spec.with_timeout_secs(secs);
        }
        spec
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub can_use: Vec<String>,
    #[serde(default)]
    pub can_delegate_to: Vec<String>,
    /// Named model profile from `[models]`.
    #[serde(default)]
    pub model: Option<String>,
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| VerdictError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Parse config from a TOML string, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);

        toml::from_str(&expanded).map_err(|e| VerdictError::Config(e.to_string()))
    }

    /// Resolve a model profile by name; `None` selects the default model.
    pub fn model_profile(&self, name: Option<&str>) -> Result<&ModelConfig> {
        match name {
            None => Ok(&self.model),
            Some(n) => self
                .models
                .get(n)
                .ok_or_else(|| VerdictError::Config(format!("unknown model profile '{}'", n))),
        }
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
