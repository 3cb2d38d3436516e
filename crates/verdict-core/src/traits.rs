use futures::future::BoxFuture;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// Model invocation: the opaque text-generation capability that picks
/// an agent's next step.
pub trait ModelInvoker: Send + Sync + 'static {
    /// Ask the model for exactly one decision for the given agent step.
    ///
    /// Transport or provider failures are `ModelInvocation`; a response
    /// that does not match the decision shape is `MalformedDecision`.
    fn decide(
        &self,
        config: &ModelConfig,
        request: DecisionRequest,
    ) -> BoxFuture<'_, Result<AgentDecision>>;
}

/// Tool transport: performs the network call behind a `ToolSpec`.
pub trait ToolTransport: Send + Sync + 'static {
    /// Call the tool once.
    ///
    /// `Err(ToolTransport)` means the call did not reach a usable answer and
    /// may be retried; `Ok` with `is_error` means the tool itself reported
    /// a failure.
    fn call(&self, spec: &ToolSpec, input: serde_json::Value) -> BoxFuture<'_, Result<ToolOutput>>;
}
