use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use verdict_core::error::{Result, VerdictError};
use verdict_core::traits::ToolTransport;
use verdict_core::types::{ToolOutput, ToolSpec, ToolSummary};

/// Registry of the tools an agent graph may call.
///
/// Specs are immutable once registered; the registry is shared read-only
/// across all running jobs.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<ToolSpec>>,
    transport: Arc<dyn ToolTransport>,
}

impl ToolRegistry {
    pub fn new(transport: Arc<dyn ToolTransport>) -> Self {
        Self {
            tools: HashMap::new(),
            transport,
        }
    }

    /// Register a tool. Ids must be unique.
    pub fn register(&mut self, spec: ToolSpec) -> Result<()> {
        if self.tools.contains_key(&spec.id) {
            return Err(VerdictError::InvalidGraph(format!(
                "tool '{}' registered twice",
                spec.id
            )));
        }
        self.tools.insert(spec.id.clone(), Arc::new(spec));
        Ok(())
    }

    /// Get a tool by id.
    pub fn get(&self, id: &str) -> Option<Arc<ToolSpec>> {
        self.tools.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tools.contains_key(id)
    }

    /// List all registered tool ids, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Summaries of the given tools for a decision request. Unknown ids are skipped.
    pub fn summaries<'a>(&self, ids: impl IntoIterator<Item = &'a String>) -> Vec<ToolSummary> {
        ids.into_iter()
            .filter_map(|id| self.tools.get(id))
            .map(|t| ToolSummary {
                id: t.id.clone(),
                name: t.name.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }

    /// Call a tool once, bounded by its timeout.
    pub async fn invoke(&self, id: &str, input: serde_json::Value) -> Result<ToolOutput> {
        let spec = self
            .get(id)
            .ok_or_else(|| VerdictError::ToolNotFound(id.to_string()))?;

        spec.check_input(&input)?;

        let timeout = Duration::from_secs(spec.timeout_secs);
        debug!(tool = %spec.id, endpoint = %spec.endpoint, "Invoking tool");

        match tokio::time::timeout(timeout, self.transport.call(&spec, input)).await {
            Ok(result) => result,
            Err(_) => Err(VerdictError::ToolTimeout {
                tool: id.to_string(),
                timeout_secs: spec.timeout_secs,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdict_test_utils::{MockTransport, ToolScript};

    fn registry(transport: Arc<MockTransport>) -> ToolRegistry {
        let mut reg = ToolRegistry::new(transport);
        reg.register(
            ToolSpec::new("geocode", "Geocode address", "http://geo.test/mcp").with_input_schema(
                serde_json::json!({"type": "object", "required": ["address"]}),
            ),
        )
        .unwrap();
        reg.register(ToolSpec::new("forecast", "Forecast weather", "http://wx.test/mcp").with_timeout_secs(1))
            .unwrap();
        reg
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut reg = registry(Arc::new(MockTransport::new()));
        let err = reg
            .register(ToolSpec::new("geocode", "again", "http://x"))
            .unwrap_err();
        assert!(matches!(err, VerdictError::InvalidGraph(_)));
        assert_eq!(reg.list(), vec!["forecast", "geocode"]);
    }

    #[test]
    fn test_summaries_skip_unknown() {
        let reg = registry(Arc::new(MockTransport::new()));
        let ids = vec!["geocode".to_string(), "nope".to_string()];
        let sums = reg.summaries(&ids);
        assert_eq!(sums.len(), 1);
        assert_eq!(sums[0].name, "Geocode address");
    }

    #[tokio::test]
    async fn test_invoke_success_and_unknown() {
        let transport = Arc::new(MockTransport::new());
        transport.script("geocode", ToolScript::ok(serde_json::json!({"lat": 1.5, "lon": 2.5})));
        let reg = registry(transport.clone());

        let out = reg
            .invoke("geocode", serde_json::json!({"address": "Main St"}))
            .await
            .unwrap();
        assert!(!out.is_error);
        assert_eq!(out.content["lat"], 1.5);
        assert_eq!(transport.calls("geocode"), 1);

        let err = reg.invoke("missing", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, VerdictError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_invoke_validates_input_before_call() {
        let transport = Arc::new(MockTransport::new());
        let reg = registry(transport.clone());
        let err = reg.invoke("geocode", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, VerdictError::ToolValidation(_)));
        assert_eq!(transport.calls("geocode"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke_times_out() {
        let transport = Arc::new(MockTransport::new());
        transport.script(
            "forecast",
            ToolScript::ok(serde_json::json!("sunny")).with_delay(Duration::from_secs(5)),
        );
        let reg = registry(transport);
        let err = reg.invoke("forecast", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, VerdictError::ToolTimeout { timeout_secs: 1, .. }));
        assert!(err.is_retryable_tool_failure());
    }
}
