use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use verdict_core::config::{ModelConfig, RetryConfig};
use verdict_core::error::{Result, VerdictError};
use verdict_core::traits::ModelInvoker;
use verdict_core::types::{AgentDecision, DecisionRequest};

/// A model invoker that retries transient invocation failures.
///
/// Malformed decisions are never retried.
pub struct RetryingInvoker {
    inner: Box<dyn ModelInvoker>,
    retry_config: RetryConfig,
}

impl RetryingInvoker {
    pub fn new(inner: Box<dyn ModelInvoker>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

fn is_retryable(e: &VerdictError) -> bool {
    match e {
        VerdictError::ModelInvocation(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

/// Exponential backoff `initial * 2^attempt`, capped, with 0.8x to 1.2x jitter.
pub fn calculate_backoff(attempt: u32, initial_ms: u64, max_ms: u64) -> Duration {
    let ms = initial_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(max_ms);
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl ModelInvoker for RetryingInvoker {
    fn decide(
        &self,
        config: &ModelConfig,
        request: DecisionRequest,
    ) -> BoxFuture<'_, Result<AgentDecision>> {
        let config = config.clone();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let mut attempt = 0;
            loop {
                match self.inner.decide(&config, request.clone()).await {
                    Ok(decision) => return Ok(decision),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(
                            attempt,
                            self.retry_config.initial_backoff_ms,
                            self.retry_config.max_backoff_ms,
                        );
                        warn!(
                            job_id = %request.job_id,
                            agent_id = %request.agent_id,
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying model invocation"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdict_core::types::JobId;
    use verdict_test_utils::ScriptedModel;

    fn request() -> DecisionRequest {
        DecisionRequest {
            job_id: JobId::from_string("job-1"),
            agent_id: "router".into(),
            instructions: String::new(),
            context: String::new(),
            tools: vec![],
            delegates: vec![],
        }
    }

    fn retry_config() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let first = calculate_backoff(0, 100, 1000);
        assert!(first >= Duration::from_millis(80) && first <= Duration::from_millis(120));
        let capped = calculate_backoff(10, 100, 1000);
        assert!(capped <= Duration::from_millis(1200));
        assert!(capped >= Duration::from_millis(800));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&VerdictError::ModelInvocation("HTTP 503 Service Unavailable".into())));
        assert!(!is_retryable(&VerdictError::ModelInvocation("HTTP 401: bad key".into())));
        assert!(!is_retryable(&VerdictError::MalformedDecision("429".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let model = ScriptedModel::new();
        model
            .fail("router", "HTTP 503: overloaded")
            .on("router", AgentDecision::final_result(serde_json::json!("ok")));
        let model = std::sync::Arc::new(model);

        let invoker = RetryingInvoker::new(Box::new(SharedModel(model.clone())), retry_config());
        let decision = invoker
            .decide(&ModelConfig::new("m"), request())
            .await
            .unwrap();
        assert_eq!(decision, AgentDecision::final_result(serde_json::json!("ok")));
        assert_eq!(model.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_is_not_retried() {
        let model = std::sync::Arc::new(ScriptedModel::new());
        model.malformed("router", "not json");
        let invoker = RetryingInvoker::new(Box::new(SharedModel(model.clone())), retry_config());
        let err = invoker
            .decide(&ModelConfig::new("m"), request())
            .await
            .unwrap_err();
        assert!(matches!(err, VerdictError::MalformedDecision(_)));
        assert_eq!(model.request_count(), 1);
    }

    struct SharedModel(std::sync::Arc<ScriptedModel>);

    impl ModelInvoker for SharedModel {
        fn decide(
            &self,
            config: &ModelConfig,
            request: DecisionRequest,
        ) -> BoxFuture<'_, Result<AgentDecision>> {
            self.0.decide(config, request)
        }
    }
}
