pub mod prompt;
pub mod providers;
pub mod retry;

use std::sync::Arc;

use verdict_core::config::RouterConfig;
use verdict_core::traits::ModelInvoker;

pub use prompt::parse_decision;
pub use providers::openai::OpenAiInvoker;
pub use retry::{calculate_backoff, RetryingInvoker};

/// Create the model invoker, wrapped for retries when `router.model_retry` is set.
pub fn create_invoker(router: &RouterConfig) -> Arc<dyn ModelInvoker> {
    // Every configured provider speaks the OpenAI-compatible protocol.
    let base: Box<dyn ModelInvoker> = Box::new(OpenAiInvoker::new());
    match &router.model_retry {
        Some(retry) => Arc::new(RetryingInvoker::new(base, retry.clone())),
        None => Arc::from(base),
    }
}
