use std::sync::Arc;

use verdict_agent::JobManager;
use verdict_core::config::GatewayConfig;

/// Shared application state for axum handlers.
pub struct AppState {
    pub config: GatewayConfig,
    pub jobs: Arc<JobManager>,
}
