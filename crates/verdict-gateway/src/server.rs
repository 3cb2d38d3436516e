use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use verdict_agent::JobManager;
use verdict_core::config::GatewayConfig;

use crate::routes;
use crate::state::AppState;

/// HTTP + WebSocket gateway server built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    jobs: Arc<JobManager>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, jobs: Arc<JobManager>) -> Self {
        Self { config, jobs }
    }

    /// The gateway's routes, ready to serve.
    pub fn router(&self) -> Router {
        let state = Arc::new(AppState {
            config: self.config.clone(),
            jobs: self.jobs.clone(),
        });

        Router::new()
            // Submission
            .route("/tickets", post(routes::submit_ticket))
            // Progress stream
            .route("/ws/ticket/{id}/eval", get(routes::ws_handler))
            // REST API
            .route("/api/health", get(routes::health))
            .route("/api/jobs", get(routes::list_jobs))
            .route("/api/jobs/{id}", get(routes::job_status))
            .route("/api/jobs/{id}/events", get(routes::job_events))
            .route("/api/jobs/{id}/cancel", post(routes::cancel_job))
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the configured address and serve until `shutdown` is triggered.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.config.bind).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` is triggered.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(bind = %listener.local_addr()?, "Gateway listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}
