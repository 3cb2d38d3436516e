use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::{debug, info};

use verdict_agent::JobSnapshot;
use verdict_core::error::VerdictError;
use verdict_core::types::{JobId, JobPhase, TicketPayload};

use crate::connection;
use crate::protocol::{ErrorBody, TicketCreated};
use crate::state::AppState;

/// A `VerdictError` rendered as `{"error": {"code", "message"}}`.
pub struct ApiError(VerdictError);

impl From<VerdictError> for ApiError {
    fn from(e: VerdictError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            VerdictError::JobNotFound(_) => StatusCode::NOT_FOUND,
            VerdictError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody::new(self.0.code(), self.0.to_string()))).into_response()
    }
}

#[derive(Deserialize)]
pub struct FromQuery {
    #[serde(default = "default_from")]
    pub from: u64,
}

fn default_from() -> u64 {
    1
}

// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "bind": state.config.bind,
        "jobs": state.jobs.len(),
    }))
}

// POST /tickets
pub async fn submit_ticket(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TicketPayload>,
) -> Result<(StatusCode, Json<TicketCreated>), ApiError> {
    let receipt = state.jobs.submit(payload.clone())?;
    info!(job_id = %receipt.job_id, "Ticket accepted");
    Ok((
        StatusCode::CREATED,
        Json(TicketCreated {
            id: receipt.job_id,
            title: payload.title,
            description: payload.description,
            acceptance_criteria: payload.acceptance_criteria,
            created_at: receipt.created_at,
            phase: JobPhase::Pending,
        }),
    ))
}

// GET /api/jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "jobs": state.jobs.list() }))
}

// GET /api/jobs/{id}
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    Ok(Json(state.jobs.status(&JobId::from_string(&id))?))
}

// GET /api/jobs/{id}/events?from=1
pub async fn job_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<FromQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let events = state.jobs.events(&JobId::from_string(&id), q.from)?;
    Ok(Json(serde_json::json!({ "events": events })))
}

// POST /api/jobs/{id}/cancel
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let job_id = JobId::from_string(&id);
    let phase = state.jobs.cancel(&job_id)?;
    let status = if phase.is_terminal() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((
        status,
        Json(serde_json::json!({ "id": job_id, "phase": phase })),
    ))
}

// GET /ws/ticket/{id}/eval?from=1
//
// The job is looked up before the upgrade so an unknown id is a plain 404.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<FromQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let job_id = JobId::from_string(&id);
    let events = match state.jobs.subscribe(&job_id, q.from) {
        Ok(events) => events,
        Err(e) => {
            debug!(job_id = %job_id, "Stream requested for unknown job");
            return ApiError::from(e).into_response();
        }
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    info!(job_id = %job_id, from = q.from, "WebSocket observer connected");
    let jobs = state.jobs.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, jobs, job_id, events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use verdict_agent::{DelegationRouter, JobManager};
    use verdict_core::types::AgentDecision;
    use verdict_test_utils::{sample_config, MockTransport, ScriptedModel};

    use crate::server::GatewayServer;

    fn app() -> axum::Router {
        let config = Arc::new(sample_config());
        let model = Arc::new(ScriptedModel::new());
        model.on("router", AgentDecision::final_result(serde_json::json!("ok")));
        let router =
            DelegationRouter::from_config(config.clone(), Arc::new(MockTransport::new()), model)
                .unwrap();
        let jobs = Arc::new(JobManager::new(Arc::new(router), config.jobs.clone()));
        GatewayServer::new(config.gateway.clone(), jobs).router()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_blank_ticket_is_rejected() {
        let resp = app()
            .oneshot(
                Request::post("/tickets")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"title":"","description":"d","acceptance_criteria":"c"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "invalid_payload");
    }

    #[tokio::test]
    async fn test_ticket_created() {
        let resp = app()
            .oneshot(
                Request::post("/tickets")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"title":"Login bug","description":"Users cannot log in","acceptance_criteria":"Login works"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["title"], "Login bug");
        assert_eq!(body["phase"], "pending");
        assert_eq!(body["id"].as_str().unwrap().len(), 36);
    }

    #[tokio::test]
    async fn test_unknown_job_is_404_before_upgrade() {
        let resp = app()
            .oneshot(
                Request::get("/ws/ticket/does-not-exist/eval")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], "job_not_found");

        let resp = app()
            .oneshot(Request::get("/api/jobs/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health() {
        let resp = app()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }
}
