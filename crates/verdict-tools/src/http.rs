use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use verdict_core::error::{Result, VerdictError};
use verdict_core::traits::ToolTransport;
use verdict_core::types::{ToolOutput, ToolSpec};

/// Calls tools as JSON-RPC `tools/call` requests over HTTP POST.
///
/// Connection failures, non-success HTTP statuses and JSON-RPC `error`
/// objects are transport failures and may be retried by the caller. A
/// `result` is the tool's own output; `isError: true` in it marks a
/// tool-reported error.
pub struct HttpToolTransport {
    http: Client,
    next_id: AtomicU64,
}

impl HttpToolTransport {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_client(http: Client) -> Self {
        Self {
            http,
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for HttpToolTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn transport_err(tool: &str, message: impl Into<String>) -> VerdictError {
    VerdictError::ToolTransport {
        tool: tool.to_string(),
        message: message.into(),
    }
}

/// Interpret a JSON-RPC response body.
pub(crate) fn parse_rpc_response(tool: &str, body: serde_json::Value) -> Result<ToolOutput> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(|m| m.to_string())
            .unwrap_or_else(|| error.to_string());
        return Err(transport_err(tool, format!("JSON-RPC error: {}", message)));
    }
    let result = body
        .get("result")
        .cloned()
        .ok_or_else(|| transport_err(tool, "response has neither result nor error"))?;
    let is_error = result
        .get("isError")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    Ok(ToolOutput {
        content: result,
        is_error,
    })
}

impl ToolTransport for HttpToolTransport {
    fn call(&self, spec: &ToolSpec, input: serde_json::Value) -> BoxFuture<'_, Result<ToolOutput>> {
        let tool = spec.id.clone();
        let endpoint = spec.endpoint.clone();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        Box::pin(async move {
            let body = serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "tools/call",
                "params": { "name": tool, "arguments": input },
            });

            let resp = self
                .http
                .post(&endpoint)
                .header("Accept", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| transport_err(&tool, e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                warn!(tool = %tool, status = status.as_u16(), "Tool endpoint returned error status");
                debug!(tool = %tool, body = %text, "Tool error body");
                return Err(transport_err(&tool, http_failure(status, &text)));
            }

            let value: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| transport_err(&tool, format!("invalid response body: {}", e)))?;
            parse_rpc_response(&tool, value)
        })
    }
}

fn http_failure(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>())
    }
}
