use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use verdict_core::types::{JobId, JobPhase};

/// A frame sent from the client on an evaluation stream.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Cancel,
    Ping,
}

/// A control frame sent to the client. Progress events are sent as-is.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Pong,
    Error { error: ErrorPayload },
}

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Error body for HTTP responses: `{"error": {"code", "message"}}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorPayload,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorPayload {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

impl ServerFrame {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            error: ErrorPayload {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }
}

/// Response to `POST /tickets`.
#[derive(Debug, Serialize)]
pub struct TicketCreated {
    pub id: JobId,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: String,
    pub created_at: DateTime<Utc>,
    pub phase: JobPhase,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frames() {
        let f: ClientFrame = serde_json::from_str(r#"{"type":"cancel"}"#).unwrap();
        assert_eq!(f, ClientFrame::Cancel);
        let f: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(f, ClientFrame::Ping);
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"resume"}"#).is_err());
    }

    #[test]
    fn test_server_frames() {
        let pong = serde_json::to_value(ServerFrame::Pong).unwrap();
        assert_eq!(pong, serde_json::json!({"type": "pong"}));

        let err = serde_json::to_value(ServerFrame::error("bad_frame", "unknown type")).unwrap();
        assert_eq!(err["type"], "error");
        assert_eq!(err["error"]["code"], "bad_frame");
    }
}
