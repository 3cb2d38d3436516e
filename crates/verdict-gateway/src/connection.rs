use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use verdict_agent::JobManager;
use verdict_core::types::{JobId, ProgressEvent};

use crate::protocol::{ClientFrame, ServerFrame};

/// Stream one job's events to a WebSocket client.
///
/// Replayed and live events go out as one JSON text frame each, in sequence
/// order. After the terminal event the server sends a close frame. Dropping
/// the connection only detaches this observer; the job keeps running.
pub async fn handle_connection(
    ws: WebSocket,
    jobs: Arc<JobManager>,
    job_id: JobId,
    mut events: BoxStream<'static, ProgressEvent>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            next = events.next() => {
                let Some(event) = next else {
                    // `from` is past the end of a finished job's log.
                    let _ = ws_tx.send(close("no events after requested sequence")).await;
                    break;
                };
                let terminal = event.kind.is_terminal();
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "Failed to encode event");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
                if terminal {
                    let _ = ws_tx.send(close("evaluation finished")).await;
                    break;
                }
            }
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        debug!(job_id = %job_id, error = %e, "WebSocket read error");
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        let reply = match serde_json::from_str::<ClientFrame>(text.as_str()) {
                            Ok(ClientFrame::Cancel) => match jobs.cancel(&job_id) {
                                Ok(_) => None,
                                Err(e) => Some(ServerFrame::error(e.code(), e.to_string())),
                            },
                            Ok(ClientFrame::Ping) => Some(ServerFrame::Pong),
                            Err(e) => Some(ServerFrame::error("bad_frame", e.to_string())),
                        };
                        if let Some(frame) = reply {
                            if let Ok(json) = serde_json::to_string(&frame) {
                                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Message::Ping(data) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    debug!(job_id = %job_id, "Observer detached");
}

fn close(reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: reason.into(),
    }))
}
