use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use verdict_agent::{DelegationRouter, JobManager};
use verdict_core::types::AgentDecision;
use verdict_gateway::GatewayServer;
use verdict_test_utils::{sample_config, MockTransport, ScriptedModel, ToolScript};

struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start(model: ScriptedModel, transport: MockTransport) -> TestServer {
    let config = Arc::new(sample_config());
    let router =
        DelegationRouter::from_config(config.clone(), Arc::new(transport), Arc::new(model)).unwrap();
    let jobs = Arc::new(JobManager::new(Arc::new(router), config.jobs.clone()));
    let server = GatewayServer::new(config.gateway.clone(), jobs);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move { server.serve(listener, token).await });

    TestServer { addr, shutdown }
}

fn scenario_model() -> ScriptedModel {
    let model = ScriptedModel::new();
    model
        .on("router", AgentDecision::delegate("analyst", "Check the repository"))
        .on("router", AgentDecision::final_result(serde_json::json!({"verdict": "feasible"})));
    model
        .on("analyst", AgentDecision::tool_call("repo_analyzer", serde_json::json!({"repo": "web"})))
        .on("analyst", AgentDecision::final_result(serde_json::json!("auth module exists")));
    model
}

async fn submit(addr: SocketAddr) -> String {
    let resp = reqwest::Client::new()
        .post(format!("http://{}/tickets", addr))
        .json(&serde_json::json!({
            "title": "Add password reset",
            "description": "Users need a way to reset a forgotten password.",
            "acceptance_criteria": "A reset link is emailed.",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

/// Read text frames until the server closes the stream.
async fn read_events<S>(ws: &mut S) -> Vec<serde_json::Value>
where
    S: futures::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut events = Vec::new();
    while let Some(msg) = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("event within timeout")
    {
        match msg.unwrap() {
            Message::Text(text) => events.push(serde_json::from_str(text.as_str()).unwrap()),
            Message::Close(_) => break,
            _ => {}
        }
    }
    events
}

fn types(events: &[serde_json::Value]) -> Vec<&str> {
    events.iter().map(|e| e["type"].as_str().unwrap()).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stream_replays_and_closes() {
    let transport = MockTransport::new();
    transport.script("repo_analyzer", ToolScript::ok(serde_json::json!({"modules": ["auth"]})));
    let server = start(scenario_model(), transport).await;
    let id = submit(server.addr).await;

    let url = format!("ws://{}/ws/ticket/{}/eval", server.addr, id);
    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let events = read_events(&mut ws).await;

    assert_eq!(
        types(&events),
        vec!["started", "delegated", "tool_invoked", "tool_result", "completed"]
    );
    let seqs: Vec<u64> = events.iter().map(|e| e["sequence"].as_u64().unwrap()).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    assert!(events.iter().all(|e| e["jobId"] == id.as_str()));
    assert_eq!(events[4]["progressPercent"], 100);

    // Reconnecting replays the whole log; `from` replays a suffix.
    let (mut again, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    assert_eq!(read_events(&mut again).await, events);

    let suffix_url = format!("{}?from=4", url);
    let (mut suffix, _) = tokio_tungstenite::connect_async(suffix_url.as_str()).await.unwrap();
    let tail = read_events(&mut suffix).await;
    assert_eq!(types(&tail), vec!["tool_result", "completed"]);

    // Past the end of a finished job: closed straight away, nothing sent.
    let past_url = format!("{}?from=99", url);
    let (mut past, _) = tokio_tungstenite::connect_async(past_url.as_str()).await.unwrap();
    assert!(read_events(&mut past).await.is_empty());

    let status: serde_json::Value = reqwest::get(format!("http://{}/api/jobs/{}", server.addr, id))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["phase"], "completed");
    assert_eq!(status["result"]["verdict"], "feasible");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_job_is_not_upgraded() {
    let server = start(ScriptedModel::new(), MockTransport::new()).await;
    let url = format!("ws://{}/ws/ticket/00000000-0000-0000-0000-000000000000/eval", server.addr);
    match tokio_tungstenite::connect_async(url.as_str()).await {
        Err(tungstenite::Error::Http(resp)) => assert_eq!(resp.status().as_u16(), 404),
        other => panic!("expected 404, got {:?}", other.map(|(_, r)| r.status())),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_over_websocket() {
    let transport = MockTransport::new();
    transport.script(
        "repo_analyzer",
        ToolScript::ok(serde_json::json!({})).with_delay(Duration::from_secs(30)),
    );
    let server = start(scenario_model(), transport).await;
    let id = submit(server.addr).await;

    let url = format!("ws://{}/ws/ticket/{}/eval", server.addr, id);
    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    ws.send(Message::Text(r#"{"type":"ping"}"#.into())).await.unwrap();

    let mut seen = Vec::new();
    let mut cancelled = false;
    while let Some(msg) = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("frame within timeout")
    {
        let text = match msg.unwrap() {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };
        let frame: serde_json::Value = serde_json::from_str(&text).unwrap();
        if frame["type"] == "tool_invoked" && !cancelled {
            ws.send(Message::Text(r#"{"type":"cancel"}"#.into())).await.unwrap();
            cancelled = true;
        }
        seen.push(frame);
    }

    assert!(seen.iter().any(|f| f["type"] == "pong"));
    let last = seen.last().unwrap();
    assert_eq!(last["type"], "failed");
    assert_eq!(last["payload"]["cause"], "cancelled");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blank_ticket_rejected_over_http() {
    let server = start(ScriptedModel::new(), MockTransport::new()).await;
    let resp = reqwest::Client::new()
        .post(format!("http://{}/tickets", server.addr))
        .json(&serde_json::json!({
            "title": "Title",
            "description": "   ",
            "acceptance_criteria": "criteria",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_payload");

    let jobs: serde_json::Value = reqwest::get(format!("http://{}/api/jobs", server.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(jobs["jobs"].as_array().unwrap().len(), 0);
}
