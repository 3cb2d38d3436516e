use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use verdict_core::config::ModelConfig;
use verdict_core::error::{Result, VerdictError};
use verdict_core::traits::ModelInvoker;
use verdict_core::types::{AgentDecision, DecisionRequest};

use crate::prompt::{parse_decision, system_prompt};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// OpenAI-compatible invoker. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
///
/// Each decision is one non-streaming chat completion requested in JSON
/// mode; the message content is parsed as an [`AgentDecision`].
pub struct OpenAiInvoker {
    http: Client,
}

impl OpenAiInvoker {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }
}

impl Default for OpenAiInvoker {
    fn default() -> Self {
        Self::new()
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Resolve the chat completions URL from a configured base URL.
pub(crate) fn completions_url(base_url: Option<&str>) -> String {
    let base = base_url.unwrap_or(OPENAI_API_BASE).trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/chat/completions", base)
    }
}

fn build_request(config: &ModelConfig, request: &DecisionRequest) -> ChatRequest {
    // o-series models reject a temperature parameter
    let is_o_series = config.model_id.starts_with("o1")
        || config.model_id.starts_with("o3")
        || config.model_id.starts_with("o4");

    ChatRequest {
        model: config.model_id.clone(),
        messages: vec![
            OaiMessage {
                role: "system",
                content: system_prompt(request),
            },
            OaiMessage {
                role: "user",
                content: request.context.clone(),
            },
        ],
        max_tokens: config.max_tokens,
        temperature: if is_o_series { None } else { Some(config.temperature) },
        response_format: ResponseFormat {
            r#type: "json_object",
        },
    }
}

impl ModelInvoker for OpenAiInvoker {
    fn decide(
        &self,
        config: &ModelConfig,
        request: DecisionRequest,
    ) -> BoxFuture<'_, Result<AgentDecision>> {
        let config = config.clone();

        Box::pin(async move {
            let url = completions_url(config.base_url.as_deref());
            let body = build_request(&config, &request);

            let mut req = self.http.post(&url).json(&body);
            if let Some(api_key) = &config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            debug!(
                job_id = %request.job_id,
                agent_id = %request.agent_id,
                model = %config.model_id,
                "Requesting decision"
            );

            let response = req
                .send()
                .await
                .map_err(|e| VerdictError::ModelInvocation(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(VerdictError::ModelInvocation(format!(
                    "HTTP {}: {}",
                    status, body
                )));
            }

            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| VerdictError::ModelInvocation(format!("invalid response: {}", e)))?;

            let content = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| VerdictError::MalformedDecision("empty completion".to_string()))?;

            parse_decision(&content)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdict_core::types::JobId;

    fn request() -> DecisionRequest {
        DecisionRequest {
            job_id: JobId::from_string("job-1"),
            agent_id: "summarizer".into(),
            instructions: "Summarize.".into(),
            context: "## Ticket\n\nfindings".into(),
            tools: vec![],
            delegates: vec![],
        }
    }

    #[test]
    fn test_completions_url() {
        assert_eq!(
            completions_url(None),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            completions_url(Some("http://localhost:11434/v1/")),
            "http://localhost:11434/v1/chat/completions"
        );
        assert_eq!(
            completions_url(Some("http://proxy.test/v1/chat/completions")),
            "http://proxy.test/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_body_uses_json_mode() {
        let config = ModelConfig::new("gpt-4o-mini");
        let body = serde_json::to_value(build_request(&config, &request())).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "## Ticket\n\nfindings");
        assert_eq!(body["temperature"], 0.0);
    }

    #[test]
    fn test_o_series_omits_temperature() {
        let config = ModelConfig::new("o3-mini");
        let body = serde_json::to_value(build_request(&config, &request())).unwrap();
        assert!(body.get("temperature").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_invocation_failure() {
        let mut config = ModelConfig::new("gpt-4o-mini");
        config.base_url = Some("http://127.0.0.1:1/v1".into());
        let err = OpenAiInvoker::new()
            .decide(&config, request())
            .await
            .unwrap_err();
        assert!(matches!(err, VerdictError::ModelInvocation(_)));
    }
}
