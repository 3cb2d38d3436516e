use verdict_core::error::{Result, VerdictError};
use verdict_core::types::{AgentDecision, DecisionRequest};

/// Build the system prompt for one decision step.
///
/// The agent's own instructions come first, followed by the actions it is
/// allowed to take this step and the exact output shape.
pub fn system_prompt(request: &DecisionRequest) -> String {
    let mut prompt = String::new();

    if !request.instructions.trim().is_empty() {
        prompt.push_str(request.instructions.trim());
        prompt.push_str("\n\n");
    }

    prompt.push_str("You are one agent in a ticket evaluation team. ");
    prompt.push_str("At each step choose exactly one action.\n\n");

    if !request.tools.is_empty() {
        prompt.push_str("## Tools you may call\n\n");
        for tool in &request.tools {
            prompt.push_str(&format!(
                "- `{}` ({}): input schema {}\n",
                tool.id, tool.name, tool.input_schema
            ));
        }
        prompt.push('\n');
    }

    if !request.delegates.is_empty() {
        prompt.push_str("## Agents you may delegate to\n\n");
        for d in &request.delegates {
            if d.description.is_empty() {
                prompt.push_str(&format!("- `{}` ({})\n", d.id, d.name));
            } else {
                prompt.push_str(&format!("- `{}` ({}): {}\n", d.id, d.name, d.description));
            }
        }
        prompt.push('\n');
    }

    prompt.push_str("## Response format\n\nRespond with a single JSON object and nothing else:\n");
    if !request.tools.is_empty() {
        prompt.push_str("- {\"action\": \"tool_call\", \"tool\": \"<tool id>\", \"input\": { ... }}\n");
    }
    if !request.delegates.is_empty() {
        prompt.push_str("- {\"action\": \"delegate\", \"agent\": \"<agent id>\", \"task\": \"<sub-task>\"}\n");
    }
    prompt.push_str("- {\"action\": \"final_result\", \"result\": <your findings as JSON>}\n");
    prompt
}

/// Parse a model response into a decision.
///
/// Accepts a bare JSON object or one wrapped in a ```json fence. Anything
/// else is a malformed decision.
pub fn parse_decision(content: &str) -> Result<AgentDecision> {
    let body = strip_fence(content.trim());
    serde_json::from_str(body).map_err(|e| {
        VerdictError::MalformedDecision(format!("{}: {}", e, truncate(content, 200)))
    })
}

fn strip_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Skip the info string (e.g. "json") up to the first newline.
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
