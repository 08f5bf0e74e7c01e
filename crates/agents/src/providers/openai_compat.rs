//! Shared helpers for OpenAI-compatible chat APIs with tools.
//!
//! Request encoding (messages, tool schemas), response decoding (tool calls,
//! usage), and base-URL handling. Used by the chat provider in this crate and
//! by the embeddings client in `grimoire-memory`.

use crate::model::{ChatMessage, ToolCall, Usage};

/// Convert `{name, description, parameters}` tool schemas to the OpenAI
/// function-calling format. Schemas are passed through unmodified.
pub fn to_openai_tools(tools: &[serde_json::Value]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": t["name"],
                    "description": t["description"],
                    "parameters": t["parameters"],
                },
            })
        })
        .collect()
}

/// Encode conversation messages for `/chat/completions`.
///
/// Tool-call arguments are re-serialized to the JSON string the API expects.
pub fn to_openai_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| match m {
            ChatMessage::System { content } => {
                serde_json::json!({"role": "system", "content": content})
            },
            ChatMessage::User { content } => {
                serde_json::json!({"role": "user", "content": content})
            },
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                let mut msg = serde_json::json!({"role": "assistant", "content": content});
                if !tool_calls.is_empty() {
                    msg["tool_calls"] = tool_calls
                        .iter()
                        .map(|tc| {
                            serde_json::json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                }
                msg
            },
            ChatMessage::Tool {
                tool_call_id,
                content,
            } => serde_json::json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": content,
            }),
        })
        .collect()
}

/// Decode the `tool_calls` of a response message. Calls without an id or a
/// name are skipped; unparsable arguments become `{}`.
pub fn parse_tool_calls(message: &serde_json::Value) -> Vec<ToolCall> {
    message["tool_calls"]
        .as_array()
        .map(|tcs| {
            tcs.iter()
                .filter_map(|tc| {
                    let id = tc["id"].as_str()?.to_string();
                    let name = tc["function"]["name"].as_str()?.to_string();
                    let args_str = tc["function"]["arguments"].as_str().unwrap_or("{}");
                    let arguments = serde_json::from_str(args_str).unwrap_or(serde_json::json!({}));
                    Some(ToolCall {
                        id,
                        name,
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Read the `usage` block of a completion response; zeros when absent.
pub fn parse_usage(response: &serde_json::Value) -> Usage {
    let Some(u) = response.get("usage").filter(|u| !u.is_null()) else {
        return Usage::default();
    };
    Usage {
        input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        output_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
    }
}

pub fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn has_version_suffix(base_url: &str) -> bool {
    let Some(last_segment) = base_url.rsplit('/').next() else {
        return false;
    };
    let Some(rest) = last_segment.strip_prefix('v') else {
        return false;
    };
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
}

/// Build the URL for `path` (e.g. `"chat/completions"`, `"embeddings"`).
///
/// A base that already ends in `path` is kept, a versioned base (`.../v1`,
/// `.../v4`) gets `path` appended, anything else gets `/v1/<path>`.
pub fn endpoint_url(base_url: &str, path: &str) -> String {
    let normalized = normalize_base_url(base_url);
    if normalized.ends_with(&format!("/{path}")) {
        return normalized;
    }
    if has_version_suffix(&normalized) {
        return format!("{normalized}/{path}");
    }
    format!("{normalized}/v1/{path}")
}
