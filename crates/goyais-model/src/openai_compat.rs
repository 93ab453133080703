// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI-compatible `/chat/completions` transport.
//!
//! All vendors except Google speak this wire format (OpenAI, Qwen, Doubao,
//! Zhipu, MiniMax, and local llama.cpp/Ollama servers). One request, one
//! parsed choice — the worker does not stream.

use serde_json::{json, Map, Value};

use crate::error::AdapterError;
use crate::http::post_json;
use crate::invocation::ModelInvocation;
use crate::types::{ModelTurnResult, TokenUsage, ToolCall, ToolSpec, TurnMessage};

/// Vendor parameters forwarded verbatim when present in the snapshot.
const SUPPORTED_PARAM_KEYS: &[&str] = &[
    "temperature",
    "top_p",
    "max_tokens",
    "presence_penalty",
    "frequency_penalty",
];

pub async fn run_openai_compatible_turn(
    invocation: &ModelInvocation,
    messages: &[TurnMessage],
    tools: &[ToolSpec],
) -> Result<ModelTurnResult, AdapterError> {
    let url = format!("{}/chat/completions", invocation.base_url);

    let mut payload = Map::new();
    payload.insert("model".into(), json!(invocation.model_id));
    payload.insert("messages".into(), Value::Array(to_openai_messages(messages)));
    if !tools.is_empty() {
        payload.insert("tools".into(), Value::Array(to_openai_tools(tools)));
    }
    for key in SUPPORTED_PARAM_KEYS {
        if let Some(value) = invocation.params.get(*key) {
            payload.insert((*key).into(), value.clone());
        }
    }

    let response = post_json(
        &url,
        &Value::Object(payload),
        Some(invocation.api_key.as_str()),
        invocation.timeout,
    )
    .await?;

    parse_openai_response(response)
}

fn parse_openai_response(response: Value) -> Result<ModelTurnResult, AdapterError> {
    let choices = response
        .get("choices")
        .and_then(Value::as_array)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            AdapterError::EmptyResponse("OpenAI-compatible response has no choices".into())
        })?;

    let first_choice = choices[0].as_object().ok_or_else(|| {
        AdapterError::InvalidResponse("OpenAI-compatible choice must be an object".into())
    })?;

    let message = first_choice
        .get("message")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let text = extract_text(message.get("content"));
    let tool_calls = extract_tool_calls(message.get("tool_calls"));
    let usage = extract_usage(response.get("usage"));

    Ok(ModelTurnResult {
        text,
        tool_calls,
        usage,
        raw_response: response,
    })
}

/// Map the in-memory conversation to the OpenAI wire shape.
///
/// Assistant tool-call arguments must be serialized JSON *strings*; tool
/// messages carry the originating `tool_call_id`.
fn to_openai_messages(messages: &[TurnMessage]) -> Vec<Value> {
    messages
        .iter()
        .filter_map(|message| match message {
            TurnMessage::System { content } => {
                Some(json!({"role": "system", "content": content}))
            }
            TurnMessage::User { content } => Some(json!({"role": "user", "content": content})),
            TurnMessage::Assistant {
                content,
                tool_calls,
            } => {
                let mut entry = Map::new();
                entry.insert("role".into(), json!("assistant"));
                if !content.trim().is_empty() {
                    entry.insert("content".into(), json!(content.trim()));
                }
                if !tool_calls.is_empty() {
                    let calls: Vec<Value> = tool_calls
                        .iter()
                        .filter(|tc| !tc.name.trim().is_empty())
                        .map(|tc| {
                            let id = if tc.id.trim().is_empty() {
                                "call_auto"
                            } else {
                                tc.id.trim()
                            };
                            let arguments = if tc.arguments.is_object() {
                                tc.arguments.to_string()
                            } else {
                                "{}".to_string()
                            };
                            json!({
                                "id": id,
                                "type": "function",
                                "function": {"name": tc.name, "arguments": arguments},
                            })
                        })
                        .collect();
                    entry.insert("tool_calls".into(), Value::Array(calls));
                }
                Some(Value::Object(entry))
            }
            TurnMessage::Tool {
                tool_call_id,
                name,
                content,
            } => Some(json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "name": name,
                "content": content,
            })),
        })
        .collect()
}

fn to_openai_tools(tools: &[ToolSpec]) -> Vec<Value> {
    tools
        .iter()
        .filter(|t| !t.name.trim().is_empty())
        .map(|t| {
            let parameters = if t.input_schema.is_object() {
                t.input_schema.clone()
            } else {
                json!({"type": "object", "properties": {}})
            };
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": parameters,
                },
            })
        })
        .collect()
}

/// Message content is either a plain string or a list of typed parts.
fn extract_text(raw_content: Option<&Value>) -> String {
    match raw_content {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
        _ => String::new(),
    }
}

fn extract_tool_calls(raw_tool_calls: Option<&Value>) -> Vec<ToolCall> {
    let Some(items) = raw_tool_calls.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            let function = item.get("function")?.as_object()?;
            let name = function.get("name")?.as_str()?.trim();
            if name.is_empty() {
                return None;
            }
            let id = item
                .get("id")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("openai_call_{}", idx + 1));
            Some(ToolCall {
                id,
                name: name.to_string(),
                arguments: parse_json_arguments(function.get("arguments")),
            })
        })
        .collect()
}

/// The wire carries arguments as a JSON-encoded string; tolerate an already
/// parsed object and substitute `{}` for anything unparseable.
fn parse_json_arguments(raw: Option<&Value>) -> Value {
    match raw {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(parsed) if parsed.is_object() => parsed,
            _ => json!({}),
        },
        _ => json!({}),
    }
}

fn extract_usage(raw_usage: Option<&Value>) -> TokenUsage {
    let usage = raw_usage.and_then(Value::as_object);
    let get = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    TokenUsage::new(
        get("prompt_tokens"),
        get("completion_tokens"),
        get("total_tokens"),
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
