// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Gemini `generateContent` transport.
//!
//! Gemini has no system role and no tool role: system messages are flattened
//! into `system_instruction`, assistant tool calls become `functionCall`
//! parts on a `model` entry, and tool results travel back as
//! `functionResponse` parts on a `user` entry.

use serde_json::{json, Map, Value};

use crate::error::AdapterError;
use crate::http::post_json;
use crate::invocation::ModelInvocation;
use crate::types::{ModelTurnResult, TokenUsage, ToolCall, ToolSpec, TurnMessage};

pub async fn run_google_turn(
    invocation: &ModelInvocation,
    messages: &[TurnMessage],
    tools: &[ToolSpec],
) -> Result<ModelTurnResult, AdapterError> {
    let url = build_generate_url(
        &invocation.base_url,
        &invocation.model_id,
        &invocation.api_key,
    );
    let payload = to_google_payload(messages, tools, &invocation.params);
    // Gemini authenticates via the key query parameter, not a bearer header.
    let response = post_json(&url, &payload, None, invocation.timeout).await?;
    parse_google_response(response)
}

pub fn build_generate_url(base_url: &str, model_id: &str, api_key: &str) -> String {
    let endpoint = format!(
        "{}/models/{}:generateContent",
        base_url.trim_end_matches('/'),
        model_id
    );
    if api_key.is_empty() {
        return endpoint;
    }
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{separator}key={}", urlencode(api_key))
}

pub fn to_google_payload(
    messages: &[TurnMessage],
    tools: &[ToolSpec],
    params: &Map<String, Value>,
) -> Value {
    let mut payload = Map::new();
    payload.insert("contents".into(), Value::Array(to_google_contents(messages)));

    let system_instruction = collect_system_instruction(messages);
    if !system_instruction.is_empty() {
        payload.insert(
            "system_instruction".into(),
            json!({"parts": [{"text": system_instruction}]}),
        );
    }
    if !tools.is_empty() {
        payload.insert(
            "tools".into(),
            json!([{"functionDeclarations": to_function_declarations(tools)}]),
        );
    }

    let mut generation_config = Map::new();
    for key in ["temperature", "top_p", "max_output_tokens"] {
        if let Some(value) = params.get(key) {
            generation_config.insert(key.into(), value.clone());
        }
    }
    if !generation_config.is_empty() {
        payload.insert("generationConfig".into(), Value::Object(generation_config));
    }

    Value::Object(payload)
}

fn to_google_contents(messages: &[TurnMessage]) -> Vec<Value> {
    let mut contents = Vec::new();
    for message in messages {
        match message {
            // Flattened into system_instruction.
            TurnMessage::System { .. } => {}
            TurnMessage::User { content } => {
                let text = content.trim();
                if !text.is_empty() {
                    contents.push(json!({"role": "user", "parts": [{"text": text}]}));
                }
            }
            TurnMessage::Assistant {
                content,
                tool_calls,
            } => {
                let mut parts = Vec::new();
                let text = content.trim();
                if !text.is_empty() {
                    parts.push(json!({"text": text}));
                }
                for call in tool_calls {
                    let name = call.name.trim();
                    if name.is_empty() {
                        continue;
                    }
                    let args = if call.arguments.is_object() {
                        call.arguments.clone()
                    } else {
                        json!({})
                    };
                    parts.push(json!({"functionCall": {"name": name, "args": args}}));
                }
                if !parts.is_empty() {
                    contents.push(json!({"role": "model", "parts": parts}));
                }
            }
            TurnMessage::Tool { name, content, .. } => {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                contents.push(json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": name,
                            "response": {"content": content},
                        }
                    }],
                }));
            }
        }
    }
    contents
}

fn to_function_declarations(tools: &[ToolSpec]) -> Vec<Value> {
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
                "name": t.name,
                "description": t.description,
                "parameters": parameters,
            })
        })
        .collect()
}

fn collect_system_instruction(messages: &[TurnMessage]) -> String {
    messages
        .iter()
        .filter_map(|m| match m {
            TurnMessage::System { content } => Some(content.trim()),
            _ => None,
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_google_response(response: Value) -> Result<ModelTurnResult, AdapterError> {
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AdapterError::EmptyResponse("Google response has no candidates".into()))?;

    let first_candidate = candidates[0]
        .as_object()
        .ok_or_else(|| AdapterError::InvalidResponse("Google candidate must be an object".into()))?;

    let parts = first_candidate
        .get("content")
        .and_then(Value::as_object)
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .ok_or_else(|| {
            AdapterError::InvalidResponse("Google candidate content.parts must be a list".into())
        })?;

    let mut text_fragments = Vec::new();
    let mut tool_calls = Vec::new();
    for (idx, part) in parts.iter().enumerate() {
        let Some(part) = part.as_object() else {
            continue;
        };
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            let text = text.trim();
            if !text.is_empty() {
                text_fragments.push(text.to_string());
            }
        }
        let function_call = part
            .get("functionCall")
            .or_else(|| part.get("function_call"))
            .and_then(Value::as_object);
        if let Some(call) = function_call {
            let name = call
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or("");
            if name.is_empty() {
                continue;
            }
            let arguments = call
                .get("args")
                .filter(|a| a.is_object())
                .cloned()
                .unwrap_or_else(|| json!({}));
            tool_calls.push(ToolCall {
                id: format!("google_call_{}", idx + 1),
                name: name.to_string(),
                arguments,
            });
        }
    }

    let usage = extract_usage(response.get("usageMetadata"));
    Ok(ModelTurnResult {
        text: text_fragments.join("\n").trim().to_string(),
        tool_calls,
        usage,
        raw_response: response,
    })
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
        get("promptTokenCount"),
        get("candidatesTokenCount"),
        get("totalTokenCount"),
    )
}

/// Percent-encode the API key for the query string.
fn urlencode(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
