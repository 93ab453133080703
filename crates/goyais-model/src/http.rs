// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! One-shot JSON POST shared by both transports.

use std::time::Duration;

use serde_json::Value;

use crate::error::AdapterError;
use crate::tls::build_http_client;

const ERROR_BODY_LIMIT: usize = 500;

/// POST `payload` to `url` and parse the response as a JSON object.
///
/// TLS is resolved (and may fail) before anything is sent. HTTP ≥ 400 maps
/// to `MODEL_HTTP_ERROR` with a truncated body; transport failures map to
/// `MODEL_NETWORK_ERROR`; non-object bodies map to `MODEL_INVALID_RESPONSE`.
pub(crate) async fn post_json(
    url: &str,
    payload: &Value,
    bearer_token: Option<&str>,
    timeout: Duration,
) -> Result<Value, AdapterError> {
    let client = build_http_client(url, timeout)?;

    let mut request = client.post(url).json(payload);
    if let Some(token) = bearer_token.filter(|t| !t.is_empty()) {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| AdapterError::Network(format!("model request failed: {e}")))?;

    let status = response.status();
    let raw = response
        .bytes()
        .await
        .map_err(|e| AdapterError::Network(format!("model request failed: {e}")))?;

    if status.as_u16() >= 400 {
        return Err(AdapterError::Http {
            status_code: status.as_u16(),
            body: decode_error_body(&raw),
        });
    }

    let parsed: Value = serde_json::from_slice(&raw)
        .map_err(|_| AdapterError::InvalidResponse("model response is not valid JSON".into()))?;
    if !parsed.is_object() {
        return Err(AdapterError::InvalidResponse(
            "model response must be a JSON object".into(),
        ));
    }
    Ok(parsed)
}

fn decode_error_body(raw: &[u8]) -> String {
    if let Ok(parsed) = serde_json::from_slice::<Value>(raw) {
        if parsed.is_object() {
            let compact = parsed.to_string();
            return compact.chars().take(ERROR_BODY_LIMIT).collect();
        }
    }
    String::from_utf8_lossy(raw)
        .chars()
        .take(ERROR_BODY_LIMIT)
        .collect::<String>()
        .trim()
        .to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
