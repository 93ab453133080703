// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::{json, Value};
use thiserror::Error;

/// Adapter failure taxonomy.
///
/// Each variant maps to a stable machine-readable code — the same string the
/// Hub sees as `execution_error.reason` — plus a structured `details` object.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("model_id is required for model invocation")]
    ModelIdRequired,

    #[error("base_url is required for model invocation")]
    BaseUrlRequired,

    #[error("api_key is required for vendor={vendor}")]
    ApiKeyMissing { vendor: String },

    #[error("model request failed with status={status_code}")]
    Http { status_code: u16, body: String },

    #[error("model request failed: {0}")]
    Network(String),

    #[error("{0}")]
    InvalidResponse(String),

    #[error("{0}")]
    EmptyResponse(String),

    #[error("tls ca file is invalid: {ca_file}")]
    TlsConfig { ca_file: String, reason: String },
}

impl AdapterError {
    /// Stable error code surfaced to the Hub.
    pub fn code(&self) -> &'static str {
        match self {
            AdapterError::ModelIdRequired => "MODEL_ID_REQUIRED",
            AdapterError::BaseUrlRequired => "MODEL_BASE_URL_REQUIRED",
            AdapterError::ApiKeyMissing { .. } => "MODEL_API_KEY_MISSING",
            AdapterError::Http { .. } => "MODEL_HTTP_ERROR",
            AdapterError::Network(_) => "MODEL_NETWORK_ERROR",
            AdapterError::InvalidResponse(_) => "MODEL_INVALID_RESPONSE",
            AdapterError::EmptyResponse(_) => "MODEL_EMPTY_RESPONSE",
            AdapterError::TlsConfig { .. } => "MODEL_TLS_CONFIG_INVALID",
        }
    }

    /// Structured details for the `execution_error` payload.
    pub fn details(&self) -> Value {
        match self {
            AdapterError::ApiKeyMissing { vendor } => json!({ "vendor": vendor }),
            AdapterError::Http { status_code, body } => {
                json!({ "status_code": status_code, "body": body })
            }
            AdapterError::TlsConfig { ca_file, reason } => {
                json!({ "ca_file": ca_file, "error": reason })
            }
            _ => json!({}),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
