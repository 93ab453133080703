// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

use goyais_core::OutboundEvent;

pub const INTERNAL_TOKEN_HEADER: &str = "X-Internal-Token";
pub const TRACE_HEADER: &str = "X-Trace-Id";

/// The shared development token, accepted only when the operator explicitly
/// opts into insecure mode.
pub const DEFAULT_INTERNAL_TOKEN: &str = "goyais-internal-token";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Error)]
pub enum HubError {
    #[error("HUB_INTERNAL_TOKEN is required")]
    TokenMissing,

    #[error("hub http error status={status_code} body={body}")]
    Status { status_code: u16, body: String },

    #[error("hub network error: {0}")]
    Network(String),

    #[error("hub response must be a JSON object")]
    InvalidResponse,
}

impl HubError {
    /// True when the Hub reports that the execution no longer exists —
    /// the control channel treats this as an implicit stop.
    pub fn is_execution_not_found(&self) -> bool {
        matches!(
            self,
            HubError::Status {
                status_code: 404,
                body,
            } if body.contains("EXECUTION_NOT_FOUND")
        )
    }
}

/// Typed client for the Hub's internal worker surface.
///
/// One shared connection pool for the whole process; the internal token and
/// a trace id ride along on every request.
#[derive(Debug, Clone)]
pub struct HubClient {
    base_url: String,
    internal_token: String,
    http: reqwest::Client,
}

impl HubClient {
    /// Build the client from `HUB_BASE_URL` / `HUB_INTERNAL_TOKEN`.
    ///
    /// The token is mandatory; `GOYAIS_ALLOW_INSECURE_INTERNAL_TOKEN` opts
    /// into the well-known development token instead.
    pub fn from_env() -> Result<Self, HubError> {
        let base_url = std::env::var("HUB_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8787".to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        let internal_token = resolve_hub_internal_token().ok_or(HubError::TokenMissing)?;
        Ok(Self::new(base_url, internal_token))
    }

    pub fn new(base_url: impl Into<String>, internal_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            internal_token: internal_token.into(),
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn register_worker(
        &self,
        worker_id: &str,
        capabilities: Value,
    ) -> Result<Value, HubError> {
        self.post(
            "/internal/workers/register",
            &json!({"worker_id": worker_id, "capabilities": capabilities}),
            None,
        )
        .await
    }

    pub async fn heartbeat(&self, worker_id: &str, status: &str) -> Result<Value, HubError> {
        self.post(
            &format!("/internal/workers/{worker_id}/heartbeat"),
            &json!({"status": status}),
            None,
        )
        .await
    }

    pub async fn claim_execution(
        &self,
        worker_id: &str,
        lease_seconds: u64,
    ) -> Result<Value, HubError> {
        self.post(
            "/internal/executions/claim",
            &json!({"worker_id": worker_id, "lease_seconds": lease_seconds}),
            None,
        )
        .await
    }

    pub async fn send_events_batch(
        &self,
        execution_id: &str,
        trace_id: &str,
        events: &[OutboundEvent],
    ) -> Result<Value, HubError> {
        self.post(
            &format!("/internal/executions/{execution_id}/events/batch"),
            &json!({"events": events}),
            Some(trace_id),
        )
        .await
    }

    pub async fn poll_control(
        &self,
        execution_id: &str,
        trace_id: &str,
        after_seq: u64,
        wait_ms: u64,
    ) -> Result<Value, HubError> {
        let path = format!(
            "/internal/executions/{execution_id}/control?after_seq={after_seq}&wait_ms={wait_ms}"
        );
        let request = self
            .http
            .get(format!("{}{path}", self.base_url))
            .header(INTERNAL_TOKEN_HEADER, self.internal_token.as_str())
            .header(TRACE_HEADER, trace_id);
        Self::execute(request).await
    }

    async fn post(
        &self,
        path: &str,
        payload: &Value,
        trace_id: Option<&str>,
    ) -> Result<Value, HubError> {
        let trace = trace_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("tr_worker_{}", chrono::Utc::now().timestamp_millis()));
        let request = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header(INTERNAL_TOKEN_HEADER, self.internal_token.as_str())
            .header(TRACE_HEADER, trace)
            .json(payload);
        Self::execute(request).await
    }

    async fn execute(request: reqwest::RequestBuilder) -> Result<Value, HubError> {
        let response = request
            .send()
            .await
            .map_err(|e| HubError::Network(e.to_string()))?;
        let status = response.status();
        let raw = response
            .bytes()
            .await
            .map_err(|e| HubError::Network(e.to_string()))?;

        if status.as_u16() >= 400 {
            let body: String = String::from_utf8_lossy(&raw).chars().take(300).collect();
            return Err(HubError::Status {
                status_code: status.as_u16(),
                body,
            });
        }
        if raw.is_empty() {
            return Ok(json!({}));
        }
        let parsed: Value =
            serde_json::from_slice(&raw).map_err(|_| HubError::InvalidResponse)?;
        if !parsed.is_object() {
            return Err(HubError::InvalidResponse);
        }
        Ok(parsed)
    }
}

/// `HUB_INTERNAL_TOKEN`, or the development default when the allow-insecure
/// flag is set. `None` means the worker cannot talk to the Hub.
pub fn resolve_hub_internal_token() -> Option<String> {
    let token = std::env::var("HUB_INTERNAL_TOKEN").unwrap_or_default();
    let token = token.trim();
    if !token.is_empty() {
        return Some(token.to_string());
    }
    if allow_insecure_internal_token() {
        return Some(DEFAULT_INTERNAL_TOKEN.to_string());
    }
    None
}

pub fn allow_insecure_internal_token() -> bool {
    std::env::var("GOYAIS_ALLOW_INSECURE_INTERNAL_TOKEN")
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
