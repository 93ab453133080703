// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The worker's own HTTP surface.
//!
//! Routes:
//! - `GET /health` — liveness + version, unauthenticated.
//! - `POST /internal/executions/:id/commit` — stage-and-commit the
//!   execution's worktree lane, returns the commit SHA.
//! - `POST /internal/executions/:id/discard` — drop the lane and its branch.
//! - `POST /internal/executions`, `POST /internal/events` — declared stubs,
//!   answered with 501 until the Hub stops calling them.
//!
//! Internal routes require the internal token (header `X-Internal-Token` or
//! a bearer token). When `WORKER_INTERNAL_TOKEN` is not configured the
//! routes answer 503 `AUTH_INTERNAL_TOKEN_NOT_CONFIGURED` — unless the
//! operator opted into the insecure development token. Every response echoes
//! the request's `X-Trace-Id` (minting one when absent).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use goyais_hub::client::{
    allow_insecure_internal_token, DEFAULT_INTERNAL_TOKEN, INTERNAL_TOKEN_HEADER, TRACE_HEADER,
};
use goyais_worktree::{WorktreeError, WorktreeManager};

/// Shared state behind the router.
pub struct NodeState {
    pub version: String,
    /// Token expected on internal routes; `None` = not configured (503).
    pub internal_token: Option<String>,
    pub worktree: Arc<WorktreeManager>,
}

impl NodeState {
    pub fn from_env() -> Self {
        Self {
            version: crate::version::runtime_version(),
            internal_token: resolve_worker_internal_token(),
            worktree: Arc::new(WorktreeManager::new()),
        }
    }
}

/// `WORKER_INTERNAL_TOKEN`, or the development default under the
/// allow-insecure flag; `None` when the surface must refuse with 503.
pub fn resolve_worker_internal_token() -> Option<String> {
    let token = std::env::var("WORKER_INTERNAL_TOKEN").unwrap_or_default();
    let token = token.trim();
    if !token.is_empty() {
        return Some(token.to_string());
    }
    if allow_insecure_internal_token() {
        return Some(DEFAULT_INTERNAL_TOKEN.to_string());
    }
    None
}

#[derive(Debug, Clone)]
struct TraceId(String);

pub fn router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/internal/executions/:id/commit", post(commit_worktree))
        .route("/internal/executions/:id/discard", post(discard_worktree))
        .route("/internal/executions", post(not_implemented))
        .route("/internal/events", post(not_implemented))
        .layer(middleware::from_fn(trace_middleware))
        .with_state(state)
}

/// Accept the caller's `X-Trace-Id` (or mint one), expose it to handlers,
/// and echo it on the response.
async fn trace_middleware(mut request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(TRACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("tr_{}", Uuid::new_v4().simple()));
    info!(trace_id, method = %request.method(), path = %request.uri().path(), "request");

    request.extensions_mut().insert(TraceId(trace_id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_HEADER, value);
    }
    response
}

async fn health(State(state): State<Arc<NodeState>>) -> Json<Value> {
    Json(json!({"ok": true, "version": state.version}))
}

async fn not_implemented(
    Extension(TraceId(trace_id)): Extension<TraceId>,
    request: Request,
) -> Response {
    standard_error_response(
        StatusCode::NOT_IMPLEMENTED,
        "INTERNAL_NOT_IMPLEMENTED",
        "Route is not implemented yet",
        json!({"method": request.method().as_str(), "path": request.uri().path()}),
        &trace_id,
    )
}

async fn commit_worktree(
    State(state): State<Arc<NodeState>>,
    Extension(TraceId(trace_id)): Extension<TraceId>,
    Path(execution_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = require_internal_token(&state, &headers, &trace_id) {
        return response;
    }
    let payload = match decode_json(&body, &trace_id) {
        Ok(payload) => payload,
        Err(response) => return response,
    };

    let worktree_root = required_field(&payload, "worktree_root");
    let message = required_field(&payload, "message");
    let (Some(worktree_root), Some(message)) = (worktree_root, message) else {
        return standard_error_response(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "worktree_root and message are required",
            json!({}),
            &trace_id,
        );
    };
    let git_name = optional_field(&payload, "git_name").unwrap_or_else(|| "Goyais".to_string());
    let git_email =
        optional_field(&payload, "git_email").unwrap_or_else(|| "worker@goyais.local".to_string());

    info!(execution_id, worktree_root, "commit requested");
    match state
        .worktree
        .commit(
            std::path::Path::new(&worktree_root),
            &message,
            &git_name,
            &git_email,
        )
        .await
    {
        Ok(commit_sha) => (StatusCode::OK, Json(json!({"commit_sha": commit_sha}))).into_response(),
        Err(WorktreeError::NothingToCommit) => standard_error_response(
            StatusCode::CONFLICT,
            "WORKTREE_NOTHING_TO_COMMIT",
            "nothing to commit — working tree is clean",
            json!({"worktree_root": worktree_root}),
            &trace_id,
        ),
        Err(e) => standard_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "WORKTREE_COMMIT_FAILED",
            &e.to_string(),
            json!({"worktree_root": worktree_root}),
            &trace_id,
        ),
    }
}

async fn discard_worktree(
    State(state): State<Arc<NodeState>>,
    Extension(TraceId(trace_id)): Extension<TraceId>,
    Path(execution_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = require_internal_token(&state, &headers, &trace_id) {
        return response;
    }
    let payload = match decode_json(&body, &trace_id) {
        Ok(payload) => payload,
        Err(response) => return response,
    };
    let Some(repo_root) = required_field(&payload, "repo_root") else {
        return standard_error_response(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "repo_root is required",
            json!({}),
            &trace_id,
        );
    };

    info!(execution_id, repo_root, "discard requested");
    state.worktree.remove(&repo_root, &execution_id, true).await;
    (StatusCode::OK, Json(json!({"status": "discarded"}))).into_response()
}

fn require_internal_token(
    state: &NodeState,
    headers: &HeaderMap,
    trace_id: &str,
) -> Result<(), Response> {
    let Some(expected) = state.internal_token.as_deref() else {
        return Err(standard_error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "AUTH_INTERNAL_TOKEN_NOT_CONFIGURED",
            "Internal token is not configured",
            json!({"env": "WORKER_INTERNAL_TOKEN"}),
            trace_id,
        ));
    };

    let provided = extract_internal_token(headers);
    if provided.is_empty() {
        return Err(standard_error_response(
            StatusCode::UNAUTHORIZED,
            "AUTH_INTERNAL_TOKEN_REQUIRED",
            "Internal token is required",
            json!({"header": INTERNAL_TOKEN_HEADER}),
            trace_id,
        ));
    }
    if provided != expected {
        return Err(standard_error_response(
            StatusCode::UNAUTHORIZED,
            "AUTH_INVALID_INTERNAL_TOKEN",
            "Internal token is invalid",
            json!({}),
            trace_id,
        ));
    }
    Ok(())
}

fn extract_internal_token(headers: &HeaderMap) -> String {
    if let Some(token) = headers
        .get(INTERNAL_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return token.to_string();
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .unwrap_or("")
        .to_string()
}

fn decode_json(body: &Bytes, trace_id: &str) -> Result<Value, Response> {
    let parsed: Value = serde_json::from_slice(body).map_err(|_| {
        standard_error_response(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "Invalid JSON request body",
            json!({}),
            trace_id,
        )
    })?;
    if !parsed.is_object() {
        return Err(standard_error_response(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "Request body must be a JSON object",
            json!({}),
            trace_id,
        ));
    }
    Ok(parsed)
}

fn required_field(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn optional_field(payload: &Value, key: &str) -> Option<String> {
    required_field(payload, key)
}

fn standard_error_response(
    status: StatusCode,
    code: &str,
    message: &str,
    details: Value,
    trace_id: &str,
) -> Response {
    let body = json!({
        "code": code,
        "message": message,
        "details": details,
        "trace_id": trace_id,
    });
    (status, Json(body)).into_response()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
