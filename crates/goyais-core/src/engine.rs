// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The per-execution turn loop.
//!
//! ```text
//!    pending ──started──▶ running
//!    running ──tool_use──▶ running
//!    running ──no_tool──▶ completed
//!    running ──cancel──▶ stopped
//!    running ──risk_reject──▶ failed          (plan mode, high/critical)
//!    running ──turn_cap──▶ completed_truncated
//!    running ──adapter_error──▶ failed
//! ```
//!
//! Exactly one terminal event (`execution_done` / `execution_error` /
//! `execution_stopped`) is emitted per run, and nothing follows it. The
//! cancellation flag is polled at every boundary: before each model turn and
//! before each tool call. Subagent calls overlap among themselves under the
//! pool semaphore and are awaited in the order the model emitted them, so
//! the event stream stays deterministic.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::warn;

use goyais_model::{
    resolve_invocation, AdapterError, TokenUsage, ToolCall, TurnDriver, TurnMessage,
};
use goyais_safety::{classify_content_risk, classify_tool_risk, RiskLevel};
use goyais_tools::{default_tools, execute_tool_call, run_subagent, DiffDescriptor};

use crate::envelope::{ExecutionEnvelope, ExecutionMode};
use crate::events::{event_type, CancelFlag, EventSink};
use crate::prompts::{system_prompt, TURN_LIMIT_NUDGE};

pub const DEFAULT_MAX_TURNS: u32 = 24;
const MIN_MAX_TURNS: u32 = 4;
const MAX_MAX_TURNS: u32 = 64;
const ASSISTANT_DELTA_LIMIT: usize = 1_000;

/// Clamp the effective turn cap into `[4, 64]`.
///
/// Precedence: the envelope's agent config → `WORKER_MAX_MODEL_TURNS` →
/// the built-in default of 24.
pub fn resolve_max_turns(snapshot_max_turns: Option<i64>) -> u32 {
    let raw = snapshot_max_turns
        .or_else(|| {
            std::env::var("WORKER_MAX_MODEL_TURNS")
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok())
        })
        .unwrap_or(DEFAULT_MAX_TURNS as i64);
    (raw.clamp(MIN_MAX_TURNS as i64, MAX_MAX_TURNS as i64)) as u32
}

/// Run one claimed execution to its terminal event.
///
/// All failures are absorbed here: adapter errors and internal failures
/// become typed `execution_error` events, never panics or early returns
/// without a terminal event.
pub async fn run_execution(
    envelope: &ExecutionEnvelope,
    sink: &dyn EventSink,
    cancel: &CancelFlag,
    driver: Arc<dyn TurnDriver>,
) {
    if envelope.execution_id.trim().is_empty() {
        return;
    }

    match drive(envelope, sink, cancel, driver).await {
        Ok(()) => {}
        Err(EngineError::Adapter(e)) => {
            sink.emit(
                event_type::EXECUTION_ERROR,
                json!({
                    "reason": e.code(),
                    "message": e.to_string(),
                    "details": e.details(),
                }),
            )
            .await;
        }
        Err(EngineError::Runtime(message)) => {
            warn!(execution_id = %envelope.execution_id, "engine runtime failure: {message}");
            sink.emit(
                event_type::EXECUTION_ERROR,
                json!({
                    "reason": "WORKER_RUNTIME_ERROR",
                    "message": message,
                }),
            )
            .await;
        }
    }
}

enum EngineError {
    Adapter(AdapterError),
    Runtime(String),
}

impl From<AdapterError> for EngineError {
    fn from(e: AdapterError) -> Self {
        EngineError::Adapter(e)
    }
}

async fn drive(
    envelope: &ExecutionEnvelope,
    sink: &dyn EventSink,
    cancel: &CancelFlag,
    driver: Arc<dyn TurnDriver>,
) -> Result<(), EngineError> {
    let mode = envelope.effective_mode();

    sink.emit(
        event_type::EXECUTION_STARTED,
        json!({"mode": mode.as_str(), "model_id": envelope.model_id}),
    )
    .await;
    if cancel.is_cancelled() {
        return emit_stopped(sink).await;
    }

    // Content-level gate: only plan mode rejects; agent mode runs without
    // confirmation and only tool-level risk is recorded.
    let content_risk = classify_content_risk(&envelope.content);
    if mode == ExecutionMode::Plan && content_risk >= RiskLevel::High {
        sink.emit(
            event_type::EXECUTION_ERROR,
            json!({
                "reason": "PLAN_MODE_REJECTED",
                "message": "Plan mode rejects high/critical operations.",
                "risk_level": content_risk.as_str(),
            }),
        )
        .await;
        return Ok(());
    }

    let invocation = resolve_invocation(
        &envelope.model_id,
        &envelope.model_snapshot,
        &goyais_model::process_env(),
    )?;

    let mut messages = vec![
        TurnMessage::system(system_prompt(&envelope.project_name, &envelope.project_path)),
        TurnMessage::user(&envelope.content),
    ];
    let tools = default_tools();
    let workspace_root = envelope.workspace_root();
    let max_turns = resolve_max_turns(envelope.agent_config_snapshot.max_model_turns);

    let mut usage = TokenUsage::default();
    let mut diffs: Vec<DiffDescriptor> = Vec::new();
    let mut final_text = String::new();

    for turn in 1..=max_turns {
        if cancel.is_cancelled() {
            return emit_stopped(sink).await;
        }

        sink.emit(
            event_type::THINKING_DELTA,
            json!({
                "stage": "model_call",
                "turn": turn,
                "vendor": invocation.vendor.as_str(),
                "model_id": invocation.model_id,
            }),
        )
        .await;

        let turn_result = driver.run_turn(&invocation, &messages, &tools).await?;
        usage.add(&turn_result.usage);

        if !turn_result.text.is_empty() {
            final_text = turn_result.text.clone();
            sink.emit(
                event_type::THINKING_DELTA,
                json!({
                    "stage": "assistant_output",
                    "turn": turn,
                    "delta": truncate_chars(&turn_result.text, ASSISTANT_DELTA_LIMIT),
                    "usage": usage,
                }),
            )
            .await;
        }

        if turn_result.tool_calls.is_empty() {
            emit_diffs(sink, &diffs).await;
            let content = if final_text.is_empty() {
                format!("Execution {} completed.", envelope.execution_id)
            } else {
                final_text
            };
            sink.emit(
                event_type::EXECUTION_DONE,
                json!({
                    "content": content,
                    "result": "ok",
                    "turns": turn,
                    "max_turns": max_turns,
                    "usage": usage,
                }),
            )
            .await;
            return Ok(());
        }

        messages.push(TurnMessage::assistant(
            turn_result.text.clone(),
            turn_result.tool_calls.clone(),
        ));

        // Synchronous tools run in model order; subagents are spawned as
        // they appear and awaited afterwards in the same order, so every
        // tool_call gets exactly one tool_result in a deterministic place.
        let mut pending_subagents: Vec<(ToolCall, JoinHandle<Value>)> = Vec::new();
        for tool_call in &turn_result.tool_calls {
            if cancel.is_cancelled() {
                abort_pending(pending_subagents);
                return emit_stopped(sink).await;
            }

            let risk_level = classify_tool_risk(&tool_call.name, &tool_call.arguments);
            if mode == ExecutionMode::Plan && risk_level >= RiskLevel::High {
                abort_pending(pending_subagents);
                sink.emit(
                    event_type::EXECUTION_ERROR,
                    json!({
                        "reason": "PLAN_MODE_REJECTED",
                        "message": "Plan mode rejects high/critical tool usage.",
                        "tool_name": tool_call.name,
                        "risk_level": risk_level.as_str(),
                    }),
                )
                .await;
                return Ok(());
            }

            sink.emit(
                event_type::TOOL_CALL,
                json!({
                    "call_id": tool_call.id,
                    "name": tool_call.name,
                    "input": tool_call.arguments,
                    "risk_level": risk_level.as_str(),
                }),
            )
            .await;

            if tool_call.name.trim().eq_ignore_ascii_case("run_subagent") {
                let handle = tokio::spawn(run_subagent(
                    driver.clone(),
                    invocation.clone(),
                    tool_call.arguments.clone(),
                ));
                pending_subagents.push((tool_call.clone(), handle));
                continue;
            }

            let result = execute_tool_call(tool_call, &workspace_root).await;
            sink.emit(
                event_type::TOOL_RESULT,
                json!({
                    "call_id": tool_call.id,
                    "name": tool_call.name,
                    "ok": result.is_ok(),
                    "output": result.output,
                }),
            )
            .await;
            if let Some(diff) = result.diff {
                diffs.push(diff);
            }
            messages.push(tool_message(tool_call, &result.output)?);
        }

        for (tool_call, handle) in pending_subagents {
            let output = match handle.await {
                Ok(output) => output,
                Err(e) => json!({
                    "ok": false,
                    "error": "SUBAGENT_RUNTIME_ERROR",
                    "message": e.to_string(),
                }),
            };
            let ok = output.get("ok").and_then(Value::as_bool).unwrap_or(false);
            sink.emit(
                event_type::TOOL_RESULT,
                json!({
                    "call_id": tool_call.id,
                    "name": tool_call.name,
                    "ok": ok,
                    "output": output,
                }),
            )
            .await;
            messages.push(tool_message(&tool_call, &output)?);
        }
    }

    // Turn cap reached: one final tool-free turn so the model can summarise
    // instead of the run stopping abruptly mid-task.
    sink.emit(
        event_type::THINKING_DELTA,
        json!({"stage": "turn_limit_reached", "max_turns": max_turns}),
    )
    .await;
    messages.push(TurnMessage::user(TURN_LIMIT_NUDGE));

    sink.emit(
        event_type::THINKING_DELTA,
        json!({
            "stage": "model_call",
            "turn": max_turns + 1,
            "vendor": invocation.vendor.as_str(),
            "model_id": invocation.model_id,
        }),
    )
    .await;
    match driver.run_turn(&invocation, &messages, &[]).await {
        Ok(summary_turn) => {
            usage.add(&summary_turn.usage);
            let content = if !summary_turn.text.is_empty() {
                summary_turn.text
            } else if !final_text.is_empty() {
                final_text
            } else {
                format!("Execution {} completed.", envelope.execution_id)
            };
            emit_diffs(sink, &diffs).await;
            sink.emit(
                event_type::EXECUTION_DONE,
                json!({
                    "content": content,
                    "result": "ok",
                    "truncated": true,
                    "reason": "MAX_TURNS_REACHED",
                    "turns": max_turns,
                    "max_turns": max_turns,
                    "usage": usage,
                }),
            )
            .await;
        }
        Err(e) => {
            sink.emit(
                event_type::EXECUTION_ERROR,
                json!({
                    "reason": "MAX_TURNS_EXCEEDED",
                    "message": "Execution exceeded the max model turns.",
                    "max_turns": max_turns,
                    "details": {"summary_error": e.code()},
                }),
            )
            .await;
        }
    }
    Ok(())
}

async fn emit_stopped(sink: &dyn EventSink) -> Result<(), EngineError> {
    sink.emit(
        event_type::EXECUTION_STOPPED,
        json!({"reason": "stop_requested"}),
    )
    .await;
    Ok(())
}

async fn emit_diffs(sink: &dyn EventSink, diffs: &[DiffDescriptor]) {
    if diffs.is_empty() {
        return;
    }
    sink.emit(
        event_type::DIFF_GENERATED,
        json!({"files": diffs.len(), "diff": diffs}),
    )
    .await;
}

fn tool_message(tool_call: &ToolCall, output: &Value) -> Result<TurnMessage, EngineError> {
    let content = serde_json::to_string(output)
        .map_err(|e| EngineError::Runtime(format!("tool output serialization failed: {e}")))?;
    Ok(TurnMessage::tool_result(
        tool_call.id.clone(),
        tool_call.name.clone(),
        content,
    ))
}

fn abort_pending(pending: Vec<(ToolCall, JoinHandle<Value>)>) {
    for (_, handle) in pending {
        handle.abort();
    }
}

fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
