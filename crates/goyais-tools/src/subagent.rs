// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Bounded subagent pool.
//!
//! A `run_subagent` tool call is one extra LLM turn with no tools advertised
//! and a system prompt that forbids requesting any. Concurrency across the
//! whole process is capped by a single semaphore sized from
//! `WORKER_MAX_SUBAGENTS` (clamped to 1..=3); task and output sizes are
//! capped so a runaway subagent cannot blow up the parent conversation.

use std::sync::{Arc, OnceLock};

use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::debug;

use goyais_model::{ModelInvocation, ToolSpec, TurnDriver, TurnMessage};

pub const SUBAGENT_MAX_TASK_CHARS: usize = 2_000;
pub const SUBAGENT_MAX_OUTPUT_CHARS: usize = 4_000;

const SUBAGENT_SYSTEM_PROMPT: &str = "You are a constrained subagent. Return concise, \
     deterministic analysis only. Do not request or execute tools.";

static SUBAGENT_SEMAPHORE: OnceLock<Arc<Semaphore>> = OnceLock::new();

fn semaphore() -> Arc<Semaphore> {
    SUBAGENT_SEMAPHORE
        .get_or_init(|| Arc::new(Semaphore::new(resolve_subagent_limit())))
        .clone()
}

/// Pool size from `WORKER_MAX_SUBAGENTS`, clamped to `[1, 3]`.
pub fn resolve_subagent_limit() -> usize {
    let raw = std::env::var("WORKER_MAX_SUBAGENTS").unwrap_or_default();
    raw.trim().parse::<usize>().unwrap_or(3).clamp(1, 3)
}

/// Schema for the `run_subagent` built-in.
pub fn subagent_tool_spec() -> ToolSpec {
    ToolSpec {
        name: "run_subagent".into(),
        description: "Delegate an independent sub-task to a constrained subagent. \
             Max parallel subagents: 3."
            .into(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "task": {"type": "string"},
                "goal": {"type": "string"},
            },
            "required": ["task"],
        }),
    }
}

/// Run one subagent call. Always returns a JSON object; failures are
/// tool-level (`{"ok": false, …}`), never fatal to the execution.
pub async fn run_subagent(
    driver: Arc<dyn TurnDriver>,
    invocation: ModelInvocation,
    arguments: Value,
) -> Value {
    let task = arguments
        .get("task")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();
    let goal = arguments
        .get("goal")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();
    if task.is_empty() {
        return json!({"ok": false, "error": "task is required"});
    }

    let mut normalized_task = truncate_chars(&task, SUBAGENT_MAX_TASK_CHARS);
    if !goal.is_empty() {
        normalized_task.push_str("\n\nGoal: ");
        normalized_task.push_str(&truncate_chars(&goal, SUBAGENT_MAX_TASK_CHARS));
    }

    let messages = vec![
        TurnMessage::system(SUBAGENT_SYSTEM_PROMPT),
        TurnMessage::user(normalized_task),
    ];

    let semaphore = semaphore();
    let _permit = match semaphore.acquire().await {
        Ok(permit) => permit,
        Err(_) => {
            return json!({
                "ok": false,
                "error": "SUBAGENT_RUNTIME_ERROR",
                "message": "subagent pool is closed",
            })
        }
    };
    debug!(vendor = %invocation.vendor, model_id = %invocation.model_id, "running subagent turn");

    match driver.run_turn(&invocation, &messages, &[]).await {
        Ok(turn) => {
            let mut summary = turn.text.trim().to_string();
            if summary.is_empty() {
                summary = "Subagent finished without textual output.".to_string();
            }
            json!({
                "ok": true,
                "summary": truncate_chars(&summary, SUBAGENT_MAX_OUTPUT_CHARS),
                "vendor": invocation.vendor.as_str(),
                "model_id": invocation.model_id,
            })
        }
        Err(e) => json!({
            "ok": false,
            "error": e.code(),
            "message": e.to_string(),
            "details": e.details(),
        }),
    }
}

fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use goyais_model::{
        resolve_invocation, AdapterError, ModelSnapshot, ModelTurnResult, ScriptedTurnDriver,
    };
    use std::collections::HashMap;

    fn local_invocation() -> ModelInvocation {
        resolve_invocation("llama3:8b", &ModelSnapshot::default(), &HashMap::new()).unwrap()
    }

    #[tokio::test]
    async fn missing_task_is_tool_error() {
        let driver = Arc::new(ScriptedTurnDriver::new(vec![]));
        let out = run_subagent(driver, local_invocation(), json!({})).await;
        assert_eq!(out["ok"], false);
        assert_eq!(out["error"], "task is required");
    }

    #[tokio::test]
    async fn successful_turn_returns_summary() {
        let driver = Arc::new(ScriptedTurnDriver::new(vec![Ok(
            ModelTurnResult::text_only("analysis result"),
        )]));
        let out = run_subagent(
            driver.clone(),
            local_invocation(),
            json!({"task": "inspect the parser"}),
        )
        .await;
        assert_eq!(out["ok"], true);
        assert_eq!(out["summary"], "analysis result");
        assert_eq!(out["vendor"], "local");
        assert_eq!(out["model_id"], "llama3:8b");
        // No tools advertised on the subagent turn.
        assert_eq!(driver.recorded()[0].tool_count, 0);
    }

    #[tokio::test]
    async fn goal_is_appended_to_the_task() {
        let driver = Arc::new(ScriptedTurnDriver::new(vec![Ok(
            ModelTurnResult::text_only("ok"),
        )]));
        run_subagent(
            driver.clone(),
            local_invocation(),
            json!({"task": "analyze", "goal": "find bugs"}),
        )
        .await;
        let recorded = driver.recorded();
        assert!(recorded[0].last_user_text.contains("analyze"));
        assert!(recorded[0].last_user_text.contains("Goal: find bugs"));
    }

    #[tokio::test]
    async fn task_is_truncated() {
        let driver = Arc::new(ScriptedTurnDriver::new(vec![Ok(
            ModelTurnResult::text_only("ok"),
        )]));
        let long_task = "x".repeat(SUBAGENT_MAX_TASK_CHARS * 2);
        run_subagent(driver.clone(), local_invocation(), json!({"task": long_task})).await;
        assert_eq!(
            driver.recorded()[0].last_user_text.len(),
            SUBAGENT_MAX_TASK_CHARS
        );
    }

    #[tokio::test]
    async fn summary_is_capped() {
        let long = "y".repeat(SUBAGENT_MAX_OUTPUT_CHARS * 2);
        let driver = Arc::new(ScriptedTurnDriver::new(vec![Ok(ModelTurnResult::text_only(
            long,
        ))]));
        let out = run_subagent(driver, local_invocation(), json!({"task": "t"})).await;
        assert_eq!(
            out["summary"].as_str().unwrap().len(),
            SUBAGENT_MAX_OUTPUT_CHARS
        );
    }

    #[tokio::test]
    async fn empty_model_text_gets_placeholder_summary() {
        let driver = Arc::new(ScriptedTurnDriver::new(vec![Ok(ModelTurnResult::text_only(
            "",
        ))]));
        let out = run_subagent(driver, local_invocation(), json!({"task": "t"})).await;
        assert_eq!(out["ok"], true);
        assert!(out["summary"]
            .as_str()
            .unwrap()
            .contains("without textual output"));
    }

    #[tokio::test]
    async fn adapter_error_is_tool_level() {
        let driver = Arc::new(ScriptedTurnDriver::new(vec![Err(AdapterError::Network(
            "unreachable".into(),
        ))]));
        let out = run_subagent(driver, local_invocation(), json!({"task": "t"})).await;
        assert_eq!(out["ok"], false);
        assert_eq!(out["error"], "MODEL_NETWORK_ERROR");
        assert!(out["message"].as_str().unwrap().contains("unreachable"));
    }

    #[test]
    fn subagent_limit_is_clamped() {
        // Whatever the env says, the result stays in [1, 3].
        let limit = resolve_subagent_limit();
        assert!((1..=3).contains(&limit));
    }
}
