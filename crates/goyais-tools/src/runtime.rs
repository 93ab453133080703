// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use goyais_model::ToolCall;
use goyais_safety::{ensure_safe_command, resolve_guarded_path};

const OUTPUT_LIMIT: usize = 50_000;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Workspace change produced by a mutating tool, reported to the Hub in one
/// `diff_generated` event at the end of the run.
#[derive(Debug, Clone, Serialize)]
pub struct DiffDescriptor {
    pub id: String,
    pub path: String,
    pub change_type: String,
    pub summary: String,
}

impl DiffDescriptor {
    fn modified(tool_name: &str, path: &str, summary: impl Into<String>) -> Self {
        Self {
            id: format!("diff_{tool_name}_{path}"),
            path: path.to_string(),
            change_type: "modified".to_string(),
            summary: summary.into(),
        }
    }
}

/// The outcome of one tool call: a JSON output for the model and an optional
/// diff descriptor for the Hub.
#[derive(Debug, Clone)]
pub struct ToolExecutionResult {
    pub output: Value,
    pub diff: Option<DiffDescriptor>,
}

impl ToolExecutionResult {
    fn output(output: Value) -> Self {
        Self { output, diff: None }
    }

    fn error(message: impl std::fmt::Display) -> Self {
        Self {
            output: json!({"error": message.to_string()}),
            diff: None,
        }
    }

    /// True when the output does not carry an `error` key.
    pub fn is_ok(&self) -> bool {
        self.output.get("error").is_none()
    }
}

/// Execute one synchronous built-in against the workspace root.
///
/// `run_subagent` is not handled here — the engine runs it through the
/// subagent pool so the calls can overlap.
pub async fn execute_tool_call(call: &ToolCall, workspace_root: &Path) -> ToolExecutionResult {
    let name = call.name.trim().to_lowercase();
    debug!(tool = %name, "executing tool call");
    match name.as_str() {
        "read_file" => read_file(&call.arguments, workspace_root).await,
        "write_file" => write_file(&call.arguments, workspace_root, &name).await,
        "edit_file" => edit_file(&call.arguments, workspace_root, &name).await,
        "run_command" => run_command(&call.arguments, workspace_root, &name).await,
        other => ToolExecutionResult::output(json!({
            "summary": format!("Unsupported tool: {other}"),
        })),
    }
}

async fn read_file(arguments: &Value, root: &Path) -> ToolExecutionResult {
    let Some(raw_path) = required_str(arguments, "path") else {
        return ToolExecutionResult::error("path is required");
    };
    let path = match resolve_guarded_path(root, &raw_path) {
        Ok(p) => p,
        Err(e) => return ToolExecutionResult::error(e),
    };
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => ToolExecutionResult::output(json!({
            "path": raw_path,
            "summary": format!("Read {raw_path}"),
            "content_preview": truncate(&content, OUTPUT_LIMIT),
        })),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            ToolExecutionResult::error(format!("file not found: {raw_path}"))
        }
        Err(e) => ToolExecutionResult::error(e),
    }
}

async fn write_file(arguments: &Value, root: &Path, tool_name: &str) -> ToolExecutionResult {
    let Some(raw_path) = required_str(arguments, "path") else {
        return ToolExecutionResult::error("path is required");
    };
    let content = arguments
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or("");
    let path = match resolve_guarded_path(root, &raw_path) {
        Ok(p) => p,
        Err(e) => return ToolExecutionResult::error(e),
    };
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return ToolExecutionResult::error(e);
        }
    }
    if let Err(e) = tokio::fs::write(&path, content).await {
        return ToolExecutionResult::error(e);
    }
    ToolExecutionResult {
        output: json!({
            "path": raw_path,
            "summary": format!("Wrote {} bytes", content.len()),
        }),
        diff: Some(DiffDescriptor::modified(
            tool_name,
            &raw_path,
            format!("{tool_name} updated file"),
        )),
    }
}

async fn edit_file(arguments: &Value, root: &Path, tool_name: &str) -> ToolExecutionResult {
    let Some(raw_path) = required_str(arguments, "path") else {
        return ToolExecutionResult::error("path is required");
    };
    let old_text = arguments
        .get("old_text")
        .and_then(Value::as_str)
        .unwrap_or("");
    let new_text = arguments
        .get("new_text")
        .and_then(Value::as_str)
        .unwrap_or("");
    let path = match resolve_guarded_path(root, &raw_path) {
        Ok(p) => p,
        Err(e) => return ToolExecutionResult::error(e),
    };
    let current = match tokio::fs::read_to_string(&path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return ToolExecutionResult::error(format!("file not found: {raw_path}"))
        }
        Err(e) => return ToolExecutionResult::error(e),
    };
    if !current.contains(old_text) || old_text.is_empty() {
        return ToolExecutionResult::error(format!("text not found in {raw_path}"));
    }
    let updated = current.replacen(old_text, new_text, 1);
    if let Err(e) = tokio::fs::write(&path, updated).await {
        return ToolExecutionResult::error(e);
    }
    ToolExecutionResult {
        output: json!({
            "path": raw_path,
            "summary": format!("Edited {raw_path}"),
        }),
        diff: Some(DiffDescriptor::modified(
            tool_name,
            &raw_path,
            format!("{tool_name} updated file"),
        )),
    }
}

async fn run_command(arguments: &Value, root: &Path, tool_name: &str) -> ToolExecutionResult {
    let Some(raw_command) = required_str(arguments, "command") else {
        return ToolExecutionResult::error("command is required");
    };
    let argv = match ensure_safe_command(&raw_command) {
        Ok(argv) => argv,
        Err(e) => return ToolExecutionResult::error(e),
    };

    // The vetted argv is spawned directly; no shell is ever involved.
    let mut command = Command::new(&argv[0]);
    command
        .args(&argv[1..])
        .current_dir(root)
        .kill_on_drop(true);

    let result = tokio::time::timeout(COMMAND_TIMEOUT, command.output()).await;
    let output = match result {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return ToolExecutionResult::error(e),
        Err(_) => return ToolExecutionResult::error("command timeout (120s)"),
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    let exit_code = output.status.code().unwrap_or(-1);

    ToolExecutionResult {
        output: json!({
            "summary": format!("Command finished with code {exit_code}"),
            "exit_code": exit_code,
            "output": truncate(combined.trim(), OUTPUT_LIMIT),
        }),
        diff: Some(DiffDescriptor::modified(
            tool_name,
            ".",
            "Command may have changed files",
        )),
    }
}

fn required_str(arguments: &Value, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn truncate(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        s.to_string()
    } else {
        s.chars().take(limit).collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
