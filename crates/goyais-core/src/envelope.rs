// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use goyais_model::ModelSnapshot;

/// Effective mode of an execution. Anything the Hub sends that is not
/// recognizably `plan` runs as `agent` — the permissive reading is safe
/// because plan is the *restrictive* mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Agent,
    Plan,
}

impl ExecutionMode {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("plan") {
            ExecutionMode::Plan
        } else {
            ExecutionMode::Agent
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Agent => "agent",
            ExecutionMode::Plan => "plan",
        }
    }
}

/// Agent configuration frozen into the envelope at claim time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentConfigSnapshot {
    #[serde(default)]
    pub max_model_turns: Option<i64>,
}

/// Immutable snapshot of one claimed execution.
///
/// Inbound payloads may still use the legacy `run_id` (or bare `id`)
/// vocabulary; both are accepted here, and everything the worker emits uses
/// `execution_id` exclusively.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionEnvelope {
    #[serde(default, alias = "run_id", alias = "id")]
    pub execution_id: String,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default)]
    pub queue_index: i64,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub mode_snapshot: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub model_snapshot: ModelSnapshot,
    #[serde(default)]
    pub agent_config_snapshot: AgentConfigSnapshot,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub project_path: String,
    #[serde(default)]
    pub project_name: String,
    #[serde(default)]
    pub project_is_git: bool,
    #[serde(default)]
    pub lease_seconds: Option<u64>,
    /// Where tools actually run; set by the claim loop after the worktree
    /// lane is prepared. Defaults to `project_path`.
    #[serde(skip)]
    pub working_directory: String,
}

impl ExecutionEnvelope {
    /// Parse the `execution` object of a claim response.
    ///
    /// Accepts both the flat envelope and the historical nested shape where
    /// the execution record sits under an inner `execution` key with
    /// `content` / `project_*` fields alongside it. Returns `None` when no
    /// usable execution id is present.
    pub fn from_claim(raw: &Value) -> Option<ExecutionEnvelope> {
        let object = raw.as_object()?;

        let mut merged = object.clone();
        if let Some(inner) = object.get("execution").and_then(Value::as_object) {
            let outer = merged;
            merged = inner.clone();
            // Outer envelope fields win over the nested record.
            for key in [
                "content",
                "project_path",
                "project_name",
                "project_is_git",
                "lease_seconds",
            ] {
                if let Some(value) = outer.get(key) {
                    if !value.is_null() {
                        merged.insert(key.to_string(), value.clone());
                    }
                }
            }
        }

        let mut envelope: ExecutionEnvelope =
            serde_json::from_value(Value::Object(merged)).ok()?;
        envelope.normalize();
        if envelope.execution_id.is_empty() {
            return None;
        }
        Some(envelope)
    }

    /// Fill derived fields and clamp invariants after deserialization.
    pub fn normalize(&mut self) {
        self.execution_id = self.execution_id.trim().to_string();
        self.queue_index = self.queue_index.max(0);
        if self.trace_id.trim().is_empty() {
            self.trace_id = format!("tr_worker_{}", self.execution_id);
        }
        if self.project_name.trim().is_empty() && !self.project_path.trim().is_empty() {
            self.project_name = Path::new(self.project_path.trim_end_matches('/'))
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
        }
        if self.working_directory.trim().is_empty() {
            self.working_directory = self.project_path.clone();
        }
    }

    /// The effective mode: `mode_snapshot` wins over `mode`.
    pub fn effective_mode(&self) -> ExecutionMode {
        let raw = if self.mode_snapshot.trim().is_empty() {
            &self.mode
        } else {
            &self.mode_snapshot
        };
        ExecutionMode::parse(raw)
    }

    /// Workspace root for tool execution.
    pub fn workspace_root(&self) -> PathBuf {
        if self.working_directory.trim().is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&self.working_directory)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
