// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::Value;

use crate::command_guard::is_read_only_command;

/// Risk level attached to user content and tool calls.
///
/// Total order: `Low < High < Critical`. Plan mode rejects anything at
/// `High` or above; agent mode only records the level on the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Keyword sets include the CJK equivalents the hub's user base actually types.
const CONTENT_CRITICAL: &[&str] = &[" delete ", " rm ", "remove file", "drop table", "删除"];
const CONTENT_HIGH: &[&str] = &[
    "write",
    "apply_patch",
    "run ",
    "command",
    "network",
    "edit ",
    "修改",
    "写入",
    "执行",
    "联网",
];

/// Classify free-text user content.
///
/// The critical scan runs over a space-wrapped copy so that word-boundary
/// keywords (` rm `) match at the start and end of the text too.
pub fn classify_content_risk(content: &str) -> RiskLevel {
    let normalized = content.to_lowercase();
    let wrapped = format!(" {normalized} ");
    if CONTENT_CRITICAL.iter().any(|k| wrapped.contains(k)) {
        return RiskLevel::Critical;
    }
    if CONTENT_HIGH.iter().any(|k| normalized.contains(k)) {
        return RiskLevel::High;
    }
    RiskLevel::Low
}

/// Classify one tool call from its name and JSON arguments.
pub fn classify_tool_risk(tool_name: &str, arguments: &Value) -> RiskLevel {
    let normalized = tool_name.to_lowercase();
    if normalized == "run_subagent" {
        return RiskLevel::Low;
    }
    if normalized == "run_command" {
        let command = arguments
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_lowercase();
        if is_read_only_command(&command) {
            return RiskLevel::Low;
        }
        let wrapped = format!(" {command} ");
        if [" delete ", " rm ", " remove ", " drop "]
            .iter()
            .any(|k| wrapped.contains(k))
        {
            return RiskLevel::Critical;
        }
        return RiskLevel::High;
    }

    if ["delete", "remove", "rm", "drop"]
        .iter()
        .any(|k| normalized.contains(k))
    {
        return RiskLevel::Critical;
    }
    if ["write", "patch", "run", "command", "network", "edit", "create"]
        .iter()
        .any(|k| normalized.contains(k))
    {
        return RiskLevel::High;
    }

    let raw_arguments = arguments.to_string().to_lowercase();
    if ["delete", "rm ", "remove", "drop table", "删除"]
        .iter()
        .any(|k| raw_arguments.contains(k))
    {
        return RiskLevel::Critical;
    }
    if ["write", "apply_patch", "run_command", "network"]
        .iter()
        .any(|k| raw_arguments.contains(k))
    {
        return RiskLevel::High;
    }
    RiskLevel::Low
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
