// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Prompt assembly for the execution engine.

const BASE_SYSTEM_PROMPT: &str = "You are the Goyais worker agent. Prefer deterministic code \
     edits and concise explanations. Use available tools only when necessary.";

/// The fixed nudge appended before the tool-free summary turn when the
/// turn cap is reached.
pub const TURN_LIMIT_NUDGE: &str =
    "Tool-call turn limit reached. Do not call tools. Provide a concise final answer.";

/// Build the system prompt, augmented with project context when known.
pub fn system_prompt(project_name: &str, project_path: &str) -> String {
    let mut prompt = String::from(BASE_SYSTEM_PROMPT);
    let name = project_name.trim();
    let path = project_path.trim();
    if !name.is_empty() {
        prompt.push_str(&format!("\nProject: {name}"));
    }
    if !path.is_empty() {
        prompt.push_str(&format!("\nProject path: {path}"));
    }
    prompt
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
