// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::json;

use goyais_model::ToolSpec;

/// The tool schemas advertised to the model on every non-summary turn.
pub fn default_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "read_file".into(),
            description: "Read file content from the current project.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"],
            }),
        },
        ToolSpec {
            name: "write_file".into(),
            description: "Write updated file content to the current project.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"},
                },
                "required": ["path", "content"],
            }),
        },
        ToolSpec {
            name: "edit_file".into(),
            description: "Replace exact text in a file.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "old_text": {"type": "string"},
                    "new_text": {"type": "string"},
                },
                "required": ["path", "old_text", "new_text"],
            }),
        },
        ToolSpec {
            name: "run_command".into(),
            description: "Execute a read-only terminal command in the current project.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"command": {"type": "string"}},
                "required": ["command"],
            }),
        },
        crate::subagent::subagent_tool_spec(),
    ]
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
