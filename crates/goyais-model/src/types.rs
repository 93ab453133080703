// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single message in the in-memory conversation of one execution.
///
/// Append-only; the engine owns the list. Tool-call arguments are kept as
/// parsed JSON objects — each transport serializes them into its own wire
/// shape (OpenAI wants a JSON *string*, Gemini wants the object).
#[derive(Debug, Clone)]
pub enum TurnMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: String,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        /// JSON-encoded tool output.
        content: String,
    },
}

impl TurnMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content: content.into(),
            tool_calls,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    /// Plain text of a system/user/assistant message, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::System { content } | Self::User { content } | Self::Assistant { content, .. } => {
                Some(content)
            }
            Self::Tool { .. } => None,
        }
    }
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque identifier from the model, forwarded verbatim on the reply.
    pub id: String,
    pub name: String,
    /// Parsed JSON argument object.
    pub arguments: Value,
}

/// Schema of one tool advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the argument object.
    pub input_schema: Value,
}

/// Token usage for one turn, or accumulated across an execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64, total_tokens: u64) -> Self {
        let total = if total_tokens == 0 {
            input_tokens + output_tokens
        } else {
            total_tokens
        };
        Self {
            input_tokens,
            output_tokens,
            total_tokens: total,
        }
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// The parsed result of one model turn.
///
/// An empty `tool_calls` list means the turn is terminal.
#[derive(Debug, Clone)]
pub struct ModelTurnResult {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    pub raw_response: Value,
}

impl ModelTurnResult {
    /// Plain text-only result, mostly for tests and mocks.
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
            raw_response: Value::Null,
        }
    }

    /// Result carrying tool calls.
    pub fn with_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: text.into(),
            tool_calls,
            usage: TokenUsage::default(),
            raw_response: Value::Null,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
