// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Canonical event type strings on the worker → Hub stream.
///
/// `confirmation_required` / `confirmation_resolved` are part of the schema
/// for Hub compatibility but nothing in this worker emits them: agent mode
/// runs high-risk tools without a round-trip and plan mode rejects them.
pub mod event_type {
    pub const EXECUTION_STARTED: &str = "execution_started";
    pub const EXECUTION_STOPPED: &str = "execution_stopped";
    pub const EXECUTION_ERROR: &str = "execution_error";
    pub const EXECUTION_DONE: &str = "execution_done";
    pub const THINKING_DELTA: &str = "thinking_delta";
    pub const TOOL_CALL: &str = "tool_call";
    pub const TOOL_RESULT: &str = "tool_result";
    pub const DIFF_GENERATED: &str = "diff_generated";
    pub const CONFIRMATION_REQUIRED: &str = "confirmation_required";
    pub const CONFIRMATION_RESOLVED: &str = "confirmation_resolved";

    /// Terminal events end the stream; nothing may follow them.
    pub fn is_terminal(event_type: &str) -> bool {
        matches!(
            event_type,
            EXECUTION_DONE | EXECUTION_ERROR | EXECUTION_STOPPED
        )
    }
}

/// One ordered event on its way to the Hub.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEvent {
    pub event_id: String,
    pub execution_id: String,
    pub conversation_id: String,
    pub trace_id: String,
    pub sequence: u64,
    pub queue_index: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: String,
    pub payload: Value,
}

/// Where the engine sends its observable output. The reporter implements
/// this against the Hub; tests record in memory.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event_type: &str, payload: Value);
}

/// Shared cancellation flag for one execution.
///
/// Set by the control channel (a `stop` command or a garbage-collected
/// execution) and polled by the engine at every suspension point.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// In-memory sink that records every emitted event, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().expect("sink poisoned").clone()
    }

    /// Just the event types, for order assertions.
    pub fn event_types(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|(event_type, _)| event_type)
            .collect()
    }

    /// The payload of the first event of the given type.
    pub fn first_payload(&self, event_type: &str) -> Option<Value> {
        self.events()
            .into_iter()
            .find(|(t, _)| t == event_type)
            .map(|(_, payload)| payload)
    }

    /// The payload of the last event of the given type.
    pub fn last_payload(&self, event_type: &str) -> Option<Value> {
        self.events()
            .into_iter()
            .rev()
            .find(|(t, _)| t == event_type)
            .map(|(_, payload)| payload)
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event_type: &str, payload: Value) {
        self.events
            .lock()
            .expect("sink poisoned")
            .push((event_type.to_string(), payload));
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
