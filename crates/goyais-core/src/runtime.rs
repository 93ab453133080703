// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use goyais_model::TurnDriver;

use crate::engine::run_execution;
use crate::envelope::ExecutionEnvelope;
use crate::events::{event_type, CancelFlag, EventSink};

/// The pluggable per-execution runtime. `vanilla` is the only real
/// implementation; `langgraph` is declared for forward compatibility and
/// falls back with a notice event.
#[async_trait]
pub trait ExecutionRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        envelope: &ExecutionEnvelope,
        sink: &dyn EventSink,
        cancel: &CancelFlag,
        driver: Arc<dyn TurnDriver>,
    );
}

#[derive(Debug, Default)]
pub struct VanillaRuntime;

#[async_trait]
impl ExecutionRuntime for VanillaRuntime {
    fn name(&self) -> &'static str {
        "vanilla"
    }

    async fn run(
        &self,
        envelope: &ExecutionEnvelope,
        sink: &dyn EventSink,
        cancel: &CancelFlag,
        driver: Arc<dyn TurnDriver>,
    ) {
        run_execution(envelope, sink, cancel, driver).await;
    }
}

/// Declared runtime mode that is not implemented yet: announces the fallback
/// on the event stream, then delegates to [`VanillaRuntime`].
#[derive(Debug, Default)]
pub struct LangGraphRuntime {
    fallback: VanillaRuntime,
}

#[async_trait]
impl ExecutionRuntime for LangGraphRuntime {
    fn name(&self) -> &'static str {
        "langgraph"
    }

    async fn run(
        &self,
        envelope: &ExecutionEnvelope,
        sink: &dyn EventSink,
        cancel: &CancelFlag,
        driver: Arc<dyn TurnDriver>,
    ) {
        sink.emit(
            event_type::THINKING_DELTA,
            json!({
                "stage": "runtime_fallback",
                "runtime": "langgraph",
                "fallback": "vanilla",
            }),
        )
        .await;
        self.fallback.run(envelope, sink, cancel, driver).await;
    }
}

/// Select the runtime for `WORKER_RUNTIME`.
pub fn resolve_runtime(mode: &str) -> Arc<dyn ExecutionRuntime> {
    match mode.trim().to_lowercase().as_str() {
        "langgraph" => Arc::new(LangGraphRuntime::default()),
        _ => Arc::new(VanillaRuntime),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use goyais_model::ScriptedTurnDriver;

    #[test]
    fn runtime_selection() {
        assert_eq!(resolve_runtime("vanilla").name(), "vanilla");
        assert_eq!(resolve_runtime("LANGGRAPH").name(), "langgraph");
        assert_eq!(resolve_runtime("unknown").name(), "vanilla");
        assert_eq!(resolve_runtime("").name(), "vanilla");
    }

    #[tokio::test]
    async fn langgraph_emits_fallback_notice_first() {
        let sink = RecordingSink::new();
        let driver = Arc::new(ScriptedTurnDriver::new(vec![]));
        let runtime = LangGraphRuntime::default();
        // Empty envelope: the engine returns without events, so the notice
        // is the only thing on the stream.
        let envelope = ExecutionEnvelope::default();
        runtime
            .run(&envelope, &sink, &CancelFlag::new(), driver)
            .await;
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "thinking_delta");
        assert_eq!(events[0].1["stage"], "runtime_fallback");
        assert_eq!(events[0].1["fallback"], "vanilla");
    }
}
