// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Execution core of the Goyais worker.
//!
//! The [`engine`] drives one claimed execution: model turn → tool dispatch →
//! repeat, under plan-mode risk gating, cooperative cancellation, and the
//! turn cap. It performs no Hub I/O itself — ordered events flow through the
//! injected [`EventSink`], cancellation arrives through the shared
//! [`CancelFlag`], and model turns go through the injected
//! [`goyais_model::TurnDriver`].

pub mod engine;
pub mod envelope;
pub mod events;
pub mod prompts;
pub mod runtime;

pub use engine::{resolve_max_turns, run_execution};
pub use envelope::{AgentConfigSnapshot, ExecutionEnvelope, ExecutionMode};
pub use events::{event_type, CancelFlag, EventSink, OutboundEvent, RecordingSink};
pub use runtime::{resolve_runtime, ExecutionRuntime, LangGraphRuntime, VanillaRuntime};
