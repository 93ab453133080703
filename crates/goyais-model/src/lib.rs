// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model adapter for the Goyais worker.
//!
//! The adapter has two halves:
//!
//! - [`resolve_invocation`] turns the execution's model snapshot plus the
//!   process environment into a fully-resolved [`ModelInvocation`]: normalized
//!   vendor, base URL, API key, clamped timeout.
//! - [`run_model_turn`] issues exactly one request/response turn against the
//!   vendor's HTTP surface and returns text, tool calls, and token usage.
//!
//! Vendors are not a type hierarchy: the two wire transports
//! ([`openai_compat`] and [`google`]) are sibling modules selected on the
//! normalized [`Vendor`]. A new vendor is a new match arm, not a subclass.
//!
//! The [`TurnDriver`] trait is the seam the execution engine and subagent
//! pool call through; [`ScriptedTurnDriver`] is the deterministic test double.

pub mod driver;
pub mod error;
pub mod google;
mod http;
pub mod invocation;
pub mod openai_compat;
pub mod tls;
pub mod types;

pub use driver::{LiveTurnDriver, RecordedTurn, ScriptedTurnDriver, TurnDriver};
pub use error::AdapterError;
pub use invocation::{process_env, resolve_invocation, ModelInvocation, ModelSnapshot, Vendor};
pub use types::{ModelTurnResult, TokenUsage, ToolCall, ToolSpec, TurnMessage};

/// Run one model turn, dispatching on the invocation's normalized vendor.
pub async fn run_model_turn(
    invocation: &ModelInvocation,
    messages: &[TurnMessage],
    tools: &[ToolSpec],
) -> Result<ModelTurnResult, AdapterError> {
    match invocation.vendor {
        Vendor::Google => google::run_google_turn(invocation, messages, tools).await,
        _ => openai_compat::run_openai_compatible_turn(invocation, messages, tools).await,
    }
}
