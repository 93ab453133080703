// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The worker's built-in tool set.
//!
//! Five tools, all rooted in the execution's workspace: `read_file`,
//! `write_file`, `edit_file`, `run_command`, and `run_subagent`. Every
//! failure is mapped to an `{"error": …}` output — a bad tool call costs the
//! model one turn, never the execution.

pub mod runtime;
pub mod spec;
pub mod subagent;

pub use runtime::{execute_tool_call, DiffDescriptor, ToolExecutionResult};
pub use spec::default_tools;
pub use subagent::run_subagent;
