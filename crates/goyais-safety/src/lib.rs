// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Safety layer for the worker's tool runtime.
//!
//! Three independent gates, all of them tool-scoped (a rejection fails the
//! one tool call, never the execution):
//!
//! - [`path_guard`] — every file path a tool touches must resolve inside the
//!   execution workspace, symlinks included.
//! - [`command_guard`] — `run_command` only ever executes a tokenized argv
//!   whose head verb is on the read-only allowlist; no shell is involved.
//! - [`risk`] — keyword classification of user content and tool calls into
//!   `low | high | critical`, used by plan mode to reject mutations.

pub mod command_guard;
pub mod path_guard;
pub mod risk;

pub use command_guard::ensure_safe_command;
pub use path_guard::resolve_guarded_path;
pub use risk::{classify_content_risk, classify_tool_risk, RiskLevel};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("path escapes workspace: {0}")]
    PathEscape(String),

    #[error("{0}")]
    CommandBlocked(String),
}
