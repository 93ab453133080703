// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Hub-facing plumbing for the worker.
//!
//! - [`client`] — the typed REST client for the Hub's internal surface.
//! - [`reporter`] — the per-execution ordered event reporter: monotonic
//!   sequences, ring buffer, background flusher with retry.
//! - [`control`] — the per-execution long-poll that carries `stop` commands
//!   back from the Hub.

pub mod client;
pub mod control;
pub mod reporter;

pub use client::{HubClient, HubError};
pub use control::ControlChannel;
pub use reporter::EventReporter;
