// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use clap::Parser;

/// Goyais worker — claims executions from the Hub and runs the agentic loop.
///
/// All operational tuning comes from environment variables
/// (`WORKER_MAX_CONCURRENCY`, `WORKER_LEASE_SECONDS`, `HUB_BASE_URL`, …);
/// the flags here only cover what an operator wants to override ad hoc.
#[derive(Debug, Parser)]
#[command(name = "goyais-worker", version, about)]
pub struct Cli {
    /// Listen port for the worker HTTP surface (overrides $PORT).
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Verbose logging (debug level) unless RUST_LOG is set.
    #[arg(short, long)]
    pub verbose: bool,

    /// Serve the HTTP surface only; never claim executions.
    #[arg(long)]
    pub no_claim_loop: bool,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
