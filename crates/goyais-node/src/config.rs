// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use uuid::Uuid;

/// Worker identity and tunables, resolved once at startup.
///
/// Everything comes from the environment; every numeric knob has a clamped,
/// production-safe default. No state persists across restarts — a fresh
/// worker id is minted whenever `WORKER_ID` is absent.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub max_concurrency: usize,
    pub lease_seconds: u64,
    pub claim_interval: Duration,
    pub heartbeat_interval: Duration,
    /// `vanilla` or `langgraph` (which falls back to vanilla with a notice).
    pub runtime: String,
    pub disable_claim_loop: bool,
    pub port: u16,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        let worker_id = env_string("WORKER_ID")
            .unwrap_or_else(|| format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]));
        Self {
            worker_id,
            max_concurrency: env_parse("WORKER_MAX_CONCURRENCY", 3).max(1) as usize,
            lease_seconds: env_parse("WORKER_LEASE_SECONDS", 30).max(10),
            claim_interval: Duration::from_millis(
                env_parse("WORKER_CLAIM_INTERVAL_MS", 500).max(100),
            ),
            heartbeat_interval: Duration::from_secs(
                env_parse("WORKER_HEARTBEAT_SECONDS", 10).max(3),
            ),
            runtime: env_string("WORKER_RUNTIME")
                .unwrap_or_else(|| "vanilla".to_string())
                .to_lowercase(),
            disable_claim_loop: env_flag("WORKER_DISABLE_CLAIM_LOOP"),
            port: env_parse("PORT", 8788) as u16,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]),
            max_concurrency: 3,
            lease_seconds: 30,
            claim_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(10),
            runtime: "vanilla".to_string(),
            disable_claim_loop: false,
            port: 8788,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse(name: &str, default: u64) -> u64 {
    env_string(name)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_flag(name: &str) -> bool {
    env_string(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
