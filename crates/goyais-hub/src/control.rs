// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Control-channel long-poll.
//!
//! One task per claimed execution keeps a long-poll open against the Hub's
//! control endpoint. `stop` commands flip the shared [`CancelFlag`]; a 404
//! with `EXECUTION_NOT_FOUND` means the Hub garbage-collected the run, which
//! also cancels it and ends the poll. Any other failure is logged, backed
//! off 500 ms, and retried — the channel must outlive transient Hub hiccups.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use goyais_core::CancelFlag;

use crate::client::HubClient;

const WAIT_MS: u64 = 2_000;
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

pub struct ControlChannel {
    handle: JoinHandle<()>,
}

impl ControlChannel {
    /// Start polling for the given execution. The flag is shared with the
    /// engine, which observes cancellation at its next boundary.
    pub fn start(
        hub: Arc<HubClient>,
        execution_id: String,
        trace_id: String,
        cancel: CancelFlag,
    ) -> Self {
        let handle = tokio::spawn(poll_loop(hub, execution_id, trace_id, cancel));
        Self { handle }
    }

    /// Stop the poll task. Safe to call after the task already ended.
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

async fn poll_loop(hub: Arc<HubClient>, execution_id: String, trace_id: String, cancel: CancelFlag) {
    let mut after_seq: u64 = 0;
    loop {
        let response = match hub
            .poll_control(&execution_id, &trace_id, after_seq, WAIT_MS)
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_execution_not_found() => {
                info!(
                    execution_id,
                    "control poll closed: execution no longer exists"
                );
                cancel.cancel();
                return;
            }
            Err(e) => {
                warn!(execution_id, "control poll failed: {e}");
                tokio::time::sleep(ERROR_BACKOFF).await;
                continue;
            }
        };

        let last_seq = response
            .get("last_seq")
            .and_then(Value::as_u64)
            .unwrap_or(after_seq);
        if last_seq > after_seq {
            after_seq = last_seq;
        }

        let Some(commands) = response.get("commands").and_then(Value::as_array) else {
            continue;
        };
        for command in commands {
            let command_type = command
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_lowercase();
            if command_type == "stop" {
                info!(execution_id, "stop command received");
                cancel.cancel();
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
