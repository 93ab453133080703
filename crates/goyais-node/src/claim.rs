// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The claim/lease loop.
//!
//! Startup registers the worker with the Hub and starts a heartbeat task.
//! The main loop claims executions while the active set is below the
//! concurrency cap and runs each one in its own task:
//!
//! 1. prepare a worktree lane,
//! 2. start the event reporter and control channel,
//! 3. run the selected runtime to its terminal event,
//! 4. stop the channel, drain the reporter, clean the lane.
//!
//! Transient Hub failures are logged and retried after the claim interval.
//! Lease renewal is deliberately absent — the Hub tracks expiry and may
//! reassign.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use goyais_core::{CancelFlag, ExecutionEnvelope, ExecutionRuntime};
use goyais_hub::reporter::EventIdentity;
use goyais_hub::{ControlChannel, EventReporter, HubClient};
use goyais_model::TurnDriver;
use goyais_worktree::WorktreeManager;

use crate::config::WorkerConfig;

pub struct ClaimLoopService {
    hub: Arc<HubClient>,
    config: WorkerConfig,
    runtime: Arc<dyn ExecutionRuntime>,
    driver: Arc<dyn TurnDriver>,
    worktree: Arc<WorktreeManager>,
}

impl ClaimLoopService {
    pub fn new(
        hub: Arc<HubClient>,
        config: WorkerConfig,
        runtime: Arc<dyn ExecutionRuntime>,
        driver: Arc<dyn TurnDriver>,
    ) -> Self {
        Self {
            hub,
            config,
            runtime,
            driver,
            worktree: Arc::new(WorktreeManager::new()),
        }
    }

    /// Drive the loop until `shutdown` fires, then cancel and await all
    /// in-flight executions.
    pub async fn run(&self, shutdown: CancellationToken) {
        if let Err(e) = self
            .hub
            .register_worker(
                &self.config.worker_id,
                json!({
                    "runtime": self.config.runtime,
                    "max_concurrency": self.config.max_concurrency,
                }),
            )
            .await
        {
            warn!(worker_id = %self.config.worker_id, "worker register failed: {e}");
        } else {
            info!(
                worker_id = %self.config.worker_id,
                max_concurrency = self.config.max_concurrency,
                "worker registered"
            );
        }

        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&self.hub),
            self.config.worker_id.clone(),
            self.config.heartbeat_interval,
            shutdown.clone(),
        ));

        let mut active: JoinSet<()> = JoinSet::new();
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            // Reap finished executions so the set reflects live tasks only.
            while active.try_join_next().is_some() {}

            if active.len() >= self.config.max_concurrency {
                if sleep_or_shutdown(self.config.claim_interval, &shutdown).await {
                    break;
                }
                continue;
            }

            let response = match self
                .hub
                .claim_execution(&self.config.worker_id, self.config.lease_seconds)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!("execution claim failed: {e}");
                    if sleep_or_shutdown(self.config.claim_interval, &shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            let claimed = response
                .get("claimed")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let envelope = response
                .get("execution")
                .and_then(ExecutionEnvelope::from_claim);
            let Some(envelope) = envelope.filter(|_| claimed) else {
                if sleep_or_shutdown(self.config.claim_interval, &shutdown).await {
                    break;
                }
                continue;
            };

            info!(execution_id = %envelope.execution_id, "execution claimed");
            let hub = Arc::clone(&self.hub);
            let runtime = Arc::clone(&self.runtime);
            let driver = Arc::clone(&self.driver);
            let worktree = Arc::clone(&self.worktree);
            active.spawn(run_claimed_execution(
                hub, runtime, driver, worktree, envelope,
            ));
        }

        heartbeat.abort();
        let _ = heartbeat.await;
        // Cancel in-flight executions and await their teardown.
        active.shutdown().await;
    }
}

async fn heartbeat_loop(
    hub: Arc<HubClient>,
    worker_id: String,
    interval: std::time::Duration,
    shutdown: CancellationToken,
) {
    loop {
        if let Err(e) = hub.heartbeat(&worker_id, "active").await {
            warn!(worker_id, "worker heartbeat failed: {e}");
        }
        if sleep_or_shutdown(interval, &shutdown).await {
            return;
        }
    }
}

/// Sleep for `duration`; returns `true` when shutdown fired instead.
async fn sleep_or_shutdown(duration: std::time::Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.cancelled() => true,
    }
}

async fn run_claimed_execution(
    hub: Arc<HubClient>,
    runtime: Arc<dyn ExecutionRuntime>,
    driver: Arc<dyn TurnDriver>,
    worktree: Arc<WorktreeManager>,
    mut envelope: ExecutionEnvelope,
) {
    let lane = worktree
        .prepare(
            &envelope.execution_id,
            &envelope.project_path,
            envelope.project_is_git,
        )
        .await;
    envelope.working_directory = lane.path.display().to_string();

    let cancel = CancelFlag::new();
    let control = ControlChannel::start(
        Arc::clone(&hub),
        envelope.execution_id.clone(),
        envelope.trace_id.clone(),
        cancel.clone(),
    );
    let reporter = EventReporter::start(
        Arc::clone(&hub),
        EventIdentity {
            execution_id: envelope.execution_id.clone(),
            conversation_id: envelope.conversation_id.clone(),
            trace_id: envelope.trace_id.clone(),
            queue_index: envelope.queue_index,
        },
    );

    runtime.run(&envelope, &reporter, &cancel, driver).await;

    control.stop().await;
    reporter.stop().await;
    worktree
        .cleanup(&lane, &envelope.project_path, envelope.project_is_git)
        .await;
    info!(execution_id = %envelope.execution_id, "execution finished");
}
