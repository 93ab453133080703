// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Ordered event reporter.
//!
//! Every event of one execution is stamped with a monotonic sequence and
//! buffered in a bounded ring (capacity 1000, drop-oldest). A background
//! flusher drains the ring every 100 ms — or immediately once 50 events pile
//! up — and POSTs the batch to the Hub. A failed batch is pushed back to the
//! *front* of the ring so relative order survives retries; under sustained
//! overflow the oldest events are sacrificed, never the newest. The Hub
//! dedupes by `event_id`, and the terminal event always carries the
//! authoritative outcome.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use goyais_core::{event_type, EventSink, OutboundEvent};

use crate::client::HubClient;

const RING_BUFFER_MAX: usize = 1_000;
const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
const FLUSH_KICK_DEPTH: usize = 50;
const STOP_DRAIN_ROUNDS: usize = 2;

/// Identity stamped onto every event of one execution.
#[derive(Debug, Clone)]
pub struct EventIdentity {
    pub execution_id: String,
    pub conversation_id: String,
    pub trace_id: String,
    pub queue_index: i64,
}

#[derive(Debug, Default)]
struct ReporterState {
    sequence: u64,
    buffer: VecDeque<OutboundEvent>,
    terminal_seen: bool,
}

struct ReporterInner {
    hub: Arc<HubClient>,
    identity: EventIdentity,
    state: Mutex<ReporterState>,
    kick: Notify,
}

/// Per-execution reporter with a background flusher.
pub struct EventReporter {
    inner: Arc<ReporterInner>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl EventReporter {
    /// Create the reporter and start its flush loop.
    pub fn start(hub: Arc<HubClient>, identity: EventIdentity) -> Self {
        let inner = Arc::new(ReporterInner {
            hub,
            identity,
            state: Mutex::new(ReporterState::default()),
            kick: Notify::new(),
        });

        let flush_inner = Arc::clone(&inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = flush_inner.kick.notified() => {}
                }
                flush_once(&flush_inner).await;
            }
        });

        Self {
            inner,
            flusher: Mutex::new(Some(handle)),
        }
    }

    /// Stamp and enqueue one event. Returns the stamped event, or `None`
    /// when the stream already ended with a terminal event.
    pub fn report(&self, event_type_name: &str, payload: Value) -> Option<OutboundEvent> {
        let (event, depth) = {
            let mut state = self.inner.state.lock().expect("reporter state poisoned");
            if state.terminal_seen {
                warn!(
                    execution_id = %self.inner.identity.execution_id,
                    event_type = event_type_name,
                    "dropping event after terminal event"
                );
                return None;
            }
            state.sequence += 1;
            let event = OutboundEvent {
                event_id: format!(
                    "evt_{}_{}",
                    self.inner.identity.execution_id, state.sequence
                ),
                execution_id: self.inner.identity.execution_id.clone(),
                conversation_id: self.inner.identity.conversation_id.clone(),
                trace_id: self.inner.identity.trace_id.clone(),
                sequence: state.sequence,
                queue_index: self.inner.identity.queue_index,
                event_type: event_type_name.to_string(),
                timestamp: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                payload,
            };
            if event_type::is_terminal(event_type_name) {
                state.terminal_seen = true;
            }
            push_bounded(&mut state.buffer, event.clone());
            (event, state.buffer.len())
        };

        if depth >= FLUSH_KICK_DEPTH {
            self.inner.kick.notify_one();
        }
        Some(event)
    }

    /// Current sequence counter (the highest stamped sequence).
    pub fn sequence(&self) -> u64 {
        self.inner.state.lock().expect("reporter state poisoned").sequence
    }

    /// Stop the flusher and drain what is left, retrying a bounded number
    /// of rounds. Unsendable events are dropped — the Hub owns the truth.
    pub async fn stop(&self) {
        let handle = self.flusher.lock().expect("flusher handle poisoned").take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        for _ in 0..STOP_DRAIN_ROUNDS {
            if self.inner.state.lock().expect("reporter state poisoned").buffer.is_empty() {
                return;
            }
            flush_once(&self.inner).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[async_trait]
impl EventSink for EventReporter {
    async fn emit(&self, event_type: &str, payload: Value) {
        let _ = self.report(event_type, payload);
    }
}

/// Drain the buffer atomically and POST the batch; on failure, put the batch
/// back at the front so ordering is preserved for the next attempt.
async fn flush_once(inner: &Arc<ReporterInner>) {
    let batch: Vec<OutboundEvent> = {
        let mut state = inner.state.lock().expect("reporter state poisoned");
        if state.buffer.is_empty() {
            return;
        }
        state.buffer.drain(..).collect()
    };

    debug!(
        execution_id = %inner.identity.execution_id,
        count = batch.len(),
        "flushing event batch"
    );
    let result = inner
        .hub
        .send_events_batch(
            &inner.identity.execution_id,
            &inner.identity.trace_id,
            &batch,
        )
        .await;

    if let Err(e) = result {
        warn!(
            execution_id = %inner.identity.execution_id,
            "event batch send failed: {e}"
        );
        let mut state = inner.state.lock().expect("reporter state poisoned");
        for event in batch.into_iter().rev() {
            state.buffer.push_front(event);
        }
        // Ring policy: overflow drops the oldest.
        while state.buffer.len() > RING_BUFFER_MAX {
            state.buffer.pop_front();
        }
    }
}

fn push_bounded(buffer: &mut VecDeque<OutboundEvent>, event: OutboundEvent) {
    if buffer.len() >= RING_BUFFER_MAX {
        buffer.pop_front();
    }
    buffer.push_back(event);
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
