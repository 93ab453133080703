// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! End-to-end claim-loop test against a fake Hub and a scripted model.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use goyais_core::resolve_runtime;
use goyais_hub::HubClient;
use goyais_model::{ModelTurnResult, ScriptedTurnDriver, ToolCall};
use goyais_node::{ClaimLoopService, WorkerConfig};

#[derive(Clone, Default)]
struct FakeHub {
    registered: Arc<AtomicBool>,
    heartbeats: Arc<AtomicBool>,
    claim_served: Arc<AtomicBool>,
    events: Arc<Mutex<Vec<Value>>>,
    envelope: Arc<Mutex<Value>>,
}

async fn serve_hub(state: FakeHub) -> String {
    async fn register(State(state): State<FakeHub>, Json(body): Json<Value>) -> Json<Value> {
        assert_eq!(body["capabilities"]["runtime"], "vanilla");
        state.registered.store(true, Ordering::SeqCst);
        Json(json!({"registered": true}))
    }

    async fn heartbeat(State(state): State<FakeHub>, Path(_id): Path<String>) -> Json<Value> {
        state.heartbeats.store(true, Ordering::SeqCst);
        Json(json!({}))
    }

    async fn claim(State(state): State<FakeHub>) -> Json<Value> {
        if state.claim_served.swap(true, Ordering::SeqCst) {
            return Json(json!({"claimed": false}));
        }
        let envelope = state.envelope.lock().unwrap().clone();
        Json(json!({"claimed": true, "execution": envelope}))
    }

    async fn events_batch(
        State(state): State<FakeHub>,
        Path(_id): Path<String>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let events = body["events"].as_array().cloned().unwrap_or_default();
        state.events.lock().unwrap().extend(events);
        Json(json!({"accepted": true}))
    }

    async fn control(Path(_id): Path<String>) -> Json<Value> {
        Json(json!({"last_seq": 0, "commands": []}))
    }

    let router = Router::new()
        .route("/internal/workers/register", post(register))
        .route("/internal/workers/:id/heartbeat", post(heartbeat))
        .route("/internal/executions/claim", post(claim))
        .route("/internal/executions/:id/events/batch", post(events_batch))
        .route("/internal/executions/:id/control", get(control))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn claims_one_execution_and_streams_ordered_events() {
    let project = tempfile::tempdir().unwrap();
    std::fs::write(project.path().join("README.md"), "# demo project").unwrap();

    let fake = FakeHub::default();
    *fake.envelope.lock().unwrap() = json!({
        "execution_id": "exec-e2e",
        "conversation_id": "conv-e2e",
        "queue_index": 0,
        "mode_snapshot": "agent",
        "model_id": "llama3:8b",
        "content": "read readme",
        "project_path": project.path().to_str().unwrap(),
        "project_is_git": false,
    });
    let base = serve_hub(fake.clone()).await;

    let driver = Arc::new(ScriptedTurnDriver::new(vec![
        Ok(ModelTurnResult::with_tool_calls(
            "",
            vec![ToolCall {
                id: "c1".into(),
                name: "read_file".into(),
                arguments: json!({"path": "README.md"}),
            }],
        )),
        Ok(ModelTurnResult::text_only("done")),
    ]));

    let config = WorkerConfig {
        worker_id: "worker-e2e".into(),
        max_concurrency: 2,
        lease_seconds: 30,
        claim_interval: Duration::from_millis(100),
        heartbeat_interval: Duration::from_secs(3),
        runtime: "vanilla".into(),
        disable_claim_loop: false,
        port: 0,
    };
    let service = ClaimLoopService::new(
        Arc::new(HubClient::new(base, "test-token")),
        config,
        resolve_runtime("vanilla"),
        driver,
    );

    let shutdown = CancellationToken::new();
    let loop_shutdown = shutdown.clone();
    let loop_task = tokio::spawn(async move {
        // `run` consumes self by reference; keep the service alive inside.
        service.run(loop_shutdown).await;
    });

    // Wait for the terminal event to arrive at the fake hub.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        {
            let events = fake.events.lock().unwrap();
            if events.iter().any(|e| e["type"] == "execution_done") {
                break;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "terminal event never arrived"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    shutdown.cancel();
    loop_task.await.unwrap();

    assert!(fake.registered.load(Ordering::SeqCst));
    assert!(fake.heartbeats.load(Ordering::SeqCst));

    let events = fake.events.lock().unwrap().clone();
    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(
        types,
        vec![
            "execution_started",
            "thinking_delta", // model_call 1
            "tool_call",
            "tool_result",
            "thinking_delta", // model_call 2
            "thinking_delta", // assistant_output 2
            "execution_done",
        ]
    );

    // Sequences are the contiguous prefix 1..=N and the terminal event
    // carries the maximum.
    let sequences: Vec<u64> = events
        .iter()
        .map(|e| e["sequence"].as_u64().unwrap())
        .collect();
    assert_eq!(sequences, (1..=events.len() as u64).collect::<Vec<_>>());
    assert_eq!(events.last().unwrap()["type"], "execution_done");

    // Every event belongs to the claimed execution and no event follows
    // the terminal one.
    for event in &events {
        assert_eq!(event["execution_id"], "exec-e2e");
        assert_eq!(event["conversation_id"], "conv-e2e");
    }
    let done = events.last().unwrap();
    assert_eq!(done["payload"]["content"], "done");
    assert_eq!(done["payload"]["turns"], 2);
}

#[tokio::test]
async fn empty_claims_keep_the_loop_alive() {
    let fake = FakeHub {
        claim_served: Arc::new(AtomicBool::new(true)), // always claimed:false
        ..FakeHub::default()
    };
    let base = serve_hub(fake.clone()).await;

    let config = WorkerConfig {
        worker_id: "worker-idle".into(),
        claim_interval: Duration::from_millis(50),
        ..WorkerConfig::default()
    };
    let service = ClaimLoopService::new(
        Arc::new(HubClient::new(base, "t")),
        config,
        resolve_runtime("vanilla"),
        Arc::new(ScriptedTurnDriver::new(vec![])),
    );

    let shutdown = CancellationToken::new();
    let loop_shutdown = shutdown.clone();
    let task = tokio::spawn(async move { service.run(loop_shutdown).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(fake.registered.load(Ordering::SeqCst));
    assert!(fake.events.lock().unwrap().is_empty());

    shutdown.cancel();
    task.await.unwrap();
}
