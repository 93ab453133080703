// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
/// End-to-end engine scenarios over the scripted turn driver: the behavior
/// contract a Hub operator relies on, without any network or real model.
use std::sync::Arc;

use serde_json::json;

use goyais_core::{run_execution, CancelFlag, ExecutionEnvelope, RecordingSink};
use goyais_model::{ModelTurnResult, ScriptedTurnDriver, TokenUsage, ToolCall};

fn agent_envelope(content: &str, workdir: &str) -> ExecutionEnvelope {
    let mut envelope = ExecutionEnvelope {
        execution_id: "exec-it".into(),
        conversation_id: "conv-it".into(),
        mode_snapshot: "agent".into(),
        model_id: "llama3:8b".into(),
        content: content.into(),
        ..ExecutionEnvelope::default()
    };
    envelope.working_directory = workdir.into();
    envelope.normalize();
    envelope
}

#[tokio::test]
async fn happy_read_scenario() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("README.md"), "# hello").unwrap();

    let mut first_turn = ModelTurnResult::with_tool_calls(
        "",
        vec![ToolCall {
            id: "call_1".into(),
            name: "read_file".into(),
            arguments: json!({"path": "README.md"}),
        }],
    );
    first_turn.usage = TokenUsage::new(100, 10, 0);
    let mut second_turn = ModelTurnResult::text_only("done");
    second_turn.usage = TokenUsage::new(120, 5, 0);

    let driver = Arc::new(ScriptedTurnDriver::new(vec![Ok(first_turn), Ok(second_turn)]));
    let sink = RecordingSink::new();
    let envelope = agent_envelope("read readme", dir.path().to_str().unwrap());
    run_execution(&envelope, &sink, &CancelFlag::new(), driver).await;

    let events = sink.events();
    let summary: Vec<(String, String)> = events
        .iter()
        .map(|(t, p)| {
            let stage = p
                .get("stage")
                .and_then(|s| s.as_str())
                .unwrap_or("")
                .to_string();
            (t.clone(), stage)
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            ("execution_started".into(), "".into()),
            ("thinking_delta".into(), "model_call".into()),
            ("tool_call".into(), "".into()),
            ("tool_result".into(), "".into()),
            ("thinking_delta".into(), "model_call".into()),
            ("thinking_delta".into(), "assistant_output".into()),
            ("execution_done".into(), "".into()),
        ]
    );

    let (_, tool_call) = &events[2];
    assert_eq!(tool_call["name"], "read_file");
    assert_eq!(tool_call["risk_level"], "low");
    let (_, tool_result) = &events[3];
    assert_eq!(tool_result["ok"], true);

    let (_, done) = events.last().unwrap();
    assert_eq!(done["content"], "done");
    assert_eq!(done["turns"], 2);
    assert_eq!(done["usage"]["input_tokens"], 220);
    assert_eq!(done["usage"]["total_tokens"], 235);
}

#[tokio::test]
async fn plan_mode_tool_rejection_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(ScriptedTurnDriver::new(vec![Ok(
        ModelTurnResult::with_tool_calls(
            "",
            vec![ToolCall {
                id: "c1".into(),
                name: "run_command".into(),
                arguments: json!({"command": "python scripts/sync.py"}),
            }],
        ),
    )]));
    let sink = RecordingSink::new();
    let mut envelope = agent_envelope("refactor", dir.path().to_str().unwrap());
    envelope.mode_snapshot = "plan".into();
    run_execution(&envelope, &sink, &CancelFlag::new(), driver).await;

    assert_eq!(
        sink.event_types(),
        vec!["execution_started", "thinking_delta", "execution_error"]
    );
    let error = sink.first_payload("execution_error").unwrap();
    assert_eq!(error["reason"], "PLAN_MODE_REJECTED");
    assert_eq!(error["tool_name"], "run_command");
    assert_eq!(error["risk_level"], "high");
}

#[tokio::test]
async fn turn_cap_truncation_scenario() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("README.md"), "# hello").unwrap();

    let mut scripts: Vec<Result<ModelTurnResult, goyais_model::AdapterError>> = (0..4)
        .map(|i| {
            Ok(ModelTurnResult::with_tool_calls(
                "",
                vec![ToolCall {
                    id: format!("c{i}"),
                    name: "read_file".into(),
                    arguments: json!({"path": "README.md"}),
                }],
            ))
        })
        .collect();
    scripts.push(Ok(ModelTurnResult::text_only("summary")));
    let driver = Arc::new(ScriptedTurnDriver::new(scripts));

    let sink = RecordingSink::new();
    let mut envelope = agent_envelope("keep reading", dir.path().to_str().unwrap());
    envelope.agent_config_snapshot.max_model_turns = Some(4);
    run_execution(&envelope, &sink, &CancelFlag::new(), driver.clone()).await;

    // 4 loop iterations of (model_call, tool_call, tool_result) …
    let tool_calls = sink
        .events()
        .iter()
        .filter(|(t, _)| t == "tool_call")
        .count();
    assert_eq!(tool_calls, 4);
    // … then the limit notice and a 5th, tool-free model call.
    let model_calls = sink
        .events()
        .iter()
        .filter(|(t, p)| t == "thinking_delta" && p["stage"] == "model_call")
        .count();
    assert_eq!(model_calls, 5);
    assert!(sink
        .events()
        .iter()
        .any(|(t, p)| t == "thinking_delta" && p["stage"] == "turn_limit_reached"));

    let done = sink.last_payload("execution_done").unwrap();
    assert_eq!(done["truncated"], true);
    assert_eq!(done["reason"], "MAX_TURNS_REACHED");
    assert_eq!(done["max_turns"], 4);
    assert_eq!(done["turns"], 4);
    assert_eq!(done["content"], "summary");

    // The summary turn advertised an empty tool set.
    assert_eq!(driver.recorded().last().unwrap().tool_count, 0);
}

#[tokio::test]
async fn no_events_follow_the_terminal_event() {
    let dir = tempfile::tempdir().unwrap();
    let driver = Arc::new(ScriptedTurnDriver::new(vec![Ok(
        ModelTurnResult::text_only("finished"),
    )]));
    let sink = RecordingSink::new();
    let envelope = agent_envelope("say hi", dir.path().to_str().unwrap());
    run_execution(&envelope, &sink, &CancelFlag::new(), driver).await;

    let types = sink.event_types();
    let terminal_pos = types
        .iter()
        .position(|t| t == "execution_done" || t == "execution_error" || t == "execution_stopped")
        .expect("a terminal event");
    assert_eq!(terminal_pos, types.len() - 1);
}

#[tokio::test]
async fn every_tool_call_gets_exactly_one_result() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "a").unwrap();

    let calls = vec![
        ToolCall {
            id: "c1".into(),
            name: "read_file".into(),
            arguments: json!({"path": "a.txt"}),
        },
        ToolCall {
            id: "c2".into(),
            name: "read_file".into(),
            arguments: json!({"path": "missing.txt"}),
        },
        ToolCall {
            id: "c3".into(),
            name: "run_subagent".into(),
            arguments: json!({"task": "check something"}),
        },
    ];
    let driver = Arc::new(ScriptedTurnDriver::new(vec![
        Ok(ModelTurnResult::with_tool_calls("", calls)),
        Ok(ModelTurnResult::text_only("sub result")),
        Ok(ModelTurnResult::text_only("done")),
    ]));
    let sink = RecordingSink::new();
    let envelope = agent_envelope("do things", dir.path().to_str().unwrap());
    run_execution(&envelope, &sink, &CancelFlag::new(), driver).await;

    let events = sink.events();
    let call_ids: Vec<String> = events
        .iter()
        .filter(|(t, _)| t == "tool_call")
        .map(|(_, p)| p["call_id"].as_str().unwrap().to_string())
        .collect();
    let result_ids: Vec<String> = events
        .iter()
        .filter(|(t, _)| t == "tool_result")
        .map(|(_, p)| p["call_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(call_ids, vec!["c1", "c2", "c3"]);
    // Synchronous results in submission order; the subagent result follows.
    assert_eq!(result_ids, vec!["c1", "c2", "c3"]);
}

#[tokio::test]
async fn guard_properties_hold_under_engine_load() {
    // Path guard: any `..` escape is rejected.
    let dir = tempfile::tempdir().unwrap();
    for path in ["../x", "a/../../y", "../../../../etc/shadow"] {
        assert!(
            goyais_safety::resolve_guarded_path(dir.path(), path).is_err(),
            "path should escape: {path}"
        );
    }

    // Command guard: the head of an accepted argv is always allowlisted.
    for command in ["pwd", "ls -la", "cat x", "rg pattern .", "git status"] {
        let argv = goyais_safety::ensure_safe_command(command).unwrap();
        assert!(["pwd", "ls", "cat", "rg", "git"].contains(&argv[0].as_str()));
    }

    // Risk classifier: destructive phrases always classify critical.
    for content in ["please delete it", " rm -rf the dir", "DROP TABLE a", "x delete y"] {
        assert_eq!(
            goyais_safety::classify_content_risk(content),
            goyais_safety::RiskLevel::Critical,
            "content: {content}"
        );
    }
}
