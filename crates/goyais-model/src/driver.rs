// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::AdapterError;
use crate::invocation::ModelInvocation;
use crate::types::{ModelTurnResult, ToolSpec, TurnMessage};

/// The seam between the execution engine / subagent pool and the vendor
/// transports. Production code uses [`LiveTurnDriver`]; tests script turns
/// through [`ScriptedTurnDriver`] without touching the network.
#[async_trait]
pub trait TurnDriver: Send + Sync {
    async fn run_turn(
        &self,
        invocation: &ModelInvocation,
        messages: &[TurnMessage],
        tools: &[ToolSpec],
    ) -> Result<ModelTurnResult, AdapterError>;
}

/// Dispatches each turn to the transport for the invocation's vendor.
#[derive(Debug, Default)]
pub struct LiveTurnDriver;

#[async_trait]
impl TurnDriver for LiveTurnDriver {
    async fn run_turn(
        &self,
        invocation: &ModelInvocation,
        messages: &[TurnMessage],
        tools: &[ToolSpec],
    ) -> Result<ModelTurnResult, AdapterError> {
        crate::run_model_turn(invocation, messages, tools).await
    }
}

/// What a scripted driver saw for one `run_turn` call.
#[derive(Debug, Clone)]
pub struct RecordedTurn {
    pub message_count: usize,
    pub tool_count: usize,
    /// Text of the last user message, for asserting nudges.
    pub last_user_text: String,
}

/// Pre-scripted turn driver. Each call pops the next result from the front
/// of the queue, so tests can specify exact turn sequences — including tool
/// calls and adapter failures — without network access.
pub struct ScriptedTurnDriver {
    scripts: Mutex<VecDeque<Result<ModelTurnResult, AdapterError>>>,
    recorded: Mutex<Vec<RecordedTurn>>,
}

impl ScriptedTurnDriver {
    pub fn new(scripts: Vec<Result<ModelTurnResult, AdapterError>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// The calls observed so far, in order.
    pub fn recorded(&self) -> Vec<RecordedTurn> {
        self.recorded.lock().expect("recorder poisoned").clone()
    }

    /// Number of turns still scripted.
    pub fn remaining(&self) -> usize {
        self.scripts.lock().expect("scripts poisoned").len()
    }
}

#[async_trait]
impl TurnDriver for ScriptedTurnDriver {
    async fn run_turn(
        &self,
        _invocation: &ModelInvocation,
        messages: &[TurnMessage],
        tools: &[ToolSpec],
    ) -> Result<ModelTurnResult, AdapterError> {
        let last_user_text = messages
            .iter()
            .rev()
            .find_map(|m| match m {
                TurnMessage::User { content } => Some(content.clone()),
                _ => None,
            })
            .unwrap_or_default();
        self.recorded
            .lock()
            .expect("recorder poisoned")
            .push(RecordedTurn {
                message_count: messages.len(),
                tool_count: tools.len(),
                last_user_text,
            });

        self.scripts
            .lock()
            .expect("scripts poisoned")
            .pop_front()
            .unwrap_or_else(|| {
                Err(AdapterError::EmptyResponse(
                    "scripted driver has no more turns".into(),
                ))
            })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
