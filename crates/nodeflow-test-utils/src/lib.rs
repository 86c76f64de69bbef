//! Test doubles and fixtures shared by the nodeflow crates.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::{json, Value};

use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::traits::{AccessTokenSource, AutomationBridge, ModelClient};
use nodeflow_core::types::{AccessToken, FunctionCall, ModelRequest, ModelResponse};

// ── Models ──────────────────────────────────────────────────────

#[derive(Default)]
struct ScriptState {
    queue: VecDeque<Result<ModelResponse>>,
    fallback: Option<ModelResponse>,
    requests: Vec<ModelRequest>,
}

/// Model that replays queued responses in order and records every request.
///
/// Clones share the same script, so a test can keep a handle for
/// inspecting `requests()` after handing the model to the code under test.
/// Once the queue is empty it answers with the fallback response, or
/// `ModelError` when none is set.
#[derive(Clone, Default)]
pub struct ScriptedModel {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_response(self, response: ModelResponse) -> Self {
        self.push(Ok(response));
        self
    }

    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.then_response(ModelResponse::text(text))
    }

    pub fn then_calls(self, calls: Vec<(&str, Value)>) -> Self {
        let calls = calls
            .into_iter()
            .map(|(name, args)| FunctionCall {
                name: name.to_string(),
                args,
            })
            .collect();
        self.then_response(ModelResponse::with_calls(calls))
    }

    pub fn then_err(self, err: NodeflowError) -> Self {
        self.push(Err(err));
        self
    }

    /// Response returned whenever the queue is empty.
    pub fn with_default(self, text: impl Into<String>) -> Self {
        self.lock().fallback = Some(ModelResponse::text(text));
        self
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock().requests.clone()
    }

    fn push(&self, item: Result<ModelResponse>) {
        self.lock().queue.push_back(item);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ModelClient for ScriptedModel {
    fn generate(&self, request: ModelRequest) -> BoxFuture<'_, Result<ModelResponse>> {
        let result = {
            let mut state = self.lock();
            state.requests.push(request);
            match state.queue.pop_front() {
                Some(item) => item,
                None => state
                    .fallback
                    .clone()
                    .ok_or_else(|| NodeflowError::ModelError("script exhausted".into())),
            }
        };
        Box::pin(async move { result })
    }
}

/// Model without a credential: every call fails with `ModelUnavailable`.
pub struct FailingModel;

impl ModelClient for FailingModel {
    fn generate(&self, _request: ModelRequest) -> BoxFuture<'_, Result<ModelResponse>> {
        Box::pin(async { Err(NodeflowError::ModelUnavailable("no API key configured".into())) })
    }
}

// ── Bridge ──────────────────────────────────────────────────────

#[derive(Default)]
struct BridgeState {
    queue: VecDeque<Result<Value>>,
    calls: Vec<(String, Value)>,
}

/// Automation bridge that records calls and replays queued replies.
///
/// With an empty queue it answers `"pong"` to `ping` and `null` otherwise.
#[derive(Clone, Default)]
pub struct RecordingBridge {
    state: Arc<Mutex<BridgeState>>,
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_ok(self, data: Value) -> Self {
        self.lock().queue.push_back(Ok(data));
        self
    }

    pub fn then_err(self, err: NodeflowError) -> Self {
        self.lock().queue.push_back(Err(err));
        self
    }

    /// Every `(action, payload)` received, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AutomationBridge for RecordingBridge {
    fn call(&self, action: &str, payload: Value) -> BoxFuture<'_, Result<Value>> {
        let result = {
            let mut state = self.lock();
            state.calls.push((action.to_string(), payload));
            match state.queue.pop_front() {
                Some(item) => item,
                None if action == "ping" => Ok(json!("pong")),
                None => Ok(Value::Null),
            }
        };
        Box::pin(async move { result })
    }
}

// ── Tokens ──────────────────────────────────────────────────────

/// Token source that always returns the same token.
pub struct FixedTokens(pub AccessToken);

impl FixedTokens {
    pub fn new(token: AccessToken) -> Self {
        Self(token)
    }

    /// A non-expiring token carrying the `cloud-platform` scope.
    pub fn cloud_platform() -> Self {
        Self(AccessToken {
            token: "ya29.test-token".into(),
            scopes: vec!["https://www.googleapis.com/auth/cloud-platform".into()],
            expires_at: None,
        })
    }
}

impl AccessTokenSource for FixedTokens {
    fn access_token(&self) -> Option<AccessToken> {
        Some(self.0.clone())
    }
}

// ── Workflow fixtures ───────────────────────────────────────────
//
// Helpers build the workflow JSON document; tests deserialize it into a graph.

pub fn workflow(nodes: Vec<Value>, edges: Vec<Value>) -> Value {
    json!({ "nodes": nodes, "edges": edges })
}

fn node(id: &str, kind: &str, config: Value) -> Value {
    json!({
        "id": id,
        "type": kind,
        "position": { "x": 0.0, "y": 0.0 },
        "config": config
    })
}

pub fn entry_node(id: &str) -> Value {
    node(id, "entry", json!({}))
}

pub fn output_node(id: &str) -> Value {
    node(id, "output", json!({}))
}

pub fn agent_node(id: &str, system_instruction: &str) -> Value {
    node(
        id,
        "agent",
        json!({ "model": "gemini-2.5-flash", "systemInstruction": system_instruction, "temperature": 0.2 }),
    )
}

pub fn tool_node(id: &str, tool_type: &str, config: Value) -> Value {
    node(id, "tool", json!({ "toolType": tool_type, "config": config }))
}

pub fn classifier_node(id: &str, categories: &[&str]) -> Value {
    node(id, "classifier", json!({ "categories": categories, "examples": [] }))
}

pub fn memory_node(id: &str, storage_key: &str, max_messages: usize) -> Value {
    node(
        id,
        "memory",
        json!({ "storageKey": storage_key, "maxMessages": max_messages }),
    )
}

/// Plain edge from the source's default output.
pub fn edge(source: &str, target: &str) -> Value {
    json!({ "id": format!("{}-{}", source, target), "source": source, "target": target })
}

/// Edge leaving a named output port (e.g. a classifier category).
pub fn handle_edge(source: &str, handle: &str, target: &str) -> Value {
    json!({
        "id": format!("{}-{}-{}", source, handle, target),
        "source": source,
        "sourceHandle": handle,
        "target": target
    })
}

/// Edge into a named input port (e.g. an agent's `tools` or `memory` port).
pub fn port_edge(source: &str, target: &str, port: &str) -> Value {
    json!({
        "id": format!("{}-{}-{}", source, target, port),
        "source": source,
        "target": target,
        "targetHandle": port
    })
}
