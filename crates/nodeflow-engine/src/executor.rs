use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use nodeflow_core::config::{AppConfig, EngineConfig, RevisitPolicy};
use nodeflow_core::error::{NodeflowError, Result};
use nodeflow_core::event::EventBus;
use nodeflow_core::traits::{AccessTokenSource, AutomationBridge, ModelClient};
use nodeflow_core::types::{EngineEvent, RunId};
use nodeflow_memory::MemoryWindow;
use nodeflow_tools::ToolRouter;

use crate::graph::{Graph, Node, NodeKind, NodeType};
use crate::handlers::{self, HandlerContext, ModelDefaults, NodeOutcome};
use crate::run_state::{ExecutionStep, RunState, RunStatus};

/// Single-instance workflow engine.
///
/// At most one run is active at a time; `run` called while another run is in
/// progress returns `None` without doing anything. `cancel` is observed
/// between node activations only, so an in-flight model or tool call always
/// completes first.
pub struct WorkflowEngine {
    model: Arc<dyn ModelClient>,
    router: ToolRouter,
    memory: MemoryWindow,
    event_bus: Arc<EventBus>,
    config: EngineConfig,
    defaults: ModelDefaults,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
    last_state: Mutex<Option<RunState>>,
}

/// How a traversal ended without a fatal error.
enum Traversal {
    Completed(Option<String>),
    Cancelled,
}

/// Clears the running flag when a run ends, including by panic or drop.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct WorkflowEngineBuilder {
    model: Arc<dyn ModelClient>,
    model_id: String,
    temperature: f32,
    bridge: Option<Arc<dyn AutomationBridge>>,
    tokens: Option<Arc<dyn AccessTokenSource>>,
    gcp_project: Option<String>,
    memory: MemoryWindow,
    event_bus: Option<Arc<EventBus>>,
    config: EngineConfig,
}

impl WorkflowEngineBuilder {
    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn bridge(mut self, bridge: Arc<dyn AutomationBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn tokens(mut self, tokens: Arc<dyn AccessTokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn gcp_project(mut self, project_id: Option<String>) -> Self {
        self.gcp_project = project_id;
        self
    }

    pub fn memory(mut self, memory: MemoryWindow) -> Self {
        self.memory = memory;
        self
    }

    pub fn event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Take model defaults and engine limits from an application config.
    pub fn app_config(self, app: &AppConfig) -> Self {
        self.model_id(app.model.model_id.clone())
            .temperature(app.model.temperature)
            .config(app.engine.clone())
            .gcp_project(app.gcp.as_ref().and_then(|g| g.project_id.clone()))
    }

    pub fn build(self) -> WorkflowEngine {
        let mut router = ToolRouter::new(self.model.clone(), self.model_id.clone())
            .with_gcp_project(self.gcp_project);
        if let Some(bridge) = self.bridge {
            router = router.with_bridge(bridge);
        }
        if let Some(tokens) = self.tokens {
            router = router.with_tokens(tokens);
        }

        WorkflowEngine {
            model: self.model,
            router,
            memory: self.memory,
            event_bus: self.event_bus.unwrap_or_default(),
            config: self.config,
            defaults: ModelDefaults {
                model_id: self.model_id,
                temperature: self.temperature,
            },
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            last_state: Mutex::new(None),
        }
    }
}

impl WorkflowEngine {
    pub fn builder(model: Arc<dyn ModelClient>) -> WorkflowEngineBuilder {
        WorkflowEngineBuilder {
            model,
            model_id: "gemini-2.5-flash".to_string(),
            temperature: 0.7,
            bridge: None,
            tokens: None,
            gcp_project: None,
            memory: MemoryWindow::stateless(),
            event_bus: None,
            config: EngineConfig::default(),
        }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn memory(&self) -> &MemoryWindow {
        &self.memory
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Request cancellation of the active run, if any.
    pub fn cancel(&self) {
        // The slot lock orders this against a run installing its token.
        let token = lock(&self.cancel);
        if self.is_running() {
            info!("Cancellation requested");
            token.cancel();
        }
    }

    /// Discard the last run's state. An active run is cancelled first.
    pub fn reset(&self) {
        self.cancel();
        *lock(&self.last_state) = None;
    }

    /// State of the most recent run, or `None` after `reset`.
    pub fn state(&self) -> Option<RunState> {
        lock(&self.last_state).clone()
    }

    /// Execute `graph` with `input`. Returns `None` if a run is already active.
    pub async fn run(&self, graph: &Graph, input: &str) -> Option<RunState> {
        // Claim the run and install its token under one lock, so a concurrent
        // `cancel` sees either no run or this run's token.
        let token = {
            let mut slot = lock(&self.cancel);
            if self
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                warn!("Run requested while another run is active, ignoring");
                return None;
            }
            let token = CancellationToken::new();
            *slot = token.clone();
            token
        };
        let _guard = RunningGuard(&self.running);

        let run_id = RunId::new();
        let mut state = RunState::start(run_id.clone());
        *lock(&self.last_state) = Some(state.clone());

        info!(run_id = %run_id, nodes = graph.nodes.len(), "Workflow run started");
        self.event_bus.publish(EngineEvent::RunStarted {
            run_id: run_id.clone(),
            input: input.to_string(),
        });

        match self.traverse(graph, input, &token, &mut state).await {
            Ok(Traversal::Completed(final_output)) => {
                state.final_output = final_output;
                state.finish(RunStatus::Completed);
                info!(run_id = %run_id, steps = state.steps.len(), "Workflow run completed");
                self.event_bus.publish(EngineEvent::RunCompleted {
                    run_id,
                    final_output: state.final_output.clone(),
                    steps: state.steps.len(),
                });
            }
            Ok(Traversal::Cancelled) => {
                state.cancel();
                info!(run_id = %run_id, steps = state.steps.len(), "Workflow run cancelled");
                self.event_bus.publish(EngineEvent::RunCancelled { run_id });
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Workflow run failed");
                state.fail(&e);
                self.event_bus.publish(EngineEvent::RunFailed {
                    run_id,
                    error: e.to_string(),
                });
            }
        }

        *lock(&self.last_state) = Some(state.clone());
        Some(state)
    }

    /// The worklist loop.
    async fn traverse(
        &self,
        graph: &Graph,
        input: &str,
        token: &CancellationToken,
        state: &mut RunState,
    ) -> Result<Traversal> {
        graph.validate()?;
        let entry = graph.entry_node()?;

        let ctx = HandlerContext {
            graph,
            model: &self.model,
            router: &self.router,
            memory: &self.memory,
            events: &self.event_bus,
            defaults: &self.defaults,
        };

        let mut worklist: VecDeque<(String, String)> = VecDeque::new();
        worklist.push_back((entry.id.clone(), input.to_string()));
        let mut executed: HashSet<String> = HashSet::new();
        let mut iterations = 0usize;
        // Under Skip every node runs at most once, so an acyclic graph larger
        // than the configured cap must still be allowed to finish.
        let limit = match self.config.revisit_policy {
            RevisitPolicy::Skip => self.config.max_iterations.max(graph.nodes.len()),
            RevisitPolicy::Allow => self.config.max_iterations,
        };
        let mut terminal: Option<String> = None;
        let mut terminal_output_node: Option<String> = None;
        let mut last_output: Option<String> = None;

        while let Some((node_id, node_input)) = worklist.pop_front() {
            if token.is_cancelled() {
                return Ok(Traversal::Cancelled);
            }
            if self.config.revisit_policy == RevisitPolicy::Skip && executed.contains(&node_id) {
                debug!(node_id = %node_id, "Node already executed in this run, skipping");
                continue;
            }

            iterations += 1;
            if iterations > limit {
                return Err(NodeflowError::RunLoopExceeded(limit));
            }

            let node = graph.node(&node_id)?;
            let outcome = self.activate(&ctx, node, &node_input, state).await?;
            executed.insert(node_id.clone());

            if outcome.next.is_empty() {
                if node.node_type() == NodeType::Output {
                    terminal_output_node = Some(outcome.output.clone());
                }
                terminal = Some(outcome.output.clone());
            }
            for child in &outcome.next {
                worklist.push_back((child.clone(), outcome.output.clone()));
            }
            last_output = Some(outcome.output);

            if self.config.yield_between_steps {
                tokio::task::yield_now().await;
            }
        }

        // Prefer an output node's result, then any branch end, then whatever ran last.
        Ok(Traversal::Completed(
            terminal_output_node.or(terminal).or(last_output),
        ))
    }

    /// Run one node's handler and record the step.
    async fn activate(
        &self,
        ctx: &HandlerContext<'_>,
        node: &Node,
        input: &str,
        state: &mut RunState,
    ) -> Result<NodeOutcome> {
        let node_type = node.node_type();
        debug!(node_id = %node.id, node_type = %node_type, "Activating node");
        self.event_bus.publish(EngineEvent::NodeStarted {
            node_id: node.id.clone(),
            node_type: node_type.to_string(),
        });

        let started = Instant::now();
        let start_time = Utc::now();
        let result = match &node.kind {
            NodeKind::Entry | NodeKind::Output | NodeKind::Memory(_) => {
                Ok(NodeOutcome::new(input, ctx.graph.flow_targets(&node.id)))
            }
            NodeKind::Agent(config) => handlers::agent::run(ctx, node, config, input).await,
            NodeKind::Classifier(config) => {
                handlers::classifier::run(ctx, node, config, input).await
            }
            NodeKind::Tool(config) => handlers::tool::run(ctx, node, config, input).await,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut step = ExecutionStep {
            node_id: node.id.clone(),
            node_type,
            input: input.to_string(),
            output: String::new(),
            start_time,
            end_time: Utc::now(),
            error: None,
        };

        match result {
            Ok(outcome) => {
                debug!(node_id = %node.id, elapsed_ms, next = outcome.next.len(), "Node completed");
                step.output = outcome.output.clone();
                state.record(step);
                self.event_bus.publish(EngineEvent::NodeCompleted {
                    node_id: node.id.clone(),
                    output: outcome.output.clone(),
                    elapsed_ms,
                });
                Ok(outcome)
            }
            Err(e) => {
                error!(node_id = %node.id, error = %e, "Node failed");
                step.error = Some(e.to_string());
                state.record(step);
                self.event_bus.publish(EngineEvent::NodeFailed {
                    node_id: node.id.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{AgentConfig, Edge};
    use nodeflow_test_utils::ScriptedModel;

    fn linear() -> Graph {
        Graph::new(
            vec![
                Node::new("in", NodeKind::Entry),
                Node::new("out", NodeKind::Output),
            ],
            vec![Edge::new("e1", "in", "out")],
        )
    }

    #[tokio::test]
    async fn test_pass_through_run() {
        let engine = WorkflowEngine::builder(Arc::new(ScriptedModel::new())).build();
        let state = engine.run(&linear(), "Hello").await.unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.final_output.as_deref(), Some("Hello"));
        assert_eq!(state.executed_node_ids, vec!["in", "out"]);
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_invalid_graph_fails_fast() {
        let engine = WorkflowEngine::builder(Arc::new(ScriptedModel::new())).build();
        let graph = Graph::new(vec![Node::new("out", NodeKind::Output)], vec![]);
        let state = engine.run(&graph, "x").await.unwrap();
        assert_eq!(state.status, RunStatus::Error);
        assert_eq!(state.error_kind.as_deref(), Some("GraphInvalid"));
        assert!(state.steps.is_empty());
    }

    #[tokio::test]
    async fn test_model_failure_is_fatal_and_recorded() {
        let model = ScriptedModel::new().then_err(NodeflowError::InvalidCredential("401".into()));
        let engine = WorkflowEngine::builder(Arc::new(model)).build();
        let graph = Graph::new(
            vec![
                Node::new("in", NodeKind::Entry),
                Node::new("agent", NodeKind::Agent(AgentConfig::default())),
                Node::new("out", NodeKind::Output),
            ],
            vec![Edge::new("e1", "in", "agent"), Edge::new("e2", "agent", "out")],
        );
        let state = engine.run(&graph, "hi").await.unwrap();
        assert_eq!(state.status, RunStatus::Error);
        assert_eq!(state.executed_node_ids, vec!["in", "agent"]);
        assert!(state.steps[1].error.is_some());
        assert_eq!(state.current_node_id.as_deref(), Some("agent"));
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let engine = WorkflowEngine::builder(Arc::new(ScriptedModel::new())).build();
        engine.run(&linear(), "Hello").await.unwrap();
        assert!(engine.state().is_some());
        engine.reset();
        assert!(engine.state().is_none());
    }

    #[tokio::test]
    async fn test_cancel_after_run_claimed_reaches_its_token() {
        let engine = WorkflowEngine::builder(Arc::new(ScriptedModel::new())).build();
        let stale = lock(&engine.cancel).clone();

        let graph = linear();
        let (state, _) = tokio::join!(engine.run(&graph, "Hello"), async { engine.cancel() });

        assert_eq!(state.unwrap().status, RunStatus::Idle);
        assert!(!stale.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_when_idle_does_not_affect_next_run() {
        let engine = WorkflowEngine::builder(Arc::new(ScriptedModel::new())).build();
        engine.cancel();
        let state = engine.run(&linear(), "Hello").await.unwrap();
        assert_eq!(state.status, RunStatus::Completed);
    }
}
