use std::sync::Arc;

use nodeflow_core::config::{EngineConfig, RevisitPolicy};
use nodeflow_core::types::EngineEvent;
use nodeflow_engine::{Graph, RunStatus, WorkflowEngine};
use nodeflow_test_utils::{agent_node, edge, entry_node, output_node, workflow, ScriptedModel};

fn engine(model: &ScriptedModel) -> WorkflowEngine {
    WorkflowEngine::builder(Arc::new(model.clone())).build()
}

#[tokio::test]
async fn test_entry_agent_output_scenario() {
    let model = ScriptedModel::new().then_text("T");
    let graph = Graph::from_value(workflow(
        vec![
            entry_node("entry"),
            agent_node("agent", "You are helpful."),
            output_node("output"),
        ],
        vec![edge("entry", "agent"), edge("agent", "output")],
    ))
    .unwrap();

    let state = engine(&model).run(&graph, "Hello").await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.final_output.as_deref(), Some("T"));
    assert_eq!(state.executed_node_ids, vec!["entry", "agent", "output"]);
    assert_eq!(state.steps.len(), 3);
    assert_eq!(state.steps[1].input, "Hello");
    assert_eq!(state.steps[1].output, "T");

    let requests = model.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].last_prompt(), Some("Hello"));
    assert_eq!(requests[0].system_instruction.as_deref(), Some("You are helpful."));
    assert!(requests[0].function_declarations.is_empty());
    assert!(requests[0].native_capabilities.is_empty());
}

#[tokio::test]
async fn test_worklist_is_fifo_across_branches() {
    let graph = Graph::from_value(workflow(
        vec![
            entry_node("in"),
            output_node("x"),
            output_node("y"),
            output_node("z"),
        ],
        vec![edge("in", "x"), edge("in", "y"), edge("x", "z")],
    ))
    .unwrap();

    let state = engine(&ScriptedModel::new()).run(&graph, "go").await.unwrap();
    assert_eq!(state.executed_node_ids, vec!["in", "x", "y", "z"]);
}

#[tokio::test]
async fn test_join_node_runs_once_by_default() {
    let graph = Graph::from_value(workflow(
        vec![
            entry_node("in"),
            output_node("a"),
            output_node("b"),
            output_node("join"),
        ],
        vec![
            edge("in", "a"),
            edge("in", "b"),
            edge("a", "join"),
            edge("b", "join"),
        ],
    ))
    .unwrap();

    let state = engine(&ScriptedModel::new()).run(&graph, "go").await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.executed_node_ids, vec!["in", "a", "b", "join"]);
}

fn cyclic_graph() -> Graph {
    Graph::from_value(workflow(
        vec![
            entry_node("in"),
            agent_node("draft", "Draft."),
            agent_node("review", "Review."),
        ],
        vec![
            edge("in", "draft"),
            edge("draft", "review"),
            edge("review", "draft"),
        ],
    ))
    .unwrap()
}

#[tokio::test]
async fn test_cycle_is_skipped_under_default_policy() {
    let model = ScriptedModel::new().with_default("again");
    let state = engine(&model).run(&cyclic_graph(), "start").await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.executed_node_ids, vec!["in", "draft", "review"]);
    assert_eq!(state.final_output.as_deref(), Some("again"));
}

#[tokio::test]
async fn test_cycle_hits_iteration_limit_when_revisits_allowed() {
    let model = ScriptedModel::new().with_default("again");
    let engine = WorkflowEngine::builder(Arc::new(model.clone()))
        .config(EngineConfig {
            max_iterations: 10,
            revisit_policy: RevisitPolicy::Allow,
            yield_between_steps: false,
        })
        .build();

    let state = engine.run(&cyclic_graph(), "start").await.unwrap();

    assert_eq!(state.status, RunStatus::Error);
    assert_eq!(state.error_kind.as_deref(), Some("RunLoopExceeded"));
    assert_eq!(state.steps.len(), 10);
    assert_eq!(model.requests().len(), 9);
}

#[tokio::test]
async fn test_acyclic_graph_never_hits_limit() {
    // A chain as long as the limit itself still completes.
    let mut nodes = vec![entry_node("n0")];
    let mut edges = vec![];
    for i in 1..10 {
        nodes.push(output_node(&format!("n{}", i)));
        edges.push(edge(&format!("n{}", i - 1), &format!("n{}", i)));
    }
    let graph = Graph::from_value(workflow(nodes, edges)).unwrap();

    let engine = WorkflowEngine::builder(Arc::new(ScriptedModel::new()))
        .config(EngineConfig {
            max_iterations: 10,
            revisit_policy: RevisitPolicy::Allow,
            yield_between_steps: true,
        })
        .build();
    let state = engine.run(&graph, "x").await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.steps.len(), 10);
}

#[tokio::test]
async fn test_chain_longer_than_limit_completes_under_default_policy() {
    let mut nodes = vec![entry_node("n0")];
    let mut edges = vec![];
    for i in 1..=150 {
        nodes.push(output_node(&format!("n{}", i)));
        edges.push(edge(&format!("n{}", i - 1), &format!("n{}", i)));
    }
    let graph = Graph::from_value(workflow(nodes, edges)).unwrap();

    let engine = WorkflowEngine::builder(Arc::new(ScriptedModel::new()))
        .config(EngineConfig {
            max_iterations: 100,
            revisit_policy: RevisitPolicy::Skip,
            yield_between_steps: false,
        })
        .build();
    let state = engine.run(&graph, "x").await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert!(state.error_kind.is_none());
    assert_eq!(state.steps.len(), 151);
    assert_eq!(state.final_output.as_deref(), Some("x"));
}

#[tokio::test]
async fn test_second_run_while_active_is_ignored() {
    let model = ScriptedModel::new().with_default("done");
    let engine = engine(&model);
    let graph = Graph::from_value(workflow(
        vec![entry_node("in"), agent_node("agent", "x"), output_node("out")],
        vec![edge("in", "agent"), edge("agent", "out")],
    ))
    .unwrap();

    // The first run yields after the entry node; the second is polled then.
    let (first, second) = tokio::join!(engine.run(&graph, "a"), engine.run(&graph, "b"));

    assert_eq!(first.unwrap().status, RunStatus::Completed);
    assert!(second.is_none());
    assert_eq!(model.requests().len(), 1);

    // The flag is released afterwards.
    assert!(engine.run(&graph, "c").await.is_some());
}

#[tokio::test]
async fn test_cancel_takes_effect_between_nodes() {
    let model = ScriptedModel::new().with_default("never");
    let engine = engine(&model);
    let mut events = engine.event_bus().subscribe();
    let graph = Graph::from_value(workflow(
        vec![entry_node("in"), agent_node("agent", "x"), output_node("out")],
        vec![edge("in", "agent"), edge("agent", "out")],
    ))
    .unwrap();

    let (state, _) = tokio::join!(engine.run(&graph, "Hello"), async { engine.cancel() });
    let state = state.unwrap();

    assert_eq!(state.status, RunStatus::Idle);
    assert_eq!(state.error_kind.as_deref(), Some("Cancelled"));
    assert_eq!(state.executed_node_ids, vec!["in"]);
    assert!(model.requests().is_empty());

    let mut cancelled = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, EngineEvent::RunCancelled { .. }) {
            cancelled = true;
        }
    }
    assert!(cancelled);
}

#[tokio::test]
async fn test_output_node_result_wins_over_other_branch_ends() {
    let model = ScriptedModel::new().then_text("side note");
    let graph = Graph::from_value(workflow(
        vec![
            entry_node("in"),
            output_node("out"),
            agent_node("aside", "x"),
        ],
        vec![edge("in", "out"), edge("in", "aside")],
    ))
    .unwrap();

    let state = engine(&model).run(&graph, "main").await.unwrap();
    assert_eq!(state.executed_node_ids, vec!["in", "out", "aside"]);
    assert_eq!(state.final_output.as_deref(), Some("main"));
}

#[tokio::test]
async fn test_events_cover_the_run() {
    let model = ScriptedModel::new().then_text("T");
    let engine = engine(&model);
    let mut events = engine.event_bus().subscribe();
    let graph = Graph::from_value(workflow(
        vec![entry_node("in"), agent_node("agent", "x")],
        vec![edge("in", "agent")],
    ))
    .unwrap();

    engine.run(&graph, "Hello").await.unwrap();

    let mut kinds = vec![];
    while let Ok(event) = events.try_recv() {
        kinds.push(match event {
            EngineEvent::RunStarted { .. } => "run_started",
            EngineEvent::NodeStarted { .. } => "node_started",
            EngineEvent::NodeCompleted { .. } => "node_completed",
            EngineEvent::RunCompleted { .. } => "run_completed",
            _ => "other",
        });
    }
    assert_eq!(
        kinds,
        vec![
            "run_started",
            "node_started",
            "node_completed",
            "node_started",
            "node_completed",
            "run_completed"
        ]
    );
}
