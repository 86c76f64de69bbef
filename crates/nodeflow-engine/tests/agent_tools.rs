use std::sync::Arc;

use serde_json::json;

use nodeflow_core::types::{EngineEvent, NativeCapability};
use nodeflow_engine::{Graph, RunStatus, WorkflowEngine};
use nodeflow_test_utils::{
    agent_node, edge, entry_node, output_node, port_edge, tool_node, workflow, FailingModel,
    RecordingBridge, ScriptedModel,
};

fn agent_with_tools(tools: Vec<(&str, &str, serde_json::Value)>) -> Graph {
    let mut nodes = vec![
        entry_node("entry"),
        agent_node("agent", "You are an assistant."),
        output_node("out"),
    ];
    let mut edges = vec![edge("entry", "agent"), edge("agent", "out")];
    for (id, tool_type, config) in tools {
        nodes.push(tool_node(id, tool_type, config));
        edges.push(port_edge(id, "agent", "tools"));
    }
    Graph::from_value(workflow(nodes, edges)).unwrap()
}

#[tokio::test]
async fn test_unauthorized_gcp_call_does_not_abort_run() {
    let model = ScriptedModel::new()
        .then_calls(vec![("run_bigquery_query", json!({"query": "SELECT 1"}))])
        .then_text("I need access to BigQuery first.");
    let engine = WorkflowEngine::builder(Arc::new(model.clone())).build();
    let mut events = engine.event_bus().subscribe();
    let graph = agent_with_tools(vec![("bq", "bigquery", json!({}))]);

    let state = engine.run(&graph, "How many orders today?").await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.executed_node_ids, vec!["entry", "agent", "out"]);
    assert_eq!(
        state.final_output.as_deref(),
        Some("I need access to BigQuery first.")
    );

    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].function_declarations[0].name, "run_bigquery_query");
    let follow_up = requests[1].last_prompt().unwrap();
    assert!(follow_up.starts_with("How many orders today?"));
    assert!(follow_up.contains("AuthRequired"));
    assert!(requests[1].function_declarations.is_empty());

    let mut tool_output = None;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::ToolInvoked { tool_type, output, .. } = event {
            assert_eq!(tool_type, "bigquery");
            tool_output = Some(output);
        }
    }
    let output = tool_output.unwrap();
    assert!(output.is_error);
    assert!(output.content.contains("AuthRequired"));
}

#[tokio::test]
async fn test_bridge_function_call_merges_node_config() {
    let model = ScriptedModel::new()
        .then_calls(vec![(
            "manage_spreadsheet",
            json!({"action": "append", "range": "Sheet1!A1", "values": [["42"]]}),
        )])
        .then_text("Added the row.");
    let bridge = RecordingBridge::new().then_ok(json!("1 row appended"));
    let engine = WorkflowEngine::builder(Arc::new(model.clone()))
        .bridge(Arc::new(bridge.clone()))
        .build();
    let graph = agent_with_tools(vec![("sheet", "sheets", json!({"spreadsheetId": "sheet-1"}))]);

    let state = engine.run(&graph, "Log 42").await.unwrap();
    assert_eq!(state.final_output.as_deref(), Some("Added the row."));

    let calls = bridge.calls();
    assert_eq!(calls.len(), 1);
    let (action, payload) = &calls[0];
    assert_eq!(action, "tool.execute");
    assert_eq!(payload["toolType"], "sheets");
    assert_eq!(payload["config"]["operation"], "appendRows");
    assert_eq!(payload["config"]["spreadsheetId"], "sheet-1");
    assert_eq!(payload["config"]["range"], "Sheet1!A1");
    assert_eq!(payload["config"]["values"], json!([["42"]]));

    assert!(model.requests()[1]
        .last_prompt()
        .unwrap()
        .contains("1 row appended"));
}

#[tokio::test]
async fn test_only_one_round_of_function_calls() {
    // The follow-up answer asks for more calls; they are not executed.
    let model = ScriptedModel::new()
        .then_calls(vec![("send_email", json!({"to": "a@b.c", "subject": "s", "body": "b"}))])
        .then_calls(vec![("send_email", json!({"to": "d@e.f", "subject": "s", "body": "b"}))]);
    let bridge = RecordingBridge::new();
    let engine = WorkflowEngine::builder(Arc::new(model.clone()))
        .bridge(Arc::new(bridge.clone()))
        .build();
    let graph = agent_with_tools(vec![("mail", "gmail", json!({}))]);

    let state = engine.run(&graph, "Email them").await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(bridge.calls().len(), 1);
    assert_eq!(model.requests().len(), 2);
}

#[tokio::test]
async fn test_failed_bridge_call_is_fed_back() {
    let model = ScriptedModel::new()
        .then_calls(vec![("manage_calendar", json!({"action": "list"}))])
        .then_text("The calendar is unavailable right now.");
    let engine = WorkflowEngine::builder(Arc::new(model.clone())).build();
    let graph = agent_with_tools(vec![("cal", "calendar", json!({}))]);

    let state = engine.run(&graph, "What's on today?").await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    assert!(model.requests()[1]
        .last_prompt()
        .unwrap()
        .contains("BridgeUnreachable"));
}

#[tokio::test]
async fn test_unknown_function_is_reported_to_model() {
    let model = ScriptedModel::new()
        .then_calls(vec![("launch_rocket", json!({}))])
        .then_text("I can't do that.");
    let engine = WorkflowEngine::builder(Arc::new(model.clone())).build();
    let graph = agent_with_tools(vec![]);

    let state = engine.run(&graph, "Launch").await.unwrap();
    assert_eq!(state.final_output.as_deref(), Some("I can't do that."));
    assert!(model.requests()[1]
        .last_prompt()
        .unwrap()
        .contains("Unknown function 'launch_rocket'"));
}

#[tokio::test]
async fn test_native_tools_are_capabilities_not_functions() {
    let model = ScriptedModel::new().then_text("Found it.");
    let engine = WorkflowEngine::builder(Arc::new(model.clone())).build();
    let graph = agent_with_tools(vec![
        ("search", "google_search", json!({})),
        ("fetch", "url_context", json!({})),
        ("mail", "gmail", json!({})),
    ]);

    engine.run(&graph, "Look it up").await.unwrap();

    let request = &model.requests()[0];
    assert_eq!(
        request.native_capabilities,
        vec![NativeCapability::GoogleSearch, NativeCapability::UrlContext]
    );
    let names: Vec<_> = request
        .function_declarations
        .iter()
        .map(|d| d.name.as_str())
        .collect();
    assert_eq!(names, vec!["send_email"]);
}

#[tokio::test]
async fn test_standalone_tool_node_in_flow() {
    let bridge = RecordingBridge::new().then_ok(json!("Sent"));
    let engine = WorkflowEngine::builder(Arc::new(ScriptedModel::new()))
        .bridge(Arc::new(bridge.clone()))
        .build();
    let graph = Graph::from_value(workflow(
        vec![
            entry_node("entry"),
            tool_node("mail", "gmail", json!({"to": "ops@example.com", "subject": "Alert"})),
            output_node("out"),
        ],
        vec![edge("entry", "mail"), edge("mail", "out")],
    ))
    .unwrap();

    let state = engine.run(&graph, "Disk almost full").await.unwrap();
    assert_eq!(state.executed_node_ids, vec!["entry", "mail", "out"]);
    assert_eq!(state.final_output.as_deref(), Some("Sent"));

    let payload = &bridge.calls()[0].1;
    assert_eq!(payload["config"]["to"], "ops@example.com");
    assert_eq!(payload["config"]["input"], "Disk almost full");
}

#[tokio::test]
async fn test_agent_without_credential_fails_run() {
    let engine = WorkflowEngine::builder(Arc::new(FailingModel)).build();
    let graph = agent_with_tools(vec![]);

    let state = engine.run(&graph, "Hello").await.unwrap();
    assert_eq!(state.status, RunStatus::Error);
    assert_eq!(state.error_kind.as_deref(), Some("ModelUnavailable"));
    assert_eq!(state.executed_node_ids, vec!["entry", "agent"]);
}

#[tokio::test]
async fn test_undeclared_catalog_function_is_not_executed() {
    // No tool nodes attached, so send_email was never offered to the model.
    let model = ScriptedModel::new()
        .then_calls(vec![(
            "send_email",
            json!({"to": "x@example.com", "subject": "s", "body": "b"}),
        )])
        .then_text("I can't send email from here.");
    let bridge = RecordingBridge::new();
    let engine = WorkflowEngine::builder(Arc::new(model.clone()))
        .bridge(Arc::new(bridge.clone()))
        .build();
    let graph = agent_with_tools(vec![]);

    let state = engine.run(&graph, "Email x").await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert!(model.requests()[0].function_declarations.is_empty());
    assert!(bridge.calls().is_empty());
    assert!(model.requests()[1]
        .last_prompt()
        .unwrap()
        .contains("Unknown function 'send_email'"));
}

#[tokio::test]
async fn test_function_of_other_attached_tool_is_rejected() {
    let model = ScriptedModel::new()
        .then_calls(vec![("manage_calendar", json!({"action": "list"}))])
        .then_text("done");
    let bridge = RecordingBridge::new();
    let engine = WorkflowEngine::builder(Arc::new(model.clone()))
        .bridge(Arc::new(bridge.clone()))
        .build();
    let graph = agent_with_tools(vec![("mail", "gmail", json!({}))]);

    engine.run(&graph, "What's on today?").await.unwrap();
    assert!(bridge.calls().is_empty());
}
