use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use nodeflow_core::error::Result;
use nodeflow_core::types::{
    ConversationTurn, EngineEvent, FunctionCall, FunctionDeclaration, ModelRequest,
    NativeCapability, ToolInvocation, ToolOutput,
};
use nodeflow_tools::{map_args_to_config, ToolKind};

use super::{HandlerContext, NodeOutcome};
use crate::graph::{AgentConfig, MemoryNodeConfig, Node, NodeKind, MEMORY_PORT, TOOLS_PORT};

/// Tools attached to one agent, split by where they run.
#[derive(Debug, Default)]
struct AgentTools {
    native: Vec<NativeCapability>,
    declarations: Vec<FunctionDeclaration>,
    /// Base config of the tool node behind each declared function.
    configs: HashMap<&'static str, Map<String, Value>>,
}

impl AgentTools {
    fn collect(nodes: &[&Node]) -> Self {
        let mut tools = Self::default();
        for node in nodes {
            let NodeKind::Tool(tool) = &node.kind else {
                warn!(node_id = %node.id, "Non-tool node attached to tools port, ignoring");
                continue;
            };
            let kind = match ToolKind::from_id(&tool.tool_type) {
                Ok(kind) => kind,
                Err(e) => {
                    warn!(node_id = %node.id, error = %e, "Skipping unsupported tool");
                    continue;
                }
            };

            if let Some(capability) = kind.native_capability() {
                if !tools.native.contains(&capability) {
                    tools.native.push(capability);
                }
            } else if let (Some(decl), Some(name)) = (kind.declaration(), kind.function_name()) {
                if tools.configs.contains_key(name) {
                    warn!(
                        node_id = %node.id,
                        tool = %tool.tool_type,
                        "Tool type already attached to this agent, ignoring duplicate"
                    );
                    continue;
                }
                tools.declarations.push(decl);
                tools.configs.insert(name, tool.config.clone());
            }
        }
        tools
    }
}

/// Run an agent node: history, first model call, at most one round of
/// function calls, memory write-back.
pub async fn run(
    ctx: &HandlerContext<'_>,
    node: &Node,
    config: &AgentConfig,
    input: &str,
) -> Result<NodeOutcome> {
    let memory = ctx
        .graph
        .attached(&node.id, MEMORY_PORT)
        .into_iter()
        .find_map(|n| match &n.kind {
            NodeKind::Memory(m) => Some(m.clone()),
            _ => None,
        });

    let history = match &memory {
        Some(m) => read_history(ctx, m).await,
        None => vec![],
    };

    let tools = AgentTools::collect(&ctx.graph.attached(&node.id, TOOLS_PORT));

    let mut contents = history;
    contents.push(ConversationTurn::user(input));

    let request = ModelRequest {
        model: config
            .model
            .clone()
            .unwrap_or_else(|| ctx.defaults.model_id.clone()),
        contents,
        system_instruction: config.system_instruction.clone(),
        temperature: Some(config.temperature.unwrap_or(ctx.defaults.temperature)),
        function_declarations: tools.declarations.clone(),
        native_capabilities: tools.native.clone(),
    };

    debug!(
        node_id = %node.id,
        history = request.contents.len() - 1,
        functions = request.function_declarations.len(),
        native = request.native_capabilities.len(),
        "Calling model for agent"
    );

    let response = ctx.model.generate(request.clone()).await?;

    let text = if response.function_calls.is_empty() {
        response.text
    } else {
        info!(node_id = %node.id, calls = response.function_calls.len(), "Resolving function calls");
        let mut results = Vec::with_capacity(response.function_calls.len());
        for call in &response.function_calls {
            let output = execute_call(ctx, &node.id, &tools, call).await?;
            results.push((call.name.as_str(), output));
        }

        let follow_up = follow_up_request(request, &results);
        ctx.model.generate(follow_up).await?.text
    };

    if let Some(m) = &memory {
        let turns = [ConversationTurn::user(input), ConversationTurn::model(&text)];
        if let Err(e) = ctx.memory.append(&m.storage_key, &turns, m.max_messages).await {
            warn!(node_id = %node.id, error = %e, "Could not save conversation turn");
        }
    }

    Ok(NodeOutcome::new(text, ctx.graph.primary_targets(&node.id)))
}

async fn read_history(ctx: &HandlerContext<'_>, memory: &MemoryNodeConfig) -> Vec<ConversationTurn> {
    match ctx.memory.read(&memory.storage_key, memory.max_messages).await {
        Ok(turns) => turns,
        Err(e) => {
            warn!(key = %memory.storage_key, error = %e, "Conversation history unavailable, continuing without it");
            vec![]
        }
    }
}

/// Execute one model-requested function. Only run-fatal errors escape;
/// everything else becomes error text for the model.
async fn execute_call(
    ctx: &HandlerContext<'_>,
    node_id: &str,
    tools: &AgentTools,
    call: &FunctionCall,
) -> Result<ToolOutput> {
    // Only functions declared for this agent's attached tool nodes may run.
    let declared = tools
        .configs
        .get(call.name.as_str())
        .and_then(|config| ToolKind::from_function_name(&call.name).map(|kind| (kind, config)));
    let Some((kind, base_config)) = declared else {
        warn!(node_id, function = %call.name, "Model called an undeclared function");
        return Ok(ToolOutput::error(format!("Unknown function '{}'", call.name)));
    };

    let mut config = base_config.clone();

    let output = match map_args_to_config(kind.id(), &call.args) {
        Ok(args) => {
            config.extend(args);
            let invocation = ToolInvocation {
                tool_type: kind.id().to_string(),
                config,
            };
            ctx.router.execute_recoverable(&invocation).await?
        }
        Err(e) => ToolOutput::error(format!("[{}] {}", e.kind(), e)),
    };

    ctx.events.publish(EngineEvent::ToolInvoked {
        node_id: node_id.to_string(),
        tool_type: kind.id().to_string(),
        output: output.clone(),
    });
    Ok(output)
}

/// The second model call: same conversation, with the function results
/// appended to the final user turn as a system note.
fn follow_up_request(mut request: ModelRequest, results: &[(&str, ToolOutput)]) -> ModelRequest {
    let mut note = String::from(
        "\n\n[System note: the following tools were executed for this request. \
         Use their results to answer the user.]",
    );
    for (name, output) in results {
        let status = if output.is_error { "error" } else { "result" };
        note.push_str(&format!("\n- {} {}: {}", name, status, output.content));
    }

    if let Some(last) = request
        .contents
        .iter_mut()
        .rev()
        .find(|t| t.role == nodeflow_core::types::Role::User)
    {
        last.content.push_str(&note);
    }
    request.function_declarations.clear();
    request.native_capabilities.clear();
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_follow_up_extends_last_user_turn() {
        let mut request = ModelRequest::prompt("m", "Send the report");
        request.function_declarations = ToolKind::Gmail.declaration().into_iter().collect();
        let results = [
            ("send_email", ToolOutput::success("Email sent")),
            ("run_bigquery_query", ToolOutput::error("[AuthRequired] no token")),
        ];

        let follow_up = follow_up_request(request, &results);
        let prompt = follow_up.last_prompt().unwrap();
        assert!(prompt.starts_with("Send the report"));
        assert!(prompt.contains("send_email result: Email sent"));
        assert!(prompt.contains("run_bigquery_query error: [AuthRequired] no token"));
        assert!(follow_up.function_declarations.is_empty());
        assert_eq!(follow_up.contents.len(), 1);
    }

    #[test]
    fn test_collect_partitions_tools() {
        use crate::graph::ToolNodeConfig;

        let tool = |id: &str, t: &str| {
            Node::new(
                id,
                NodeKind::Tool(ToolNodeConfig {
                    tool_type: t.into(),
                    config: Default::default(),
                }),
            )
        };
        let nodes = [
            tool("a", "google_search"),
            tool("b", "gmail"),
            tool("c", "bigquery"),
            tool("d", "google_search"),
            tool("e", "teleporter"),
        ];
        let refs: Vec<&Node> = nodes.iter().collect();
        let tools = AgentTools::collect(&refs);

        assert_eq!(tools.native, vec![NativeCapability::GoogleSearch]);
        let names: Vec<_> = tools.declarations.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["send_email", "run_bigquery_query"]);
    }

    #[test]
    fn test_collect_keeps_first_of_duplicate_tool_type() {
        use crate::graph::ToolNodeConfig;

        let sheet = |id: &str, sheet_id: &str| {
            let mut config = Map::new();
            config.insert("spreadsheetId".into(), Value::String(sheet_id.into()));
            Node::new(
                id,
                NodeKind::Tool(ToolNodeConfig {
                    tool_type: "sheets".into(),
                    config,
                }),
            )
        };
        let nodes = [sheet("s1", "first"), sheet("s2", "second")];
        let refs: Vec<&Node> = nodes.iter().collect();
        let tools = AgentTools::collect(&refs);

        assert_eq!(tools.declarations.len(), 1);
        assert_eq!(tools.configs["manage_spreadsheet"]["spreadsheetId"], "first");
    }
}
