use serde_json::Value;
use tracing::debug;

use nodeflow_core::error::Result;
use nodeflow_core::types::{EngineEvent, ToolInvocation};

use super::{HandlerContext, NodeOutcome};
use crate::graph::{Node, ToolNodeConfig};

/// Run a tool node reached through control flow. The incoming text is passed
/// as `input` unless the node's config already sets it.
pub async fn run(
    ctx: &HandlerContext<'_>,
    node: &Node,
    config: &ToolNodeConfig,
    input: &str,
) -> Result<NodeOutcome> {
    let mut tool_config = config.config.clone();
    tool_config
        .entry("input")
        .or_insert_with(|| Value::String(input.to_string()));

    let invocation = ToolInvocation {
        tool_type: config.tool_type.clone(),
        config: tool_config,
    };
    debug!(node_id = %node.id, tool = %invocation.tool_type, "Executing standalone tool node");

    let output = ctx.router.execute_recoverable(&invocation).await?;
    ctx.events.publish(EngineEvent::ToolInvoked {
        node_id: node.id.clone(),
        tool_type: invocation.tool_type,
        output: output.clone(),
    });

    Ok(NodeOutcome::new(output.content, ctx.graph.flow_targets(&node.id)))
}
