//! Workflow graph model.
//!
//! A workflow is a set of typed `Node`s connected by `Edge`s between named
//! ports. The graph is read-only while a run is in progress; every query here
//! borrows immutably.

pub mod edge;
pub mod node;

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use nodeflow_core::error::{NodeflowError, Result};

pub use edge::{Edge, MEMORY_PORT, OUTPUT_HANDLE, TOOLS_PORT};
pub use node::{
    AgentConfig, ClassifierConfig, ClassifierExample, MemoryNodeConfig, Node, NodeKind, NodeType,
    Position, ToolNodeConfig,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// Parse a workflow document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| NodeflowError::GraphInvalid(e.to_string()))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| NodeflowError::GraphInvalid(e.to_string()))
    }

    /// Load and parse a workflow file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Check that the graph is runnable: unique node ids, exactly one entry
    /// node, and no edge pointing at a missing node.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(NodeflowError::GraphInvalid(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        let entries = self
            .nodes
            .iter()
            .filter(|n| n.node_type() == NodeType::Entry)
            .count();
        match entries {
            0 => return Err(NodeflowError::GraphInvalid("no entry node".into())),
            1 => {}
            n => {
                return Err(NodeflowError::GraphInvalid(format!(
                    "{} entry nodes; exactly one is required",
                    n
                )))
            }
        }

        for edge in &self.edges {
            for end in [&edge.source, &edge.target] {
                if !ids.contains(end.as_str()) {
                    return Err(NodeflowError::GraphInvalid(format!(
                        "edge '{}' references missing node '{}'",
                        edge.id, end
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn entry_node(&self) -> Result<&Node> {
        self.nodes
            .iter()
            .find(|n| n.node_type() == NodeType::Entry)
            .ok_or_else(|| NodeflowError::GraphInvalid("no entry node".into()))
    }

    pub fn node(&self, id: &str) -> Result<&Node> {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .ok_or_else(|| NodeflowError::NodeNotFound(id.to_string()))
    }

    /// Edges leaving `node_id`, optionally restricted to one source handle.
    /// Declaration order is preserved.
    pub fn outgoing_edges(&self, node_id: &str, handle: Option<&str>) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| e.source == node_id)
            .filter(|e| handle.is_none() || e.source_handle.as_deref() == handle)
            .collect()
    }

    /// Edges arriving at `node_id`, optionally restricted to one input port.
    pub fn incoming_edges(&self, node_id: &str, port: Option<&str>) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| e.target == node_id)
            .filter(|e| port.is_none() || e.target_handle.as_deref() == port)
            .collect()
    }

    /// Nodes attached to `node_id` through the given input port.
    pub fn attached(&self, node_id: &str, port: &str) -> Vec<&Node> {
        self.incoming_edges(node_id, Some(port))
            .into_iter()
            .filter_map(|e| self.node(&e.source).ok())
            .collect()
    }

    /// Control-flow successors of `node_id`: targets of its outgoing edges,
    /// excluding tool/memory attachments.
    pub fn flow_targets(&self, node_id: &str) -> Vec<String> {
        self.outgoing_edges(node_id, None)
            .into_iter()
            .filter(|e| !e.is_attachment())
            .map(|e| e.target.clone())
            .collect()
    }

    /// Successors through the node's primary output port only.
    pub fn primary_targets(&self, node_id: &str) -> Vec<String> {
        self.outgoing_edges(node_id, None)
            .into_iter()
            .filter(|e| !e.is_attachment() && e.is_primary_output())
            .map(|e| e.target.clone())
            .collect()
    }
}
