use serde::{Deserialize, Serialize};

/// Input port on an agent that tool nodes attach to.
pub const TOOLS_PORT: &str = "tools";
/// Input port on an agent that a memory node attaches to.
pub const MEMORY_PORT: &str = "memory";
/// Explicit name of a node's primary output port.
pub const OUTPUT_HANDLE: &str = "output";

/// A directed connection between two nodes' ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    #[serde(alias = "sourceNodeId")]
    pub source: String,
    /// Output port on the source; a classifier uses the category name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(alias = "targetNodeId")]
    pub target: String,
    /// Input port on the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            source_handle: None,
            target: target.into(),
            target_handle: None,
        }
    }

    pub fn from_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    pub fn to_port(mut self, port: impl Into<String>) -> Self {
        self.target_handle = Some(port.into());
        self
    }

    /// Whether this edge attaches a tool or memory node to an agent rather
    /// than carrying control flow.
    pub fn is_attachment(&self) -> bool {
        matches!(
            self.target_handle.as_deref(),
            Some(TOOLS_PORT) | Some(MEMORY_PORT)
        )
    }

    /// Whether the edge leaves the source's primary output port.
    pub fn is_primary_output(&self) -> bool {
        matches!(self.source_handle.as_deref(), None | Some(OUTPUT_HANDLE))
    }
}
