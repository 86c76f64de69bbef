use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use nodeflow_core::error::NodeflowError;

/// A node in a workflow graph.
///
/// On the wire a node is `{id, type, config, position}`; `config` is decoded
/// into the payload matching `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    /// Canvas position. Carried through, never interpreted.
    pub position: Option<Position>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Entry,
    Agent,
    Tool,
    Classifier,
    Output,
    Memory,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Agent => "agent",
            Self::Tool => "tool",
            Self::Classifier => "classifier",
            Self::Output => "output",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-type node configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Entry,
    Agent(AgentConfig),
    Tool(ToolNodeConfig),
    Classifier(ClassifierConfig),
    Output,
    Memory(MemoryNodeConfig),
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Entry => NodeType::Entry,
            Self::Agent(_) => NodeType::Agent,
            Self::Tool(_) => NodeType::Tool,
            Self::Classifier(_) => NodeType::Classifier,
            Self::Output => NodeType::Output,
            Self::Memory(_) => NodeType::Memory,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Model id; the engine default is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolNodeConfig {
    pub tool_type: String,
    /// Tool-specific settings, merged under any function-call arguments.
    #[serde(default)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierConfig {
    pub categories: Vec<String>,
    #[serde(default)]
    pub examples: Vec<ClassifierExample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Extra guidance prepended to the classification prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierExample {
    pub input: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryNodeConfig {
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

impl Default for MemoryNodeConfig {
    fn default() -> Self {
        Self {
            storage_key: default_storage_key(),
            max_messages: default_max_messages(),
        }
    }
}

fn default_storage_key() -> String {
    "default".to_string()
}

fn default_max_messages() -> usize {
    10
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            position: None,
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }
}

#[derive(Serialize, Deserialize)]
struct RawNode {
    id: String,
    #[serde(rename = "type")]
    node_type: NodeType,
    #[serde(default)]
    config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<Position>,
}

fn decode<T: serde::de::DeserializeOwned + Default>(
    id: &str,
    node_type: NodeType,
    config: Value,
) -> Result<T, NodeflowError> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config).map_err(|e| {
        NodeflowError::GraphInvalid(format!("{} node '{}' has invalid config: {}", node_type, id, e))
    })
}

impl TryFrom<RawNode> for Node {
    type Error = NodeflowError;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let (id, t, config) = (raw.id, raw.node_type, raw.config);
        let kind = match t {
            NodeType::Entry => NodeKind::Entry,
            NodeType::Output => NodeKind::Output,
            NodeType::Agent => NodeKind::Agent(decode(&id, t, config)?),
            NodeType::Tool => {
                let tool: ToolNodeConfig = decode(&id, t, config)?;
                if tool.tool_type.trim().is_empty() {
                    return Err(NodeflowError::GraphInvalid(format!(
                        "tool node '{}' has no toolType",
                        id
                    )));
                }
                NodeKind::Tool(tool)
            }
            NodeType::Classifier => NodeKind::Classifier(decode(&id, t, config)?),
            NodeType::Memory => NodeKind::Memory(decode(&id, t, config)?),
        };
        Ok(Node {
            id,
            kind,
            position: raw.position,
        })
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        let node_type = node.node_type();
        let config = match &node.kind {
            NodeKind::Entry | NodeKind::Output => Value::Object(Map::new()),
            NodeKind::Agent(c) => serde_json::to_value(c).unwrap_or_default(),
            NodeKind::Tool(c) => serde_json::to_value(c).unwrap_or_default(),
            NodeKind::Classifier(c) => serde_json::to_value(c).unwrap_or_default(),
            NodeKind::Memory(c) => serde_json::to_value(c).unwrap_or_default(),
        };
        RawNode {
            id: node.id,
            node_type,
            config,
            position: node.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_agent_node_decodes() {
        let node: Node = serde_json::from_value(json!({
            "id": "a1",
            "type": "agent",
            "position": {"x": 10.0, "y": 20.0},
            "config": {"systemInstruction": "Be brief.", "temperature": 0.3}
        }))
        .unwrap();

        assert_eq!(node.node_type(), NodeType::Agent);
        match node.kind {
            NodeKind::Agent(c) => {
                assert_eq!(c.system_instruction.as_deref(), Some("Be brief."));
                assert_eq!(c.temperature, Some(0.3));
                assert!(c.model.is_none());
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_entry_without_config() {
        let node: Node = serde_json::from_value(json!({"id": "start", "type": "entry"})).unwrap();
        assert_eq!(node.kind, NodeKind::Entry);
    }

    #[test]
    fn test_memory_defaults() {
        let node: Node =
            serde_json::from_value(json!({"id": "m", "type": "memory", "config": {}})).unwrap();
        assert_eq!(node.kind, NodeKind::Memory(MemoryNodeConfig::default()));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result: Result<Node, _> =
            serde_json::from_value(json!({"id": "x", "type": "webhook", "config": {}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_tool_without_type_is_rejected() {
        let err = serde_json::from_value::<Node>(json!({"id": "t", "type": "tool", "config": {"toolType": ""}}))
            .unwrap_err();
        assert!(err.to_string().contains("no toolType"));
    }

    #[test]
    fn test_serializes_back_to_wire_shape() {
        let node = Node::new(
            "c1",
            NodeKind::Classifier(ClassifierConfig {
                categories: vec!["Billing".into()],
                ..Default::default()
            }),
        );
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "classifier");
        assert_eq!(json["config"]["categories"][0], "Billing");
        let back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }
}
