//! Per-node-type activation logic.

pub mod agent;
pub mod classifier;
pub mod tool;

use std::sync::Arc;

use nodeflow_core::event::EventBus;
use nodeflow_core::traits::ModelClient;
use nodeflow_memory::MemoryWindow;
use nodeflow_tools::ToolRouter;

use crate::graph::Graph;

/// What a handler hands back to the traversal controller.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub output: String,
    /// Ids to enqueue next, in edge declaration order.
    pub next: Vec<String>,
}

impl NodeOutcome {
    pub fn new(output: impl Into<String>, next: Vec<String>) -> Self {
        Self {
            output: output.into(),
            next,
        }
    }

    /// A branch that ends here.
    pub fn terminal(output: impl Into<String>) -> Self {
        Self::new(output, vec![])
    }
}

/// Model settings used when a node does not override them.
#[derive(Debug, Clone)]
pub struct ModelDefaults {
    pub model_id: String,
    pub temperature: f32,
}

/// Collaborators shared by all handlers for the duration of one run.
pub struct HandlerContext<'a> {
    pub graph: &'a Graph,
    pub model: &'a Arc<dyn ModelClient>,
    pub router: &'a ToolRouter,
    pub memory: &'a MemoryWindow,
    pub events: &'a EventBus,
    pub defaults: &'a ModelDefaults,
}
