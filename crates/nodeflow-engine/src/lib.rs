//! Workflow execution engine: graph model, node handlers, and the
//! worklist-driven traversal controller.

pub mod executor;
pub mod graph;
pub mod handlers;
pub mod run_log;
pub mod run_state;

pub use executor::{WorkflowEngine, WorkflowEngineBuilder};
pub use graph::{Edge, Graph, Node, NodeKind, NodeType};
pub use run_log::RunLogger;
pub use run_state::{ExecutionStep, RunState, RunStatus};
