use chrono::{DateTime, Utc};
use serde::Serialize;

use nodeflow_core::types::RunId;

use crate::graph::NodeType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Not started, or cancelled before completion.
    Idle,
    Running,
    Completed,
    Error,
}

/// One node activation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub node_id: String,
    pub node_type: NodeType,
    pub input: String,
    pub output: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// State of one run. Only the traversal controller mutates it, and only
/// while `status` is `Running`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub run_id: RunId,
    pub status: RunStatus,
    pub current_node_id: Option<String>,
    pub executed_node_ids: Vec<String>,
    pub final_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error kind name when `status` is `Error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub steps: Vec<ExecutionStep>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub(crate) fn start(run_id: RunId) -> Self {
        Self {
            run_id,
            status: RunStatus::Running,
            current_node_id: None,
            executed_node_ids: vec![],
            final_output: None,
            error: None,
            error_kind: None,
            steps: vec![],
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn record(&mut self, step: ExecutionStep) {
        self.current_node_id = Some(step.node_id.clone());
        self.executed_node_ids.push(step.node_id.clone());
        self.steps.push(step);
    }

    pub(crate) fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, error: &nodeflow_core::error::NodeflowError) {
        self.error = Some(error.to_string());
        self.error_kind = Some(error.kind().to_string());
        self.finish(RunStatus::Error);
    }

    /// Cancellation folds back into `Idle`; the kind records why the run stopped.
    pub(crate) fn cancel(&mut self) {
        let reason = nodeflow_core::error::NodeflowError::Cancelled;
        self.error = Some(reason.to_string());
        self.error_kind = Some(reason.kind().to_string());
        self.finish(RunStatus::Idle);
    }

    pub fn is_finished(&self) -> bool {
        self.status != RunStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeflow_core::error::NodeflowError;

    fn step(id: &str) -> ExecutionStep {
        let now = Utc::now();
        ExecutionStep {
            node_id: id.into(),
            node_type: NodeType::Entry,
            input: "in".into(),
            output: "out".into(),
            start_time: now,
            end_time: now,
            error: None,
        }
    }

    #[test]
    fn test_record_tracks_current_node() {
        let mut state = RunState::start(RunId::new());
        state.record(step("a"));
        state.record(step("b"));
        assert_eq!(state.current_node_id.as_deref(), Some("b"));
        assert_eq!(state.executed_node_ids, vec!["a", "b"]);
        assert!(!state.is_finished());
    }

    #[test]
    fn test_fail_sets_error() {
        let mut state = RunState::start(RunId::new());
        state.fail(&NodeflowError::RunLoopExceeded(100));
        assert_eq!(state.status, RunStatus::Error);
        assert_eq!(state.error_kind.as_deref(), Some("RunLoopExceeded"));
        assert!(state.finished_at.is_some());
    }

    #[test]
    fn test_cancel_returns_to_idle() {
        let mut state = RunState::start(RunId::new());
        state.record(step("a"));
        state.cancel();
        assert_eq!(state.status, RunStatus::Idle);
        assert_eq!(state.error_kind.as_deref(), Some("Cancelled"));
        assert!(state.is_finished());
    }

    #[test]
    fn test_serializes_camel_case() {
        let state = RunState::start(RunId::new());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "running");
        assert!(json["executedNodeIds"].as_array().unwrap().is_empty());
        assert!(json.get("error").is_none());
    }
}
