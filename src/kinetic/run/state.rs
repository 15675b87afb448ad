// SPDX-License-Identifier: MIT

//! Run state read model
//!
//! `GraphRunState` is what the presentation layer paints on top of a layout.
//! Only [`RunEngine`](super::RunEngine) mutates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle of a whole run
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    #[serde(alias = "pending")]
    Idle,
    Running,
    #[serde(alias = "complete", alias = "success")]
    Completed,
    #[serde(alias = "failed")]
    Error,
}

/// Lifecycle of one node within a run
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    #[serde(alias = "idle")]
    Pending,
    Running,
    #[serde(alias = "complete", alias = "success")]
    Completed,
    #[serde(alias = "failed")]
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Error)
    }
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Completed | NodeStatus::Error)
    }
}

/// Execution progress of a single node
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeProgress {
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    /// Fraction reported by the last progress event, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeProgress {
    pub fn new(node_id: impl Into<String>, status: NodeStatus) -> Self {
        Self {
            node_id: node_id.into(),
            status,
            ..Default::default()
        }
    }
}

/// Canonical state of one run
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GraphRunState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<String>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
    #[serde(default)]
    pub node_progress: BTreeMap<String, NodeProgress>,
    /// Nodes in the order they started; repeats on loops
    #[serde(default)]
    pub execution_path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GraphRunState {
    /// Fresh idle state
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeProgress> {
        self.node_progress.get(node_id)
    }

    /// Status of a node, `Pending` when it has not been seen
    pub fn node_status(&self, node_id: &str) -> NodeStatus {
        self.node(node_id).map(|n| n.status).unwrap_or_default()
    }

    /// Nodes currently marked running, in id order
    pub fn running_nodes(&self) -> Vec<&str> {
        self.node_progress
            .values()
            .filter(|n| n.status == NodeStatus::Running)
            .map(|n| n.node_id.as_str())
            .collect()
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Server-supplied summary of a run as of `state_timestamp`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub graph_id: Option<String>,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_path: Vec<String>,
    #[serde(default)]
    pub node_progress: BTreeMap<String, NodeProgress>,
    #[serde(default)]
    pub error: Option<String>,
    /// Events at or before this instant are already represented
    #[serde(default)]
    pub state_timestamp: Option<DateTime<Utc>>,
}

impl RunSnapshot {
    /// Turn the snapshot into a run state, wholesale
    pub fn into_state(self) -> GraphRunState {
        let current_node_id = self
            .execution_path
            .iter()
            .rev()
            .find(|id| {
                self.node_progress
                    .get(*id)
                    .is_some_and(|n| n.status == NodeStatus::Running)
            })
            .cloned();

        GraphRunState {
            run_id: self.run_id,
            graph_id: self.graph_id,
            status: self.status,
            current_node_id,
            node_progress: self.node_progress,
            execution_path: self.execution_path,
            start_time: self.started_at,
            end_time: self.completed_at,
            error: self.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_terminal() {
        assert!(!RunStatus::Idle.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(NodeStatus::Error.is_terminal());
        assert!(!NodeStatus::Pending.is_terminal());
    }

    #[test]
    fn test_status_aliases() {
        let status: NodeStatus = serde_json::from_value(json!("failed")).unwrap();
        assert_eq!(status, NodeStatus::Error);
        let status: RunStatus = serde_json::from_value(json!("success")).unwrap();
        assert_eq!(status, RunStatus::Completed);
    }

    #[test]
    fn test_unknown_node_is_pending() {
        let state = GraphRunState::idle();
        assert_eq!(state.node_status("missing"), NodeStatus::Pending);
        assert!(state.running_nodes().is_empty());
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let mut state = GraphRunState::idle();
        state.run_id = Some("r1".to_string());
        state.current_node_id = Some("a".to_string());
        state
            .node_progress
            .insert("a".to_string(), NodeProgress::new("a", NodeStatus::Running));

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["runId"], "r1");
        assert_eq!(value["currentNodeId"], "a");
        assert_eq!(value["status"], "idle");
        assert_eq!(value["nodeProgress"]["a"]["status"], "running");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_snapshot_into_state_finds_current_node() {
        let mut progress = BTreeMap::new();
        progress.insert("a".to_string(), NodeProgress::new("a", NodeStatus::Completed));
        progress.insert("b".to_string(), NodeProgress::new("b", NodeStatus::Running));
        let snapshot = RunSnapshot {
            run_id: Some("r1".to_string()),
            status: RunStatus::Running,
            execution_path: vec!["a".to_string(), "b".to_string(), "a".to_string()],
            node_progress: progress,
            ..Default::default()
        };

        let state = snapshot.into_state();
        assert_eq!(state.current_node_id.as_deref(), Some("b"));
        assert_eq!(state.execution_path.len(), 3);
        assert_eq!(state.status, RunStatus::Running);
    }
}
