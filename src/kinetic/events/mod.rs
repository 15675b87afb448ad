// SPDX-License-Identifier: MIT

//! Run events
//!
//! The execution backend has shipped two event shapes over time: a legacy
//! `tool_event` wrapper around the real event, and flat v2 events. Both
//! normalise into [`RunEvent`] before reaching the reconciliation engine.

mod normalizer;
pub mod wire;

pub use normalizer::{normalize, normalize_str};
pub use wire::WireEvent;

use crate::kinetic::run::RunSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// A normalised event, tagged with the run it belongs to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    pub run_id: Option<String>,
    pub graph_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: EventKind,
}

/// Internal event vocabulary
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Snapshot delivered on (re)connect; `None` when the server has nothing yet
    Init {
        snapshot: Option<RunSnapshot>,
        existing_content: Option<Value>,
    },
    GraphStart,
    NodeStart {
        node_id: String,
    },
    NodeProgress {
        node_id: String,
        step: Option<String>,
        progress: Option<f64>,
        data: Option<Value>,
    },
    NodeComplete {
        node_id: String,
    },
    NodeError {
        node_id: String,
        error: Option<String>,
    },
    GraphComplete,
    GraphError {
        error: Option<String>,
    },
    RunComplete,
    RunError {
        error: Option<String>,
    },
    /// Tool activity inside a node; carried through, never mutates graph state
    Tool {
        phase: ToolPhase,
        name: Option<String>,
        payload: Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPhase {
    Start,
    Call,
    Result,
    End,
    Error,
}

impl RunEvent {
    /// Event without run identity or timestamp
    pub fn new(kind: EventKind) -> Self {
        Self {
            run_id: None,
            graph_id: None,
            timestamp: None,
            kind,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_graph_id(mut self, graph_id: impl Into<String>) -> Self {
        self.graph_id = Some(graph_id.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn node_start(node_id: impl Into<String>) -> Self {
        Self::new(EventKind::NodeStart {
            node_id: node_id.into(),
        })
    }

    pub fn node_complete(node_id: impl Into<String>) -> Self {
        Self::new(EventKind::NodeComplete {
            node_id: node_id.into(),
        })
    }

    pub fn node_error(node_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(EventKind::NodeError {
            node_id: node_id.into(),
            error: Some(error.into()),
        })
    }

    pub fn node_progress(node_id: impl Into<String>, step: impl Into<String>) -> Self {
        Self::new(EventKind::NodeProgress {
            node_id: node_id.into(),
            step: Some(step.into()),
            progress: None,
            data: None,
        })
    }

    pub fn run_complete() -> Self {
        Self::new(EventKind::RunComplete)
    }

    pub fn run_error(error: impl Into<String>) -> Self {
        Self::new(EventKind::RunError {
            error: Some(error.into()),
        })
    }

    /// Snapshot event; the snapshot's timestamp doubles as the event's
    pub fn init(snapshot: RunSnapshot) -> Self {
        let timestamp = snapshot.state_timestamp;
        Self {
            run_id: snapshot.run_id.clone(),
            graph_id: snapshot.graph_id.clone(),
            timestamp,
            kind: EventKind::Init {
                snapshot: Some(snapshot),
                existing_content: None,
            },
        }
    }

    /// Short name of the event type, as used on the wire
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            EventKind::Init { .. } => "init",
            EventKind::GraphStart => "graph_start",
            EventKind::NodeStart { .. } => "node_start",
            EventKind::NodeProgress { .. } => "node_progress",
            EventKind::NodeComplete { .. } => "node_complete",
            EventKind::NodeError { .. } => "node_error",
            EventKind::GraphComplete => "graph_complete",
            EventKind::GraphError { .. } => "graph_error",
            EventKind::RunComplete => "run_complete",
            EventKind::RunError { .. } => "run_error",
            EventKind::Tool { .. } => "tool",
        }
    }
}
