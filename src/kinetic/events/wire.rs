// SPDX-License-Identifier: MIT

//! Wire representation of backend events
//!
//! Every known `type` tag maps to one variant; anything else lands in
//! [`WireEvent::Unknown`] so newer servers never break older clients.

use crate::kinetic::run::{NodeProgress, NodeStatus, RunSnapshot, RunStatus};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Backend event, discriminated by its `type` field
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum WireEvent {
    /// Legacy wrapper: the real event sits under `event`
    ToolEvent {
        event: Value,
    },
    Init {
        #[serde(default)]
        state: Option<WireRunState>,
        #[serde(default)]
        existing_content: Option<Value>,
    },
    GraphStart,
    NodeStart {
        #[serde(alias = "node_id")]
        node_id: String,
    },
    NodeProgress {
        #[serde(alias = "node_id")]
        node_id: String,
        #[serde(default)]
        step: Option<String>,
        #[serde(default)]
        progress: Option<f64>,
        #[serde(default)]
        data: Option<Value>,
    },
    NodeComplete {
        #[serde(alias = "node_id")]
        node_id: String,
    },
    NodeError {
        #[serde(alias = "node_id")]
        node_id: String,
        #[serde(default)]
        error: Option<String>,
    },
    GraphComplete,
    GraphError {
        #[serde(default)]
        error: Option<String>,
    },
    RunComplete,
    RunError {
        #[serde(default)]
        error: Option<String>,
    },
    ToolStart {
        #[serde(default, alias = "tool")]
        name: Option<String>,
    },
    ToolCall {
        #[serde(default, alias = "tool")]
        name: Option<String>,
    },
    ToolResult {
        #[serde(default, alias = "tool")]
        name: Option<String>,
    },
    ToolEnd {
        #[serde(default, alias = "tool")]
        name: Option<String>,
    },
    ToolError {
        #[serde(default, alias = "tool")]
        name: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Run identity carried alongside any event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub run_id: Option<String>,
    pub graph_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Read the envelope fields of an event
    ///
    /// Each field is read on its own; a malformed one reads as absent
    /// without taking the others with it.
    pub fn from_value(value: &Value) -> Self {
        let text = |camel: &str, snake: &str| {
            value
                .get(camel)
                .or_else(|| value.get(snake))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self {
            run_id: text("runId", "run_id"),
            graph_id: text("graphId", "graph_id"),
            timestamp: value.get("timestamp").and_then(flexible_timestamp::from_value),
        }
    }

    /// Fill missing fields from an outer envelope
    pub fn or(self, outer: Envelope) -> Self {
        Self {
            run_id: self.run_id.or(outer.run_id),
            graph_id: self.graph_id.or(outer.graph_id),
            timestamp: self.timestamp.or(outer.timestamp),
        }
    }
}

/// Run state as carried by `init`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRunState {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub graph_id: Option<String>,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default, deserialize_with = "flexible_timestamp::deserialize")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_timestamp::deserialize")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub graph: WireGraphProgress,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireGraphProgress {
    #[serde(default)]
    pub execution_path: Vec<String>,
    #[serde(default)]
    pub node_progress: BTreeMap<String, WireNodeProgress>,
}

/// Per-node snapshot entry: a bare status, or full detail
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireNodeProgress {
    Status(NodeStatus),
    Detailed(WireNodeDetail),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireNodeDetail {
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default, alias = "step")]
    pub step_name: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default, deserialize_with = "flexible_timestamp::deserialize")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_timestamp::deserialize")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl WireNodeProgress {
    fn into_progress(self, node_id: &str) -> NodeProgress {
        match self {
            WireNodeProgress::Status(status) => NodeProgress::new(node_id, status),
            WireNodeProgress::Detailed(detail) => NodeProgress {
                node_id: node_id.to_string(),
                status: detail.status,
                step_name: detail.step_name,
                progress: detail.progress,
                start_time: detail.start_time,
                end_time: detail.end_time,
                error: detail.error,
            },
        }
    }
}

impl WireRunState {
    /// Build a snapshot stamped with the `init` event's timestamp
    pub fn into_snapshot(self, state_timestamp: Option<DateTime<Utc>>) -> RunSnapshot {
        let node_progress = self
            .graph
            .node_progress
            .into_iter()
            .map(|(id, progress)| {
                let progress = progress.into_progress(&id);
                (id, progress)
            })
            .collect();

        RunSnapshot {
            run_id: self.run_id,
            graph_id: self.graph_id,
            status: self.status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            execution_path: self.graph.execution_path,
            node_progress,
            error: self.error,
            state_timestamp,
        }
    }
}

/// Timestamps arrive either as RFC 3339 strings or epoch milliseconds
///
/// Unparseable text reads as no timestamp rather than failing the
/// surrounding value.
pub mod flexible_timestamp {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Fractional(f64),
        Text(String),
    }

    impl Raw {
        fn into_timestamp(self) -> Option<DateTime<Utc>> {
            match self {
                Raw::Millis(ms) => Utc.timestamp_millis_opt(ms).single(),
                Raw::Fractional(ms) => Utc.timestamp_millis_opt(ms as i64).single(),
                Raw::Text(text) => match DateTime::parse_from_rfc3339(&text) {
                    Ok(dt) => Some(dt.with_timezone(&Utc)),
                    Err(e) => {
                        log::debug!("Ignoring unreadable timestamp '{}': {}", text, e);
                        None
                    }
                },
            }
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Raw>::deserialize(deserializer)?.and_then(Raw::into_timestamp))
    }

    pub fn from_value(value: &Value) -> Option<DateTime<Utc>> {
        Raw::deserialize(value).ok().and_then(Raw::into_timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_flat_node_start() {
        let event: WireEvent =
            serde_json::from_value(json!({"type": "node_start", "nodeId": "a", "timestamp": 5}))
                .unwrap();
        assert!(matches!(event, WireEvent::NodeStart { node_id } if node_id == "a"));
    }

    #[test]
    fn test_unknown_type() {
        let event: WireEvent =
            serde_json::from_value(json!({"type": "heartbeat", "seq": 9})).unwrap();
        assert!(matches!(event, WireEvent::Unknown));
    }

    #[test]
    fn test_unit_variant_ignores_extra_fields() {
        let event: WireEvent =
            serde_json::from_value(json!({"type": "graph_start", "runId": "r1"})).unwrap();
        assert!(matches!(event, WireEvent::GraphStart));
    }

    #[test]
    fn test_envelope_timestamp_formats() {
        let millis = Envelope::from_value(&json!({"timestamp": 1_700_000_000_000i64}));
        assert_eq!(
            millis.timestamp,
            Some(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
        );

        let text = Envelope::from_value(&json!({"timestamp": "2024-05-01T10:00:00Z", "runId": "r"}));
        assert_eq!(
            text.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(text.run_id.as_deref(), Some("r"));
    }

    #[test]
    fn test_envelope_survives_bad_timestamp() {
        let envelope = Envelope::from_value(&json!({
            "type": "node_start",
            "run_id": "old",
            "graphId": "g",
            "timestamp": "not-a-date"
        }));
        assert_eq!(envelope.run_id.as_deref(), Some("old"));
        assert_eq!(envelope.graph_id.as_deref(), Some("g"));
        assert!(envelope.timestamp.is_none());

        let odd = Envelope::from_value(&json!({"runId": 7, "timestamp": true}));
        assert_eq!(odd, Envelope::default());
    }

    #[test]
    fn test_init_with_bad_started_at_still_parses() {
        let event: WireEvent = serde_json::from_value(json!({
            "type": "init",
            "state": {"runId": "r1", "status": "running", "startedAt": "yesterday"}
        }))
        .unwrap();
        let WireEvent::Init { state: Some(state), .. } = event else {
            panic!("expected init with state");
        };
        assert_eq!(state.run_id.as_deref(), Some("r1"));
        assert!(state.started_at.is_none());
    }

    #[test]
    fn test_envelope_or_prefers_inner() {
        let inner = Envelope {
            run_id: Some("inner".to_string()),
            ..Default::default()
        };
        let outer = Envelope {
            run_id: Some("outer".to_string()),
            graph_id: Some("g".to_string()),
            timestamp: None,
        };
        let merged = inner.or(outer);
        assert_eq!(merged.run_id.as_deref(), Some("inner"));
        assert_eq!(merged.graph_id.as_deref(), Some("g"));
    }

    #[test]
    fn test_init_snapshot_mixed_progress() {
        let event: WireEvent = serde_json::from_value(json!({
            "type": "init",
            "timestamp": 20,
            "state": {
                "runId": "r1",
                "graphId": "g1",
                "status": "running",
                "startedAt": "2024-05-01T10:00:00Z",
                "graph": {
                    "executionPath": ["a", "b"],
                    "nodeProgress": {
                        "a": "completed",
                        "b": {"status": "running", "step": "searching"}
                    }
                }
            }
        }))
        .unwrap();

        let WireEvent::Init { state: Some(state), .. } = event else {
            panic!("expected init with state");
        };
        let snapshot = state.into_snapshot(None);
        assert_eq!(snapshot.run_id.as_deref(), Some("r1"));
        assert_eq!(snapshot.status, RunStatus::Running);
        assert_eq!(snapshot.node_progress["a"].status, NodeStatus::Completed);
        assert_eq!(snapshot.node_progress["b"].node_id, "b");
        assert_eq!(
            snapshot.node_progress["b"].step_name.as_deref(),
            Some("searching")
        );
        assert_eq!(snapshot.execution_path, vec!["a", "b"]);
    }
}
