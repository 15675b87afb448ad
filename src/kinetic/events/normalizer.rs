// SPDX-License-Identifier: MIT

//! Event normalization - converts legacy and v2 wire events to `RunEvent`

use super::wire::{Envelope, WireEvent};
use super::{EventKind, RunEvent, ToolPhase};
use serde::Deserialize;
use serde_json::Value;

/// Normalize one wire event
///
/// Returns `None` for unknown types and malformed payloads; those are
/// dropped, never errors.
pub fn normalize(value: &Value) -> Option<RunEvent> {
    let wire = match WireEvent::deserialize(value) {
        Ok(wire) => wire,
        Err(e) => {
            log::debug!("Dropping malformed event: {}", e);
            return None;
        }
    };
    let envelope = Envelope::from_value(value);

    match wire {
        WireEvent::ToolEvent { event } => normalize_legacy(&event, envelope),
        other => convert(other, envelope, value),
    }
}

/// Normalize one event from its JSON text
pub fn normalize_str(text: &str) -> Option<RunEvent> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => normalize(&value),
        Err(e) => {
            log::debug!("Dropping non-JSON event payload: {}", e);
            None
        }
    }
}

/// Unwrap the legacy `tool_event` shape
///
/// Identity fields on the inner event win over the wrapper's.
fn normalize_legacy(inner: &Value, outer: Envelope) -> Option<RunEvent> {
    let wire = match WireEvent::deserialize(inner) {
        Ok(wire) => wire,
        Err(e) => {
            log::debug!("Dropping malformed legacy event: {}", e);
            return None;
        }
    };
    let envelope = Envelope::from_value(inner).or(outer);

    match wire {
        WireEvent::ToolEvent { .. } => {
            log::debug!("Dropping doubly wrapped tool_event");
            None
        }
        other => convert(other, envelope, inner),
    }
}

fn convert(wire: WireEvent, envelope: Envelope, raw: &Value) -> Option<RunEvent> {
    let kind = match wire {
        WireEvent::Init {
            state,
            existing_content,
        } => EventKind::Init {
            snapshot: state.map(|s| s.into_snapshot(envelope.timestamp)),
            existing_content,
        },
        WireEvent::GraphStart => EventKind::GraphStart,
        WireEvent::NodeStart { node_id } => EventKind::NodeStart { node_id },
        WireEvent::NodeProgress {
            node_id,
            step,
            progress,
            data,
        } => EventKind::NodeProgress {
            node_id,
            step,
            progress,
            data,
        },
        WireEvent::NodeComplete { node_id } => EventKind::NodeComplete { node_id },
        WireEvent::NodeError { node_id, error } => EventKind::NodeError { node_id, error },
        WireEvent::GraphComplete => EventKind::GraphComplete,
        WireEvent::GraphError { error } => EventKind::GraphError { error },
        WireEvent::RunComplete => EventKind::RunComplete,
        WireEvent::RunError { error } => EventKind::RunError { error },
        WireEvent::ToolStart { name } => tool(ToolPhase::Start, name, raw),
        WireEvent::ToolCall { name } => tool(ToolPhase::Call, name, raw),
        WireEvent::ToolResult { name } => tool(ToolPhase::Result, name, raw),
        WireEvent::ToolEnd { name } => tool(ToolPhase::End, name, raw),
        WireEvent::ToolError { name } => tool(ToolPhase::Error, name, raw),
        WireEvent::ToolEvent { .. } => return None,
        WireEvent::Unknown => {
            log::debug!(
                "Dropping unknown event type: {}",
                raw.get("type").and_then(|t| t.as_str()).unwrap_or("<missing>")
            );
            return None;
        }
    };

    Some(RunEvent {
        run_id: envelope.run_id,
        graph_id: envelope.graph_id,
        timestamp: envelope.timestamp,
        kind,
    })
}

fn tool(phase: ToolPhase, name: Option<String>, raw: &Value) -> EventKind {
    EventKind::Tool {
        phase,
        name,
        payload: raw.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinetic::run::{NodeStatus, RunStatus};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_flat_and_legacy_converge() {
        let flat = json!({"type": "node_start", "nodeId": "a", "runId": "r1", "timestamp": 10});
        let legacy = json!({
            "type": "tool_event",
            "runId": "r1",
            "event": {"type": "node_start", "nodeId": "a", "timestamp": 10}
        });

        let a = normalize(&flat).unwrap();
        let b = normalize(&legacy).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.run_id.as_deref(), Some("r1"));
        assert_eq!(a.timestamp, Some(Utc.timestamp_millis_opt(10).unwrap()));
    }

    #[test]
    fn test_legacy_inner_identity_wins() {
        let legacy = json!({
            "type": "tool_event",
            "runId": "outer",
            "event": {"type": "graph_start", "runId": "inner"}
        });
        let event = normalize(&legacy).unwrap();
        assert_eq!(event.run_id.as_deref(), Some("inner"));
        assert_eq!(event.kind, EventKind::GraphStart);
    }

    #[test]
    fn test_unknown_types_dropped() {
        assert!(normalize(&json!({"type": "heartbeat"})).is_none());
        assert!(normalize(&json!({"type": "tool_event", "event": {"type": "mystery"}})).is_none());
        assert!(normalize(&json!({"no_type": true})).is_none());
        assert!(normalize_str("not json").is_none());
    }

    #[test]
    fn test_malformed_known_type_dropped() {
        // node_start without a node id
        assert!(normalize(&json!({"type": "node_start"})).is_none());
    }

    #[test]
    fn test_run_level_events() {
        let complete = normalize(&json!({"type": "run_complete"})).unwrap();
        assert_eq!(complete.kind, EventKind::RunComplete);

        let error = normalize(&json!({"type": "run_error", "error": "boom"})).unwrap();
        assert_eq!(
            error.kind,
            EventKind::RunError {
                error: Some("boom".to_string())
            }
        );

        let graph_error = normalize_str(r#"{"type":"graph_error","error":"bad"}"#).unwrap();
        assert_eq!(graph_error.type_name(), "graph_error");
    }

    #[test]
    fn test_node_progress_fields() {
        let event = normalize(&json!({
            "type": "node_progress",
            "nodeId": "a",
            "step": "fetching",
            "progress": 0.5,
            "data": {"rows": 3}
        }))
        .unwrap();
        match event.kind {
            EventKind::NodeProgress {
                node_id,
                step,
                progress,
                data,
            } => {
                assert_eq!(node_id, "a");
                assert_eq!(step.as_deref(), Some("fetching"));
                assert_eq!(progress, Some(0.5));
                assert_eq!(data, Some(json!({"rows": 3})));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tool_events_pass_through() {
        let event = normalize(&json!({
            "type": "tool_event",
            "event": {"type": "tool_start", "tool": "search", "args": {"q": "rust"}}
        }))
        .unwrap();
        match event.kind {
            EventKind::Tool {
                phase,
                name,
                payload,
            } => {
                assert_eq!(phase, ToolPhase::Start);
                assert_eq!(name.as_deref(), Some("search"));
                assert_eq!(payload["args"]["q"], "rust");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_init_carries_snapshot_timestamp() {
        let event = normalize(&json!({
            "type": "init",
            "timestamp": "2024-05-01T10:00:20Z",
            "state": {
                "runId": "r1",
                "status": "running",
                "graph": {"executionPath": ["a"], "nodeProgress": {"a": "running"}}
            },
            "existingContent": "partial answer"
        }))
        .unwrap();

        let EventKind::Init {
            snapshot: Some(snapshot),
            existing_content,
        } = event.kind
        else {
            panic!("expected init snapshot");
        };
        assert_eq!(
            snapshot.state_timestamp,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 20).unwrap())
        );
        assert_eq!(snapshot.status, RunStatus::Running);
        assert_eq!(snapshot.node_progress["a"].status, NodeStatus::Running);
        assert_eq!(existing_content, Some(json!("partial answer")));
    }

    #[test]
    fn test_init_without_state() {
        let event = normalize(&json!({"type": "init", "timestamp": 3})).unwrap();
        assert!(matches!(event.kind, EventKind::Init { snapshot: None, .. }));
    }
}
