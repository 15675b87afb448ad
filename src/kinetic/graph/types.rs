// SPDX-License-Identifier: MIT

//! Graph definition type definitions
//!
//! The static node/edge description of a workflow, as authored independently
//! of any run. It is read-only to layout and reconciliation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Sentinel marking where execution enters the graph
pub const START_NODE: &str = "__start__";
/// Sentinel marking where execution leaves the graph
pub const END_NODE: &str = "__end__";

/// Check whether an id is one of the two boundary sentinels
pub fn is_sentinel(id: &str) -> bool {
    id == START_NODE || id == END_NODE
}

/// A workflow graph definition
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GraphDefinition {
    /// Graph identifier, if the authoring surface assigned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Human readable name
    #[serde(default)]
    pub name: String,
    /// Nodes in declaration order
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    /// Edges in declaration order
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
}

/// A node in the workflow graph
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeDef {
    /// Unique identifier for this node
    pub id: String,
    /// Node kind as reported by the authoring surface (agent, tool, router...)
    #[serde(rename = "type", default)]
    pub node_type: String,
    /// Label shown to users
    #[serde(default, alias = "display_name", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// An edge, either plain (`to`) or a conditional fan-out (`targets`)
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDef {
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Condition guarding a plain edge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Conditional fan-out: condition value -> target node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<BTreeMap<String, String>>,
    /// Target taken when no condition value matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

/// Direction in which topological ranks advance
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Ranks advance left to right
    #[default]
    Horizontal,
    /// Ranks advance top to bottom
    Vertical,
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "horizontal" | "lr" => Ok(Orientation::Horizontal),
            "vertical" | "tb" => Ok(Orientation::Vertical),
            other => Err(format!("Unknown orientation: {}", other)),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Horizontal => write!(f, "horizontal"),
            Orientation::Vertical => write!(f, "vertical"),
        }
    }
}

impl GraphDefinition {
    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Check whether a node id is declared
    pub fn contains(&self, id: &str) -> bool {
        self.node(id).is_some()
    }

    /// Nodes execution enters first
    ///
    /// Targets of edges leaving `__start__`, in edge order. When nothing is
    /// wired to the start sentinel, the first declared node.
    pub fn entry_nodes(&self) -> Vec<String> {
        let mut entries: Vec<String> = Vec::new();
        for edge in self.edges.iter().filter(|e| e.from == START_NODE) {
            for target in edge.all_targets() {
                if !is_sentinel(target) && self.contains(target) && !entries.iter().any(|e| e == target) {
                    entries.push(target.to_string());
                }
            }
        }

        if entries.is_empty() {
            if let Some(first) = self.nodes.iter().find(|n| !is_sentinel(&n.id)) {
                entries.push(first.id.clone());
            }
        }
        entries
    }

    /// The first entry node, used for the optimistic run start
    pub fn entry_node(&self) -> Option<String> {
        self.entry_nodes().into_iter().next()
    }
}

impl EdgeDef {
    /// Plain edge between two nodes
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: Some(to.into()),
            ..Default::default()
        }
    }

    /// Every node this edge can lead to: `to`, each branch target, then the fallback
    pub fn all_targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = Vec::new();
        if let Some(to) = &self.to {
            targets.push(to);
        }
        if let Some(branches) = &self.targets {
            targets.extend(branches.values().map(|t| t.as_str()));
        }
        if let Some(fallback) = &self.fallback {
            targets.push(fallback);
        }
        targets
    }

    /// Whether this edge is a conditional fan-out
    pub fn is_conditional(&self) -> bool {
        self.targets.as_ref().is_some_and(|t| !t.is_empty()) || self.fallback.is_some()
    }
}

impl NodeDef {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            display_name: None,
        }
    }

    /// Label for rendering, falling back to the id
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[&str], edges: Vec<EdgeDef>) -> GraphDefinition {
        GraphDefinition {
            id: None,
            name: "test".to_string(),
            nodes: nodes.iter().map(|id| NodeDef::new(*id, "agent")).collect(),
            edges,
        }
    }

    #[test]
    fn test_entry_from_start_sentinel() {
        let g = graph(
            &["a", "b"],
            vec![EdgeDef::new(START_NODE, "b"), EdgeDef::new("b", "a")],
        );
        assert_eq!(g.entry_nodes(), vec!["b".to_string()]);
    }

    #[test]
    fn test_entry_defaults_to_first_node() {
        let g = graph(&["a", "b"], vec![EdgeDef::new("a", "b")]);
        assert_eq!(g.entry_node(), Some("a".to_string()));
    }

    #[test]
    fn test_entry_empty_graph() {
        let g = GraphDefinition::default();
        assert!(g.entry_nodes().is_empty());
    }

    #[test]
    fn test_all_targets_order() {
        let mut targets = BTreeMap::new();
        targets.insert("yes".to_string(), "b".to_string());
        targets.insert("no".to_string(), "c".to_string());
        let edge = EdgeDef {
            from: "a".to_string(),
            targets: Some(targets),
            fallback: Some("d".to_string()),
            ..Default::default()
        };
        // BTreeMap orders branches by condition value
        assert_eq!(edge.all_targets(), vec!["c", "b", "d"]);
        assert!(edge.is_conditional());
    }

    #[test]
    fn test_orientation_parse() {
        assert_eq!("vertical".parse::<Orientation>(), Ok(Orientation::Vertical));
        assert_eq!("LR".parse::<Orientation>(), Ok(Orientation::Horizontal));
        assert!("diagonal".parse::<Orientation>().is_err());
        assert_eq!(Orientation::default(), Orientation::Horizontal);
    }

    #[test]
    fn test_node_deserialize() {
        let json = r#"{"id": "classify", "type": "router", "displayName": "Classify"}"#;
        let node: NodeDef = serde_json::from_str(json).unwrap();
        assert_eq!(node.node_type, "router");
        assert_eq!(node.label(), "Classify");
    }

    #[test]
    fn test_edge_deserialize_conditional_yaml() {
        let yaml = r#"
            from: classify
            targets:
              search: searcher
              chat: chatter
            fallback: chatter
        "#;
        let edge: EdgeDef = serde_yaml::from_str(yaml).unwrap();
        assert!(edge.to.is_none());
        assert_eq!(edge.targets.as_ref().unwrap().len(), 2);
        assert_eq!(edge.fallback.as_deref(), Some("chatter"));
    }
}
