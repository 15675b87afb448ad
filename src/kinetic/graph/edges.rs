// SPDX-License-Identifier: MIT

//! Edge classification
//!
//! Conditional fan-outs are expanded into one concrete edge per branch, the
//! adjacency used for leveling is built from those, and once levels are
//! final every edge is labelled as forward, back-edge or bidirectional.

use super::types::{is_sentinel, GraphDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Label given to fallback branches
pub const FALLBACK_LABEL: &str = "default";

/// One concrete edge after conditional expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedEdge {
    pub from: String,
    pub to: String,
    pub condition: Option<String>,
    pub is_fallback: bool,
}

/// How a renderer should draw an edge
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EdgeRoute {
    /// Forward edge between consecutive or later ranks
    Straight,
    /// Back-edge, drawn curved around the ranks it skips
    Curved,
    /// Edge from a node to itself
    SelfLoop,
}

/// A classified edge, ready for rendering
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EdgeInfo {
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Inline label: the condition value, or "default" for fallbacks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub is_fallback: bool,
    pub is_back_edge: bool,
    pub is_bidirectional: bool,
    pub route: EdgeRoute,
}

/// Parent/child lists per node, deduplicated, in edge order
#[derive(Debug, Clone, Default)]
pub struct Adjacency {
    pub parents: HashMap<String, Vec<String>>,
    pub children: HashMap<String, Vec<String>>,
}

/// Expand a graph's edges into concrete renderable edges
///
/// Edges touching `__start__`/`__end__` are not rendered; they only seed
/// entry nodes. Edges whose endpoints are not declared nodes are dropped.
pub fn expand_edges(graph: &GraphDefinition) -> Vec<ExpandedEdge> {
    let declared: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut expanded = Vec::new();

    for edge in &graph.edges {
        let mut concrete: Vec<ExpandedEdge> = Vec::new();
        if let Some(to) = &edge.to {
            concrete.push(ExpandedEdge {
                from: edge.from.clone(),
                to: to.clone(),
                condition: edge.condition.clone(),
                is_fallback: false,
            });
        }
        if let Some(targets) = &edge.targets {
            for (value, target) in targets {
                concrete.push(ExpandedEdge {
                    from: edge.from.clone(),
                    to: target.clone(),
                    condition: Some(value.clone()),
                    is_fallback: false,
                });
            }
        }
        if let Some(fallback) = &edge.fallback {
            concrete.push(ExpandedEdge {
                from: edge.from.clone(),
                to: fallback.clone(),
                condition: None,
                is_fallback: true,
            });
        }

        for e in concrete {
            if is_sentinel(&e.from) || is_sentinel(&e.to) {
                continue;
            }
            if !declared.contains(e.from.as_str()) || !declared.contains(e.to.as_str()) {
                log::warn!("Dropping dangling edge {} -> {}", e.from, e.to);
                continue;
            }
            expanded.push(e);
        }
    }

    expanded
}

impl Adjacency {
    /// Build parent/child lists for every declared node
    pub fn build(graph: &GraphDefinition, edges: &[ExpandedEdge]) -> Self {
        let mut adjacency = Adjacency::default();
        for node in graph.nodes.iter().filter(|n| !is_sentinel(&n.id)) {
            adjacency.parents.entry(node.id.clone()).or_default();
            adjacency.children.entry(node.id.clone()).or_default();
        }

        for edge in edges {
            let children = adjacency.children.entry(edge.from.clone()).or_default();
            if !children.contains(&edge.to) {
                children.push(edge.to.clone());
            }
            let parents = adjacency.parents.entry(edge.to.clone()).or_default();
            if !parents.contains(&edge.from) {
                parents.push(edge.from.clone());
            }
        }
        adjacency
    }

    pub fn parents_of(&self, id: &str) -> &[String] {
        self.parents.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn children_of(&self, id: &str) -> &[String] {
        self.children.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// Key identifying an unordered node pair
pub fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}|{}", a, b)
    } else {
        format!("{}|{}", b, a)
    }
}

/// Classify edges once levels are final
///
/// `level(to) <= level(from)` makes a back-edge, so self-loops always are.
/// Both halves of an opposite-direction pair are flagged bidirectional;
/// [`consolidate`] picks the one to draw.
pub fn classify_edges(edges: &[ExpandedEdge], levels: &HashMap<String, usize>) -> Vec<EdgeInfo> {
    let directed: HashSet<(&str, &str)> = edges
        .iter()
        .map(|e| (e.from.as_str(), e.to.as_str()))
        .collect();

    edges
        .iter()
        .map(|edge| {
            let from = edge.from.as_str();
            let to = edge.to.as_str();
            let is_bidirectional = from != to && directed.contains(&(to, from));

            let from_level = levels.get(from).copied().unwrap_or(0);
            let to_level = levels.get(to).copied().unwrap_or(0);
            let is_back_edge = to_level <= from_level;

            let route = if from == to {
                EdgeRoute::SelfLoop
            } else if is_back_edge {
                EdgeRoute::Curved
            } else {
                EdgeRoute::Straight
            };

            let label = if edge.is_fallback {
                Some(FALLBACK_LABEL.to_string())
            } else {
                edge.condition.clone()
            };

            EdgeInfo {
                from: edge.from.clone(),
                to: edge.to.clone(),
                condition: edge.condition.clone(),
                label,
                is_fallback: edge.is_fallback,
                is_back_edge,
                is_bidirectional,
                route,
            }
        })
        .collect()
}

/// Reduce classified edges to the ones drawn
///
/// Of each bidirectional pair only the direction seen first in input order
/// survives. Everything else passes through in order.
pub fn consolidate(classified: &[EdgeInfo]) -> Vec<EdgeInfo> {
    let mut kept_direction: HashMap<String, (&str, &str)> = HashMap::new();

    classified
        .iter()
        .filter(|&edge| {
            if !edge.is_bidirectional {
                return true;
            }
            let direction = (edge.from.as_str(), edge.to.as_str());
            let kept = *kept_direction
                .entry(pair_key(&edge.from, &edge.to))
                .or_insert(direction);
            kept == direction
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinetic::graph::types::{EdgeDef, NodeDef, END_NODE, START_NODE};
    use std::collections::BTreeMap;

    fn graph(nodes: &[&str], edges: Vec<EdgeDef>) -> GraphDefinition {
        GraphDefinition {
            id: None,
            name: "test".to_string(),
            nodes: nodes.iter().map(|id| NodeDef::new(*id, "agent")).collect(),
            edges,
        }
    }

    fn levels(pairs: &[(&str, usize)]) -> HashMap<String, usize> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn edge(from: &str, to: &str) -> ExpandedEdge {
        ExpandedEdge {
            from: from.to_string(),
            to: to.to_string(),
            condition: None,
            is_fallback: false,
        }
    }

    #[test]
    fn test_expand_skips_sentinels_and_dangling() {
        let g = graph(
            &["a", "b"],
            vec![
                EdgeDef::new(START_NODE, "a"),
                EdgeDef::new("a", "b"),
                EdgeDef::new("b", "ghost"),
                EdgeDef::new("b", END_NODE),
            ],
        );
        let edges = expand_edges(&g);
        assert_eq!(edges, vec![edge("a", "b")]);
    }

    #[test]
    fn test_expand_conditional_fan_out() {
        let mut targets = BTreeMap::new();
        targets.insert("search".to_string(), "b".to_string());
        targets.insert("chat".to_string(), "c".to_string());
        let g = graph(
            &["a", "b", "c"],
            vec![EdgeDef {
                from: "a".to_string(),
                targets: Some(targets),
                fallback: Some("c".to_string()),
                ..Default::default()
            }],
        );
        let edges = expand_edges(&g);
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[0].condition.as_deref(), Some("chat"));
        assert_eq!(edges[1].condition.as_deref(), Some("search"));
        assert!(edges[2].is_fallback);
        assert_eq!(edges[2].to, "c");
    }

    #[test]
    fn test_adjacency_dedupes() {
        let g = graph(&["a", "b", "lonely"], vec![]);
        let edges = vec![edge("a", "b"), edge("a", "b")];
        let adj = Adjacency::build(&g, &edges);
        assert_eq!(adj.children_of("a"), &["b".to_string()]);
        assert_eq!(adj.parents_of("b"), &["a".to_string()]);
        assert!(adj.parents_of("lonely").is_empty());
        assert!(adj.children_of("unknown").is_empty());
    }

    #[test]
    fn test_back_edge_by_level() {
        let classified = classify_edges(
            &[edge("a", "b"), edge("b", "c"), edge("c", "a")],
            &levels(&[("a", 0), ("b", 1), ("c", 2)]),
        );
        assert!(!classified[0].is_back_edge);
        assert!(!classified[1].is_back_edge);
        assert!(classified[2].is_back_edge);
        assert_eq!(classified[2].route, EdgeRoute::Curved);
    }

    #[test]
    fn test_same_level_is_back_edge() {
        let classified = classify_edges(&[edge("a", "b")], &levels(&[("a", 1), ("b", 1)]));
        assert!(classified[0].is_back_edge);
    }

    #[test]
    fn test_self_loop() {
        let classified = classify_edges(&[edge("a", "a")], &levels(&[("a", 0)]));
        assert_eq!(classified.len(), 1);
        assert!(classified[0].is_back_edge);
        assert!(!classified[0].is_bidirectional);
        assert_eq!(classified[0].route, EdgeRoute::SelfLoop);
    }

    #[test]
    fn test_bidirectional_flags_both_halves() {
        let classified = classify_edges(
            &[edge("b", "a"), edge("a", "b")],
            &levels(&[("a", 0), ("b", 1)]),
        );
        assert_eq!(classified.len(), 2);
        assert!(classified.iter().all(|e| e.is_bidirectional));
        assert!(classified[0].is_back_edge);
        assert!(!classified[1].is_back_edge);
    }

    #[test]
    fn test_consolidate_keeps_first_direction() {
        let classified = classify_edges(
            &[edge("b", "a"), edge("c", "d"), edge("a", "b")],
            &levels(&[("a", 0), ("b", 1), ("c", 0), ("d", 1)]),
        );
        let rendered = consolidate(&classified);
        let pairs: Vec<(&str, &str)> = rendered
            .iter()
            .map(|e| (e.from.as_str(), e.to.as_str()))
            .collect();
        assert_eq!(pairs, vec![("b", "a"), ("c", "d")]);
        assert!(rendered[0].is_bidirectional);
        assert!(!rendered[1].is_bidirectional);
    }

    #[test]
    fn test_fallback_label() {
        let mut fallback = edge("a", "b");
        fallback.is_fallback = true;
        let mut conditional = edge("a", "c");
        conditional.condition = Some("yes".to_string());
        let classified = classify_edges(
            &[fallback, conditional],
            &levels(&[("a", 0), ("b", 1), ("c", 1)]),
        );
        assert_eq!(classified[0].label.as_deref(), Some(FALLBACK_LABEL));
        assert_eq!(classified[1].label.as_deref(), Some("yes"));
    }

    #[test]
    fn test_pair_key_is_symmetric() {
        assert_eq!(pair_key("x", "y"), pair_key("y", "x"));
        assert_eq!(pair_key("x", "y"), "x|y");
    }
}
