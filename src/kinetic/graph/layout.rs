// SPDX-License-Identifier: MIT

//! Layered graph layout
//!
//! Nodes are ranked with a cycle-tolerant variant of Kahn's topological
//! sort, grouped per rank, and placed on a grid where every rank is centred
//! against the widest one. The result is a pure function of the definition,
//! the orientation and the options: no state survives between calls.

use super::edges::{classify_edges, consolidate, expand_edges, Adjacency, EdgeInfo};
use super::types::{is_sentinel, GraphDefinition, Orientation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Node box size and spacing, in pixels
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LayoutOptions {
    pub node_width: f64,
    pub node_height: f64,
    /// Gap between neighbours within a rank
    pub node_gap: f64,
    /// Gap between consecutive ranks
    pub rank_gap: f64,
    /// Margin around the whole drawing
    pub padding: f64,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            node_width: 180.0,
            node_height: 60.0,
            node_gap: 40.0,
            rank_gap: 80.0,
            padding: 40.0,
        }
    }
}

/// A positioned node
///
/// `x`/`y` are the top-left corner of the node box.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LayoutNode {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub level: usize,
    pub children: Vec<String>,
    pub parents: Vec<String>,
}

/// Complete layout of one graph definition
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LayoutResult {
    pub orientation: Orientation,
    pub nodes: BTreeMap<String, LayoutNode>,
    /// Edges to draw: one per bidirectional pair
    pub edges: Vec<EdgeInfo>,
    /// Every expanded edge, classified
    pub classified_edges: Vec<EdgeInfo>,
    /// Node ids per rank, in declaration order
    pub levels: Vec<Vec<String>>,
    pub width: f64,
    pub height: f64,
}

impl LayoutResult {
    pub fn node(&self, id: &str) -> Option<&LayoutNode> {
        self.nodes.get(id)
    }

    pub fn level_of(&self, id: &str) -> Option<usize> {
        self.nodes.get(id).map(|n| n.level)
    }

    /// Find the rendered edge between two nodes, in that direction
    pub fn edge(&self, from: &str, to: &str) -> Option<&EdgeInfo> {
        self.edges.iter().find(|e| e.from == from && e.to == to)
    }

    /// Classification of a declared edge, drawn or not
    pub fn classification(&self, from: &str, to: &str) -> Option<&EdgeInfo> {
        self.classified_edges
            .iter()
            .find(|e| e.from == from && e.to == to)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Lay out a graph with default node sizes
pub fn layout(graph: &GraphDefinition, orientation: Orientation) -> LayoutResult {
    layout_with(graph, orientation, &LayoutOptions::default())
}

/// Lay out a graph
///
/// Never fails: dangling edges are dropped and nodes stuck in cycles are
/// force-ranked, so a malformed definition still yields a drawing.
pub fn layout_with(
    graph: &GraphDefinition,
    orientation: Orientation,
    options: &LayoutOptions,
) -> LayoutResult {
    let order = declaration_order(graph);
    if order.is_empty() {
        return LayoutResult {
            orientation,
            ..Default::default()
        };
    }

    let edges = expand_edges(graph);
    let adjacency = Adjacency::build(graph, &edges);
    let node_levels = assign_levels(graph, &order, &adjacency);

    let level_count = node_levels.values().copied().max().map_or(0, |m| m + 1);
    let mut levels: Vec<Vec<String>> = vec![Vec::new(); level_count];
    for id in &order {
        let level = node_levels.get(*id).copied().unwrap_or(0);
        levels[level].push(id.to_string());
    }

    let (cross_size, rank_size) = match orientation {
        Orientation::Horizontal => (options.node_height, options.node_width),
        Orientation::Vertical => (options.node_width, options.node_height),
    };
    let cross_step = cross_size + options.node_gap;
    let rank_step = rank_size + options.rank_gap;
    let span = |count: usize| {
        if count == 0 {
            0.0
        } else {
            count as f64 * cross_step - options.node_gap
        }
    };

    let widest = span(levels.iter().map(|l| l.len()).max().unwrap_or(0));
    let mut nodes = BTreeMap::new();

    for (level, ids) in levels.iter().enumerate() {
        let offset = (widest - span(ids.len())) / 2.0;
        for (i, id) in ids.iter().enumerate() {
            let cross = options.padding + offset + i as f64 * cross_step;
            let rank = options.padding + level as f64 * rank_step;
            let (x, y) = match orientation {
                Orientation::Horizontal => (rank, cross),
                Orientation::Vertical => (cross, rank),
            };
            nodes.insert(
                id.clone(),
                LayoutNode {
                    id: id.clone(),
                    x,
                    y,
                    level,
                    children: adjacency.children_of(id).to_vec(),
                    parents: adjacency.parents_of(id).to_vec(),
                },
            );
        }
    }

    let rank_extent = levels.len() as f64 * rank_step - options.rank_gap;
    let (width, height) = match orientation {
        Orientation::Horizontal => (rank_extent, widest),
        Orientation::Vertical => (widest, rank_extent),
    };

    let classified_edges = classify_edges(&edges, &node_levels);
    LayoutResult {
        orientation,
        nodes,
        edges: consolidate(&classified_edges),
        classified_edges,
        levels,
        width: width + 2.0 * options.padding,
        height: height + 2.0 * options.padding,
    }
}

/// Declared, non-sentinel node ids, first occurrence wins
fn declaration_order(graph: &GraphDefinition) -> Vec<&str> {
    let mut seen = HashSet::new();
    graph
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| !is_sentinel(id) && seen.insert(*id))
        .collect()
}

/// Rank every node, tolerating cycles
///
/// Kahn's algorithm over a FIFO worklist, bounded to `3 * |nodes|` steps.
/// When the worklist drains while nodes remain (a cycle with no fully ranked
/// parent), the first such node that has at least one ranked parent is
/// forced through. Anything left once the bound trips is ranked from
/// whatever parents are available, defaulting to 0.
fn assign_levels(
    graph: &GraphDefinition,
    order: &[&str],
    adjacency: &Adjacency,
) -> HashMap<String, usize> {
    let entries: HashSet<String> = graph.entry_nodes().into_iter().collect();

    let mut pending: HashMap<String, usize> = order
        .iter()
        .map(|id| {
            let count = if entries.contains(*id) {
                0
            } else {
                adjacency
                    .parents_of(id)
                    .iter()
                    .filter(|p| p.as_str() != *id)
                    .count()
            };
            (id.to_string(), count)
        })
        .collect();

    let mut queue: VecDeque<String> = VecDeque::new();
    for id in graph.entry_nodes() {
        queue.push_back(id);
    }
    for id in order {
        if !entries.contains(*id) && pending.get(*id) == Some(&0) {
            queue.push_back(id.to_string());
        }
    }

    let mut levels: HashMap<String, usize> = HashMap::new();
    let max_iterations = 3 * order.len();
    let mut iterations = 0;

    'outer: loop {
        while let Some(id) = queue.pop_front() {
            if levels.contains_key(&id) {
                continue;
            }
            iterations += 1;
            if iterations > max_iterations {
                log::warn!(
                    "Layout exceeded {} iterations, finalizing remaining nodes",
                    max_iterations
                );
                break 'outer;
            }
            finalize(&id, &entries, adjacency, &mut levels, &mut pending, &mut queue);
        }

        let unranked = order.iter().filter(|id| !levels.contains_key(**id));
        let mut stuck = None;
        for id in unranked {
            let has_ranked_parent = adjacency
                .parents_of(id)
                .iter()
                .any(|p| levels.contains_key(p));
            if has_ranked_parent {
                stuck = Some(*id);
                break;
            }
            stuck.get_or_insert(*id);
        }

        match stuck {
            Some(id) => {
                log::debug!("Forcing rank for node {} stuck in a cycle", id);
                queue.push_back(id.to_string());
            }
            None => break,
        }
    }

    for id in order {
        if !levels.contains_key(*id) {
            let level = rank_from_parents(id, &entries, adjacency, &levels);
            levels.insert(id.to_string(), level);
        }
    }

    levels
}

fn rank_from_parents(
    id: &str,
    entries: &HashSet<String>,
    adjacency: &Adjacency,
    levels: &HashMap<String, usize>,
) -> usize {
    if entries.contains(id) {
        return 0;
    }
    adjacency
        .parents_of(id)
        .iter()
        .filter(|p| p.as_str() != id)
        .filter_map(|p| levels.get(p))
        .max()
        .map_or(0, |l| l + 1)
}

fn finalize(
    id: &str,
    entries: &HashSet<String>,
    adjacency: &Adjacency,
    levels: &mut HashMap<String, usize>,
    pending: &mut HashMap<String, usize>,
    queue: &mut VecDeque<String>,
) {
    let level = rank_from_parents(id, entries, adjacency, levels);
    levels.insert(id.to_string(), level);

    for child in adjacency.children_of(id) {
        if child == id || levels.contains_key(child) {
            continue;
        }
        if let Some(count) = pending.get_mut(child) {
            if *count == 1 {
                queue.push_back(child.clone());
            }
            *count = count.saturating_sub(1);
        }
    }
}
