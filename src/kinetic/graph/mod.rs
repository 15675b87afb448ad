// SPDX-License-Identifier: MIT

//! Graph definitions and their layout
//!
//! This module turns a static graph definition into a layered 2D layout
//! with classified edges. It never sees run state.

pub mod edges;
pub mod layout;
mod loader;
pub mod types;

pub use edges::{
    classify_edges, consolidate, expand_edges, Adjacency, EdgeInfo, EdgeRoute, ExpandedEdge,
};
pub use layout::{layout, layout_with, LayoutNode, LayoutOptions, LayoutResult};
pub use loader::GraphLoader;
pub use types::{
    is_sentinel, EdgeDef, GraphDefinition, NodeDef, Orientation, END_NODE, START_NODE,
};
