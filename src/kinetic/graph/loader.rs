// SPDX-License-Identifier: MIT

//! Graph loader - YAML/JSON file loading and parsing
//!
//! This module handles loading graph definitions exported by the authoring
//! surface. Both YAML and JSON are accepted; JSON is valid YAML but is
//! parsed with serde_json so error positions stay meaningful.

use super::types::GraphDefinition;
use crate::kinetic::error::{GraphError, MonitorError};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Loads graph definitions from files or strings
pub struct GraphLoader;

impl GraphLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a graph definition from a `.yaml`, `.yml` or `.json` file
    pub fn load_graph<P: AsRef<Path>>(&self, path: P) -> Result<GraphDefinition, MonitorError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GraphError::FileNotFound(path.display().to_string()).into());
        }

        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::parse_yaml(&content),
            Some("json") => Self::parse_json(&content),
            other => Err(GraphError::UnsupportedFormat(other.unwrap_or("").to_string()).into()),
        }
    }

    /// Parse a graph definition from a YAML string
    pub fn parse_yaml(content: &str) -> Result<GraphDefinition, MonitorError> {
        let def: GraphDefinition = serde_yaml::from_str(content)?;
        Self::validate(def)
    }

    /// Parse a graph definition from a JSON string
    pub fn parse_json(content: &str) -> Result<GraphDefinition, MonitorError> {
        let def: GraphDefinition = serde_json::from_str(content)?;
        Self::validate(def)
    }

    /// Reject definitions whose node ids collide
    ///
    /// Dangling edges are left alone; layout drops them with a warning.
    fn validate(def: GraphDefinition) -> Result<GraphDefinition, MonitorError> {
        let mut seen: HashSet<&str> = HashSet::new();
        for node in &def.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateNode(node.id.clone()).into());
            }
        }
        Ok(def)
    }
}

impl Default for GraphLoader {
    fn default() -> Self {
        Self::new()
    }
}
