// SPDX-License-Identifier: MIT

//! Typed error handling for kinetic-monitor
//!
//! Layout and reconciliation never fail: malformed topology degrades and
//! stale events are dropped. Errors only exist at the boundaries (loading
//! definitions, configuration, the transport, the HTTP surface).

use thiserror::Error;

/// Top-level error type for kinetic-monitor
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Configuration errors (bad env override, unreadable config file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Graph definition errors
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Event transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Run not known to the registry
    #[error("Run '{id}' not found")]
    RunNotFound { id: String },

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors raised while loading a graph definition
#[derive(Debug, Error)]
pub enum GraphError {
    /// File extension is neither YAML nor JSON
    #[error("Unsupported graph file format: {0}")]
    UnsupportedFormat(String),

    /// Graph file not found
    #[error("Graph file not found: {0}")]
    FileNotFound(String),

    /// Two nodes share an id
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),
}

/// Errors raised by an event source
///
/// A transport failure never touches engine state; the caller reconnects
/// and the next snapshot resumes from where the engine was left.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not open the stream
    #[error("Failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    /// Server answered with a non-success status
    #[error("Stream endpoint returned HTTP {status}")]
    Status { status: u16 },

    /// Stream dropped mid-flight
    #[error("Stream closed unexpectedly: {0}")]
    Closed(String),

    /// Invalid endpoint URL
    #[error(transparent)]
    Url(#[from] url::ParseError),

    /// HTTP client errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl MonitorError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a run not found error
    pub fn run_not_found(id: impl Into<String>) -> Self {
        Self::RunNotFound { id: id.into() }
    }
}

impl TransportError {
    /// Create a connect error
    pub fn connect(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            url: url.into(),
            message: message.into(),
        }
    }
}
