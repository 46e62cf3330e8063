//! Core identifiers and small shared types

use serde::{Deserialize, Serialize};

/// Unique identifier for a node
pub type NodeId = String;

/// Unique identifier for a connection
pub type ConnectionId = String;

/// Unique identifier for a group
pub type GroupId = String;

/// Position of a node on the canvas (x, y)
pub type Position = (f64, f64);

/// Generate a fresh identifier
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Category of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    /// Nodes producing values (constants, sources)
    Input,
    /// Sinks and display nodes
    Output,
    /// Arithmetic and transformation nodes
    Processing,
    /// Collection construction and access
    Data,
    /// Control flow nodes driven by flow ports
    Control,
}

/// Per-run execution state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    NotStarted,
    Running,
    Completed,
    Failed,
}
