//! Error types for the graph engine

use std::fmt;

use thiserror::Error;

use crate::port::PortKind;
use crate::types::{ConnectionId, GroupId, NodeId};
use crate::value::DataType;

/// Result type alias using GraphError
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised by canvas mutation, planning and execution
#[derive(Debug, Error)]
pub enum GraphError {
    /// A connect/disconnect request was rejected
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// No node is flagged as an output node, so nothing can be planned
    #[error("Graph has no output nodes to execute")]
    NoOutputNodes,

    /// Node is not owned by this canvas
    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    /// Group is not owned by this canvas
    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    /// The node factory does not know this type key
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Node has no port with this name and kind
    #[error("Node '{node_id}' has no {kind:?} port named '{port}'")]
    UnknownPort {
        node_id: NodeId,
        port: String,
        kind: PortKind,
    },

    /// Node has no property with this name
    #[error("Node '{node_id}' has no property named '{name}'")]
    UnknownProperty { node_id: NodeId, name: String },

    /// A value cannot be stored in a slot of the given type
    #[error("Cannot store {found} value in '{name}' of type {expected}")]
    InvalidValue {
        name: String,
        expected: DataType,
        found: DataType,
    },

    /// A document could not be turned back into a graph
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Dependency cycle found while leveling
    #[error("Cycle detected at node '{node_name}' ({node_id})")]
    Cycle { node_id: NodeId, node_name: String },

    /// One or more nodes failed while running a level
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The run was cancelled before a level started
    #[error("Execution cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a connection request is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Port is not (or no longer) part of a node on this canvas
    #[error("Port '{0}' is not present on this canvas")]
    MissingPort(String),

    /// Source must be an output, target must be an input
    #[error("Cannot connect {from:?} port to {to:?} port")]
    InvalidDirection { from: PortKind, to: PortKind },

    /// Data ports and flow ports cannot be mixed
    #[error("Cannot connect a data port to a flow port")]
    EdgeKindMismatch,

    /// Both ports belong to the same node
    #[error("Cannot connect node '{0}' to itself")]
    SameNode(NodeId),

    /// Target type cannot accept source type
    #[error("Input of type {to} cannot accept {from}")]
    IncompatibleTypes { from: DataType, to: DataType },

    /// Identical connection already exists
    #[error("Connection from '{from}' to '{to}' already exists")]
    Duplicate { from: String, to: String },

    /// Connection is not (or no longer) registered
    #[error("Connection '{0}' is not connected")]
    NotConnected(ConnectionId),
}

/// Errors raised by a node's processing routine
#[derive(Debug, Error)]
pub enum NodeError {
    /// Missing required input
    #[error("Missing required input: {0}")]
    MissingInput(String),

    /// No such port on the running node
    #[error("No port named '{0}'")]
    UnknownPort(String),

    /// Input value cannot be extracted as the requested type
    #[error("Input '{port}' holds {found}, expected {expected}")]
    InvalidInput {
        port: String,
        expected: DataType,
        found: DataType,
    },

    /// Output value does not fit the port type
    #[error("Invalid output type for '{port}': expected {expected}, got {found}")]
    InvalidOutputType {
        port: String,
        expected: DataType,
        found: DataType,
    },

    /// Write attempted with another node's write token
    #[error("Port '{0}' belongs to another node")]
    ForeignPort(String),

    /// Node execution failed
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Node noticed the cancellation signal
    #[error("Execution cancelled")]
    Cancelled,
}

impl NodeError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }
}

/// A single node failure inside a scheduler run
#[derive(Debug, Error)]
#[error("Node '{node_name}' ({node_id}) failed: {source}")]
pub struct NodeFailure {
    pub node_id: NodeId,
    pub node_name: String,
    #[source]
    pub source: NodeError,
}

/// All failures of one execution level, reported together
#[derive(Debug)]
pub struct ExecutionError {
    failures: Vec<NodeFailure>,
}

impl ExecutionError {
    pub(crate) fn new(failures: Vec<NodeFailure>) -> Self {
        debug_assert!(!failures.is_empty());
        Self { failures }
    }

    /// Every failure, in level order
    pub fn failures(&self) -> &[NodeFailure] {
        &self.failures
    }

    /// Names of every failed node
    pub fn failed_nodes(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.node_name.as_str()).collect()
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Execution failed in {} node(s): {}",
            self.failures.len(),
            self.failed_nodes().join(", ")
        )
    }
}

impl std::error::Error for ExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|failure| failure as &(dyn std::error::Error + 'static))
    }
}
