//! Per-run execution state and the context handed to processing routines

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::NodeError;
use crate::node::Node;
use crate::port::{Port, PortKind, WriteToken};
use crate::types::{new_id, NodeId, NodeState};
use crate::value::{DataType, FromValue, Value};

/// Node states of one run, keyed by node id
#[derive(Debug, Default)]
pub struct ExecutionStates {
    states: RwLock<HashMap<NodeId, NodeState>>,
}

impl ExecutionStates {
    pub fn get(&self, node_id: &str) -> NodeState {
        self.states
            .read()
            .get(node_id)
            .copied()
            .unwrap_or(NodeState::NotStarted)
    }

    pub(crate) fn set(&self, node_id: &str, state: NodeState) {
        self.states.write().insert(node_id.to_string(), state);
    }

    pub fn snapshot(&self) -> HashMap<NodeId, NodeState> {
        self.states.read().clone()
    }
}

/// State shared by every node of one scheduler run
#[derive(Debug)]
pub struct ExecutionContext {
    /// Unique id of this run
    pub execution_id: String,
    /// Cooperative cancellation flag
    pub abort_signal: Arc<AtomicBool>,
    states: ExecutionStates,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::with_abort_signal(Arc::new(AtomicBool::new(false)))
    }

    /// Context whose cancellation flag is shared with the caller
    pub fn with_abort_signal(abort_signal: Arc<AtomicBool>) -> Self {
        Self {
            execution_id: new_id(),
            abort_signal,
            states: ExecutionStates::default(),
        }
    }

    /// Check if execution has been aborted
    pub fn is_aborted(&self) -> bool {
        self.abort_signal.load(Ordering::Relaxed)
    }

    /// Request cancellation; levels not yet started will not run
    pub fn abort(&self) {
        self.abort_signal.store(true, Ordering::Relaxed);
    }

    pub fn states(&self) -> &ExecutionStates {
        &self.states
    }

    pub fn state(&self, node_id: &str) -> NodeState {
        self.states.get(node_id)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// What a node's `process` routine sees of the world
///
/// Holds the write token for the running node, so outputs can only be
/// published from here.
pub struct ProcessContext<'a> {
    node: &'a Node,
    token: WriteToken,
    execution: &'a ExecutionContext,
}

impl<'a> ProcessContext<'a> {
    pub(crate) fn new(node: &'a Node, execution: &'a ExecutionContext) -> Self {
        Self {
            node,
            token: WriteToken::new(node.id().clone()),
            execution,
        }
    }

    pub fn node(&self) -> &Node {
        self.node
    }

    pub fn execution_id(&self) -> &str {
        &self.execution.execution_id
    }

    pub fn token(&self) -> &WriteToken {
        &self.token
    }

    /// Input or published property readable as an input
    fn readable(&self, name: &str) -> Result<Arc<Port>, NodeError> {
        self.node
            .input(name)
            .or_else(|| self.node.property(name))
            .ok_or_else(|| NodeError::UnknownPort(name.to_string()))
    }

    /// Read an input (or property), coerced to its declared type
    pub fn input(&self, name: &str) -> Result<Value, NodeError> {
        self.readable(name)?
            .read()
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Read an input and extract it as `T`
    pub fn input_as<T: FromValue>(&self, name: &str) -> Result<T, NodeError> {
        let value = self.input(name)?;
        let target = T::data_type();
        let found = value.data_type();
        crate::coercion::convert(&value, &target)
            .and_then(T::from_value)
            .ok_or_else(|| NodeError::InvalidInput {
                port: name.to_string(),
                expected: target,
                found,
            })
    }

    /// Raw upstream value of an input, before coercion
    pub fn upstream(&self, name: &str) -> Option<Value> {
        self.readable(name).ok()?.upstream_value()
    }

    /// Type of the value feeding an input
    pub fn upstream_type(&self, name: &str) -> Option<DataType> {
        self.readable(name).ok()?.upstream_type()
    }

    /// Whether an input currently has a connection
    pub fn is_connected(&self, name: &str) -> bool {
        self.readable(name)
            .map(|port| port.is_connected())
            .unwrap_or(false)
    }

    pub fn property(&self, name: &str) -> Result<Value, NodeError> {
        self.node
            .property_value(name)
            .ok_or_else(|| NodeError::UnknownPort(name.to_string()))
    }

    pub fn property_as<T: FromValue>(&self, name: &str) -> Result<T, NodeError> {
        let value = self.property(name)?;
        let target = T::data_type();
        let found = value.data_type();
        crate::coercion::convert(&value, &target)
            .and_then(T::from_value)
            .ok_or_else(|| NodeError::InvalidInput {
                port: name.to_string(),
                expected: target,
                found,
            })
    }

    /// Publish a value on one of the node's outputs
    pub fn set_output(&self, name: &str, value: impl Into<Value>) -> Result<(), NodeError> {
        let port = self
            .node
            .port(PortKind::Output, name)
            .ok_or_else(|| NodeError::UnknownPort(name.to_string()))?;
        port.assign(value.into(), &self.token)
    }

    /// Declared type of one of the node's outputs
    pub fn output_type(&self, name: &str) -> Option<DataType> {
        self.node
            .output(name)
            .and_then(|port| port.data_type().cloned())
    }

    pub fn is_cancelled(&self) -> bool {
        self.execution.is_aborted()
    }

    /// Fail with `NodeError::Cancelled` if the run was aborted
    pub fn check_cancelled(&self) -> Result<(), NodeError> {
        if self.is_cancelled() {
            Err(NodeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Re-derive the node's shape from inside `process`
    pub fn reconfigure(&self) -> bool {
        self.node.reconfigure()
    }
}
