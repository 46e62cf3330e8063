//! Change notifications and execution progress events
//!
//! The canvas, nodes and scheduler push `GraphEvent`s into an `EventSink`.
//! The editor layer (or any other consumer) decides how to transport them.

use serde::{Deserialize, Serialize};

use crate::types::{ConnectionId, GroupId, NodeId};

/// Receiver of graph events
///
/// Implementations decide the transport; the engine only needs `send`.
pub trait EventSink: Send + Sync {
    /// Deliver one event; fails when the receiving side is gone
    fn send(&self, event: GraphEvent) -> Result<(), EventError>;
}

/// An event could not be delivered
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("event receiver dropped")]
    ReceiverDropped,
}

/// Send an event, logging instead of failing when the sink rejects it
pub(crate) fn emit(sink: &dyn EventSink, event: GraphEvent) {
    if let Err(e) = sink.send(event) {
        log::warn!("Dropped graph event: {}", e);
    }
}

/// Events emitted by graph mutation and execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GraphEvent {
    #[serde(rename_all = "camelCase")]
    NodeAdded { node_id: NodeId, node_type: String },

    #[serde(rename_all = "camelCase")]
    NodeRemoved { node_id: NodeId },

    #[serde(rename_all = "camelCase")]
    ConnectionAdded {
        connection_id: ConnectionId,
        source_node: NodeId,
        target_node: NodeId,
    },

    #[serde(rename_all = "camelCase")]
    ConnectionRemoved {
        connection_id: ConnectionId,
        source_node: NodeId,
        target_node: NodeId,
    },

    #[serde(rename_all = "camelCase")]
    GroupAdded { group_id: GroupId },

    #[serde(rename_all = "camelCase")]
    GroupRemoved { group_id: GroupId },

    /// A node's port collections changed after reconfiguration
    #[serde(rename_all = "camelCase")]
    PortsChanged {
        node_id: NodeId,
        added: Vec<String>,
        removed: Vec<String>,
    },

    #[serde(rename_all = "camelCase")]
    PropertyChanged { node_id: NodeId, name: String },

    #[serde(rename_all = "camelCase")]
    ExecutionStarted {
        execution_id: String,
        level_count: usize,
    },

    #[serde(rename_all = "camelCase")]
    LevelStarted {
        execution_id: String,
        level: usize,
        node_ids: Vec<NodeId>,
    },

    #[serde(rename_all = "camelCase")]
    NodeStarted { execution_id: String, node_id: NodeId },

    #[serde(rename_all = "camelCase")]
    NodeCompleted { execution_id: String, node_id: NodeId },

    #[serde(rename_all = "camelCase")]
    NodeFailed {
        execution_id: String,
        node_id: NodeId,
        error: String,
    },

    #[serde(rename_all = "camelCase")]
    ExecutionCompleted { execution_id: String },

    #[serde(rename_all = "camelCase")]
    ExecutionFailed { execution_id: String, error: String },

    #[serde(rename_all = "camelCase")]
    ExecutionCancelled { execution_id: String },
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: GraphEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// Keeps every event in memory, in arrival order
#[derive(Debug, Default)]
pub struct VecEventSink {
    received: parking_lot::Mutex<Vec<GraphEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything received so far
    pub fn events(&self) -> Vec<GraphEvent> {
        self.received.lock().clone()
    }

    pub fn clear(&self) {
        self.received.lock().clear();
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: GraphEvent) -> Result<(), EventError> {
        self.received.lock().push(event);
        Ok(())
    }
}

/// Forwards events into a tokio unbounded channel
pub struct ChannelEventSink {
    sender: tokio::sync::mpsc::UnboundedSender<GraphEvent>,
}

impl ChannelEventSink {
    pub fn new(sender: tokio::sync::mpsc::UnboundedSender<GraphEvent>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: GraphEvent) -> Result<(), EventError> {
        self.sender
            .send(event)
            .map_err(|_| EventError::ReceiverDropped)
    }
}
