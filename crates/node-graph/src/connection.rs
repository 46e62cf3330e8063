//! Connections between ports and the link table that owns them
//!
//! A `Connection` holds strong references to both endpoint ports; ports
//! only keep weak back-references, so dropping a connection from the
//! `LinkTable` is enough to make it disappear from both ports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::events::{emit, EventSink, GraphEvent};
use crate::node::Node;
use crate::port::{Port, PortKind};
use crate::types::{new_id, ConnectionId, NodeId};

/// Directed edge from one output port to one input port
pub struct Connection {
    id: ConnectionId,
    source: Arc<Port>,
    target: Arc<Port>,
}

impl Connection {
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn source(&self) -> &Arc<Port> {
        &self.source
    }

    pub fn target(&self) -> &Arc<Port> {
        &self.target
    }

    pub fn source_node(&self) -> &str {
        self.source.node_id()
    }

    pub fn target_node(&self) -> &str {
        self.target.node_id()
    }

    /// Whether this is a control edge between flow ports
    pub fn is_flow(&self) -> bool {
        self.source.is_flow()
    }

    /// Whether this connection joins exactly these two ports
    pub fn joins(&self, source: &Port, target: &Port) -> bool {
        std::ptr::eq(self.source.as_ref(), source) && std::ptr::eq(self.target.as_ref(), target)
    }

    /// Whether either endpoint is `port`
    pub fn touches(&self, port: &Port) -> bool {
        std::ptr::eq(self.source.as_ref(), port) || std::ptr::eq(self.target.as_ref(), port)
    }

    /// Serialize by node id and port name/kind
    pub fn write(&self) -> ConnectionDocument {
        ConnectionDocument {
            id: self.id.clone(),
            source_node: self.source.node_id().to_string(),
            source_port: self.source.name().to_string(),
            source_kind: self.source.kind(),
            target_node: self.target.node_id().to_string(),
            target_port: self.target.name().to_string(),
            target_kind: self.target.kind(),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("source", self.source.id())
            .field("target", self.target.id())
            .finish()
    }
}

/// Serialized form of a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDocument {
    pub id: ConnectionId,
    pub source_node: NodeId,
    pub source_port: String,
    pub source_kind: PortKind,
    pub target_node: NodeId,
    pub target_port: String,
    pub target_kind: PortKind,
}

/// Authoritative list of a canvas's connections
///
/// Shared between the canvas and every node it owns, so a node's
/// reconfiguration pass can sever connections of ports it removes and
/// let the nodes downstream of them adapt.
pub struct LinkTable {
    connections: Mutex<Vec<Arc<Connection>>>,
    nodes: RwLock<HashMap<NodeId, Weak<Node>>>,
    reconfigure_targets: AtomicBool,
    events: Arc<dyn EventSink>,
}

impl LinkTable {
    pub(crate) fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
            nodes: RwLock::new(HashMap::new()),
            reconfigure_targets: AtomicBool::new(true),
            events,
        }
    }

    /// Make `node` reachable as the target of a severed connection
    pub(crate) fn register(&self, node: &Arc<Node>) {
        self.nodes
            .write()
            .insert(node.id().clone(), Arc::downgrade(node));
    }

    pub(crate) fn unregister(&self, node_id: &str) {
        self.nodes.write().remove(node_id);
    }

    pub(crate) fn set_reconfigure_targets(&self, enabled: bool) {
        self.reconfigure_targets.store(enabled, Ordering::Relaxed);
    }

    /// Reconfigure each distinct target node of `severed`, except `origin`
    pub(crate) fn reconfigure_targets(&self, origin: &str, severed: &[Arc<Connection>]) {
        if !self.reconfigure_targets.load(Ordering::Relaxed) {
            return;
        }
        let mut visited: Vec<&str> = Vec::new();
        for connection in severed {
            let target = connection.target_node();
            if target == origin || visited.contains(&target) {
                continue;
            }
            visited.push(target);
            let node = self.nodes.read().get(target).and_then(Weak::upgrade);
            if let Some(node) = node {
                node.reconfigure();
            }
        }
    }

    pub(crate) fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Register a new connection on both ports and in the table
    pub(crate) fn attach(&self, source: Arc<Port>, target: Arc<Port>) -> Arc<Connection> {
        self.attach_with_id(new_id(), source, target)
    }

    pub(crate) fn attach_with_id(
        &self,
        id: ConnectionId,
        source: Arc<Port>,
        target: Arc<Port>,
    ) -> Arc<Connection> {
        let connection = Arc::new(Connection { id, source, target });
        connection.source.attach(&connection);
        connection.target.attach(&connection);
        self.connections.lock().push(connection.clone());

        log::debug!(
            "Connected {} -> {}",
            connection.source.id(),
            connection.target.id()
        );
        emit(
            self.events.as_ref(),
            GraphEvent::ConnectionAdded {
                connection_id: connection.id.clone(),
                source_node: connection.source_node().to_string(),
                target_node: connection.target_node().to_string(),
            },
        );
        connection
    }

    /// Remove a connection from the table and both ports
    ///
    /// Returns `None` if it was not registered.
    pub(crate) fn sever(&self, connection_id: &str) -> Option<Arc<Connection>> {
        let removed = {
            let mut connections = self.connections.lock();
            let index = connections.iter().position(|c| c.id == connection_id)?;
            connections.remove(index)
        };
        self.detach(&removed);
        Some(removed)
    }

    /// Sever every connection touching `port`
    pub(crate) fn sever_port(&self, port: &Port) -> Vec<Arc<Connection>> {
        let removed: Vec<_> = {
            let mut connections = self.connections.lock();
            let (removed, kept): (Vec<_>, Vec<_>) = connections
                .drain(..)
                .partition(|c| c.touches(port));
            *connections = kept;
            removed
        };
        for connection in &removed {
            self.detach(connection);
        }
        removed
    }

    fn detach(&self, connection: &Connection) {
        connection.source.detach(&connection.id);
        connection.target.detach(&connection.id);

        log::debug!(
            "Disconnected {} -> {}",
            connection.source.id(),
            connection.target.id()
        );
        emit(
            self.events.as_ref(),
            GraphEvent::ConnectionRemoved {
                connection_id: connection.id.clone(),
                source_node: connection.source_node().to_string(),
                target_node: connection.target_node().to_string(),
            },
        );
    }

    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().clone()
    }

    pub fn find(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.connections
            .lock()
            .iter()
            .find(|c| c.id == connection_id)
            .cloned()
    }

    /// Existing connection joining exactly these ports
    pub fn between(&self, source: &Port, target: &Port) -> Option<Arc<Connection>> {
        self.connections
            .lock()
            .iter()
            .find(|c| c.joins(source, target))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }
}
