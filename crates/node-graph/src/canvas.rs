//! The canvas: owner of nodes, connections and groups
//!
//! Every structural mutation goes through here. Mutations validate first
//! and only then touch the graph, so a rejected request leaves nothing
//! behind.

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::EngineConfig;
use crate::connection::{Connection, LinkTable};
use crate::context::ExecutionContext;
use crate::document::CanvasDocument;
use crate::error::{ConnectionError, GraphError, Result};
use crate::events::{emit, EventSink, GraphEvent, NullEventSink};
use crate::groups::NodeGroup;
use crate::node::{Node, NodeLogic};
use crate::port::{Port, PortKind};
use crate::registry::NodeFactory;
use crate::scheduler::{ExecutionPlan, ExecutionReport, Scheduler};
use crate::types::{new_id, ConnectionId, GroupId, NodeId, Position};
use crate::value::Value;

/// Point-in-time view of the graph taken under the edit lock
#[derive(Debug, Clone)]
pub struct CanvasSnapshot {
    pub nodes: Vec<Arc<Node>>,
    pub connections: Vec<Arc<Connection>>,
}

/// Container of nodes, connections and groups
pub struct Canvas {
    nodes: RwLock<Vec<Arc<Node>>>,
    groups: RwLock<Vec<NodeGroup>>,
    links: Arc<LinkTable>,
    factory: Option<Arc<dyn NodeFactory>>,
    events: Arc<dyn EventSink>,
    config: EngineConfig,
    /// Serializes structural mutations
    edit_lock: Mutex<()>,
}

impl Canvas {
    /// Empty canvas without a factory that discards events
    pub fn new() -> Self {
        Self::with_events(Arc::new(NullEventSink))
    }

    /// Empty canvas reporting changes to `events`
    pub fn with_events(events: Arc<dyn EventSink>) -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            groups: RwLock::new(Vec::new()),
            links: Arc::new(LinkTable::new(events.clone())),
            factory: None,
            events,
            config: EngineConfig::default(),
            edit_lock: Mutex::new(()),
        }
    }

    /// Use `factory` to resolve type keys in [`Canvas::create_node`]
    pub fn with_factory(mut self, factory: Arc<dyn NodeFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.links
            .set_reconfigure_targets(config.canvas.reconfigure_on_connect);
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    // ---- nodes ----

    /// Create a node of a registered type
    pub fn create_node(&self, node_type: &str, position: Position) -> Result<Arc<Node>> {
        let logic = self
            .factory
            .as_ref()
            .and_then(|factory| factory.create(node_type))
            .ok_or_else(|| GraphError::UnknownNodeType(node_type.to_string()))?;
        Ok(self.add_node(logic, position))
    }

    /// Add a node for the given logic
    ///
    /// Structural ports are declared, the first configure pass runs, then
    /// the logic's initialization hook is called once.
    pub fn add_node(&self, logic: Arc<dyn NodeLogic>, position: Position) -> Arc<Node> {
        let _edit = self.edit_lock.lock();
        let node = Node::create(new_id(), logic, position, self.links.clone());
        node.reconfigure();
        node.logic().initialize(&node);
        self.insert_node(node.clone());
        node
    }

    fn insert_node(&self, node: Arc<Node>) {
        log::debug!("Added node '{}' ({})", node.id(), node.node_type());
        self.links.register(&node);
        self.nodes.write().push(node.clone());
        emit(
            self.events.as_ref(),
            GraphEvent::NodeAdded {
                node_id: node.id().clone(),
                node_type: node.node_type().to_string(),
            },
        );
    }

    /// Remove a node after disconnecting everything attached to it
    pub fn remove_node(&self, node_id: &str) -> Result<()> {
        let _edit = self.edit_lock.lock();
        let node = self
            .node(node_id)
            .ok_or_else(|| GraphError::NodeNotFound(node_id.to_string()))?;

        let incident: Vec<_> = self
            .links
            .all()
            .into_iter()
            .filter(|c| c.source_node() == node_id || c.target_node() == node_id)
            .collect();
        for connection in incident {
            self.sever(&connection);
        }

        self.nodes.write().retain(|n| !Arc::ptr_eq(n, &node));
        self.links.unregister(node_id);
        for group in self.groups.write().iter_mut() {
            group.remove_node(node_id);
        }

        log::debug!("Removed node '{}'", node_id);
        emit(
            self.events.as_ref(),
            GraphEvent::NodeRemoved {
                node_id: node_id.to_string(),
            },
        );
        Ok(())
    }

    pub fn node(&self, node_id: &str) -> Option<Arc<Node>> {
        self.nodes.read().iter().find(|n| n.id() == node_id).cloned()
    }

    /// Snapshot of the node list
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Node that currently owns `port`
    fn owner(&self, port: &Port) -> Option<Arc<Node>> {
        self.node(port.node_id()).filter(|node| node.owns(port))
    }

    // ---- properties ----

    pub fn set_property(&self, node_id: &str, name: &str, value: impl Into<Value>) -> Result<()> {
        let _edit = self.edit_lock.lock();
        self.require_node(node_id)?.set_property(name, value)
    }

    pub fn set_property_published(&self, node_id: &str, name: &str, published: bool) -> Result<()> {
        let _edit = self.edit_lock.lock();
        self.require_node(node_id)?
            .set_property_published(name, published)
    }

    fn require_node(&self, node_id: &str) -> Result<Arc<Node>> {
        self.node(node_id)
            .ok_or_else(|| GraphError::NodeNotFound(node_id.to_string()))
    }

    // ---- connections ----

    /// Connect an output (or flow-out) port to an input, published
    /// property or flow-in port
    ///
    /// An existing connection on the target is replaced.
    pub fn connect(&self, source: &Arc<Port>, target: &Arc<Port>) -> Result<Arc<Connection>> {
        let _edit = self.edit_lock.lock();
        let target_node = self.validate(source, target)?;
        let connection = self.link(source.clone(), target.clone(), None);
        if self.config.canvas.reconfigure_on_connect {
            target_node.reconfigure();
        }
        Ok(connection)
    }

    /// Connect ports addressed by node id and port name
    pub fn connect_by_name(
        &self,
        source_node: &str,
        output: &str,
        target_node: &str,
        input: &str,
    ) -> Result<Arc<Connection>> {
        let source = self.find_port(source_node, output, &[PortKind::Output, PortKind::FlowOut])?;
        let target = self.find_port(
            target_node,
            input,
            &[PortKind::Input, PortKind::Property, PortKind::FlowIn],
        )?;
        self.connect(&source, &target)
    }

    fn find_port(&self, node_id: &str, name: &str, kinds: &[PortKind]) -> Result<Arc<Port>> {
        let node = self.require_node(node_id)?;
        kinds
            .iter()
            .find_map(|kind| node.port(*kind, name))
            .ok_or_else(|| GraphError::UnknownPort {
                node_id: node_id.to_string(),
                port: name.to_string(),
                kind: kinds[0],
            })
    }

    /// Check every connect precondition; returns the target's node
    fn validate(&self, source: &Arc<Port>, target: &Arc<Port>) -> Result<Arc<Node>> {
        let source_node = self
            .owner(source)
            .ok_or_else(|| ConnectionError::MissingPort(source.id().to_string()))?;
        let target_node = self
            .owner(target)
            .ok_or_else(|| ConnectionError::MissingPort(target.id().to_string()))?;

        if !source.is_output_side() || !target.is_input_side() {
            return Err(ConnectionError::InvalidDirection {
                from: source.kind(),
                to: target.kind(),
            }
            .into());
        }
        if source.is_flow() != target.is_flow() {
            return Err(ConnectionError::EdgeKindMismatch.into());
        }
        if Arc::ptr_eq(&source_node, &target_node) {
            return Err(ConnectionError::SameNode(source_node.id().clone()).into());
        }
        if let (Some(from), Some(to)) = (source.data_type(), target.data_type()) {
            if !target.can_accept(from) {
                return Err(ConnectionError::IncompatibleTypes {
                    from: from.clone(),
                    to: to.clone(),
                }
                .into());
            }
        }
        if self.links.between(source, target).is_some() {
            return Err(ConnectionError::Duplicate {
                from: source.id().to_string(),
                to: target.id().to_string(),
            }
            .into());
        }
        Ok(target_node)
    }

    /// Attach a validated connection, replacing the target's current one
    fn link(&self, source: Arc<Port>, target: Arc<Port>, id: Option<ConnectionId>) -> Arc<Connection> {
        for existing in target.connections() {
            log::debug!("Replacing connection '{}' on {}", existing.id(), target.id());
            self.links.sever(existing.id());
        }
        match id {
            Some(id) => self.links.attach_with_id(id, source, target),
            None => self.links.attach(source, target),
        }
    }

    /// Remove a connection
    pub fn disconnect(&self, connection_id: &str) -> Result<()> {
        let _edit = self.edit_lock.lock();
        let connection = self
            .links
            .find(connection_id)
            .ok_or_else(|| ConnectionError::NotConnected(connection_id.to_string()))?;
        self.sever(&connection);
        Ok(())
    }

    /// Sever and let the target node adapt to its lost upstream
    fn sever(&self, connection: &Connection) {
        if self.links.sever(connection.id()).is_none() {
            return;
        }
        if self.config.canvas.reconfigure_on_connect {
            if let Some(target) = self.node(connection.target_node()) {
                target.reconfigure();
            }
        }
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.links.all()
    }

    pub fn connection(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.links.find(connection_id)
    }

    pub fn connection_count(&self) -> usize {
        self.links.len()
    }

    // ---- groups ----

    /// Group existing nodes under a name
    pub fn create_group(&self, name: impl Into<String>, node_ids: Vec<NodeId>) -> Result<GroupId> {
        let _edit = self.edit_lock.lock();
        if let Some(missing) = node_ids.iter().find(|id| self.node(id).is_none()) {
            return Err(GraphError::NodeNotFound(missing.clone()));
        }
        let group = NodeGroup::new(new_id(), name).with_nodes(node_ids);
        let id = group.id.clone();
        self.groups.write().push(group);
        emit(
            self.events.as_ref(),
            GraphEvent::GroupAdded {
                group_id: id.clone(),
            },
        );
        Ok(id)
    }

    pub fn remove_group(&self, group_id: &str) -> Result<NodeGroup> {
        let _edit = self.edit_lock.lock();
        let removed = {
            let mut groups = self.groups.write();
            let index = groups
                .iter()
                .position(|g| g.id == group_id)
                .ok_or_else(|| GraphError::GroupNotFound(group_id.to_string()))?;
            groups.remove(index)
        };
        emit(
            self.events.as_ref(),
            GraphEvent::GroupRemoved {
                group_id: group_id.to_string(),
            },
        );
        Ok(removed)
    }

    pub fn groups(&self) -> Vec<NodeGroup> {
        self.groups.read().clone()
    }

    pub fn group(&self, group_id: &str) -> Option<NodeGroup> {
        self.groups.read().iter().find(|g| g.id == group_id).cloned()
    }

    /// Consistent copy of the node and connection lists
    pub fn snapshot(&self) -> CanvasSnapshot {
        let _edit = self.edit_lock.lock();
        CanvasSnapshot {
            nodes: self.nodes(),
            connections: self.links.all(),
        }
    }

    // ---- execution ----

    /// Build a plan for the current graph without running it
    pub fn plan(&self) -> Result<ExecutionPlan> {
        ExecutionPlan::from_snapshot(&self.snapshot())
    }

    /// Execute the current graph with a caller-supplied context
    pub async fn execute(&self, execution: Arc<ExecutionContext>) -> Result<ExecutionReport> {
        let plan = self.plan()?;
        Scheduler::new(self.config.scheduler.clone(), self.events.clone())
            .execute(&plan, execution)
            .await
    }

    /// Execute the current graph with a fresh context
    pub async fn run(&self) -> Result<ExecutionReport> {
        self.execute(Arc::new(ExecutionContext::new())).await
    }

    // ---- documents ----

    pub fn to_document(&self) -> CanvasDocument {
        CanvasDocument {
            nodes: self.nodes().iter().map(|n| n.write()).collect(),
            connections: self.links.all().iter().map(|c| c.write()).collect(),
            groups: self.groups(),
            ..CanvasDocument::default()
        }
    }

    /// Rebuild a canvas: nodes first, then connections, then groups
    pub fn from_document(
        doc: &CanvasDocument,
        factory: Arc<dyn NodeFactory>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let canvas = Self::with_events(events).with_factory(factory);
        canvas.load_document(doc)?;
        Ok(canvas)
    }

    fn load_document(&self, doc: &CanvasDocument) -> Result<()> {
        let factory = self
            .factory
            .clone()
            .ok_or_else(|| GraphError::InvalidDocument("no node factory configured".to_string()))?;

        for node_doc in &doc.nodes {
            if self.node(&node_doc.id).is_some() {
                return Err(GraphError::InvalidDocument(format!(
                    "duplicate node id '{}'",
                    node_doc.id
                )));
            }
            let logic = factory
                .create(&node_doc.node_type)
                .ok_or_else(|| GraphError::UnknownNodeType(node_doc.node_type.clone()))?;
            let node = Node::create(node_doc.id.clone(), logic, node_doc.position, self.links.clone());
            node.read(node_doc)?;
            node.logic().initialize(&node);
            self.insert_node(node);
        }

        for conn_doc in &doc.connections {
            let source = self.document_port(&conn_doc.source_node, &conn_doc.source_port, conn_doc.source_kind)?;
            let target = self.document_port(&conn_doc.target_node, &conn_doc.target_port, conn_doc.target_kind)?;
            let _edit = self.edit_lock.lock();
            let target_node = self.validate(&source, &target)?;
            self.link(source, target, Some(conn_doc.id.clone()));
            if self.config.canvas.reconfigure_on_connect {
                target_node.reconfigure();
            }
        }

        for group in &doc.groups {
            let known: Vec<_> = group
                .node_ids
                .iter()
                .filter(|id| self.node(id).is_some())
                .cloned()
                .collect();
            self.groups
                .write()
                .push(NodeGroup { node_ids: known, ..group.clone() });
        }

        log::info!(
            "Loaded canvas document: {} nodes, {} connections",
            self.node_count(),
            self.connection_count()
        );
        Ok(())
    }

    fn document_port(&self, node_id: &str, name: &str, kind: PortKind) -> Result<Arc<Port>> {
        self.require_node(node_id)?
            .port(kind, name)
            .ok_or_else(|| GraphError::UnknownPort {
                node_id: node_id.to_string(),
                port: name.to_string(),
                kind,
            })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.to_document().save(path)
    }

    pub fn load(
        path: impl AsRef<Path>,
        factory: Arc<dyn NodeFactory>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        Self::from_document(&CanvasDocument::load(path)?, factory, events)
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}
