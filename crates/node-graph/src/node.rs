//! Nodes and the logic trait node types implement
//!
//! A `Node` owns its ports and metadata; its behavior lives in an
//! `Arc<dyn NodeLogic>`. The logic declares structural ports once, may
//! derive dynamic ports through `configure`, and produces outputs in
//! `process`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::builder::ShapeBuilder;
use crate::connection::LinkTable;
use crate::context::ProcessContext;
use crate::descriptor::NodeDescriptor;
use crate::document::NodeDocument;
use crate::error::{GraphError, NodeError, Result};
use crate::events::{emit, GraphEvent};
use crate::port::{Port, PortId, PortKind, PortOrigin};
use crate::types::{NodeCategory, NodeId, Position};
use crate::value::Value;

/// Behavior of a node type
///
/// # Example
///
/// ```ignore
/// struct Negate;
///
/// #[async_trait]
/// impl NodeLogic for Negate {
///     fn descriptor(&self) -> NodeDescriptor {
///         NodeDescriptor::new("negate", "Negate", NodeCategory::Processing)
///     }
///
///     fn declare(&self, ports: &mut ShapeBuilder<'_>) {
///         ports.input("Value", DataType::Float);
///         ports.output("Result", DataType::Float);
///     }
///
///     async fn process(&self, ctx: &ProcessContext<'_>) -> Result<(), NodeError> {
///         let value: f64 = ctx.input_as("Value")?;
///         ctx.set_output("Result", -value)
///     }
/// }
/// ```
#[async_trait]
pub trait NodeLogic: Send + Sync {
    /// Static metadata for this node type
    fn descriptor(&self) -> NodeDescriptor;

    /// Declare structural ports; called once when the node is created
    ///
    /// Ports declared here are never removed by reconfiguration.
    fn declare(&self, _ports: &mut ShapeBuilder<'_>) {}

    /// Request dynamic ports for the current state of the node
    ///
    /// Called once after creation and again whenever the shape may have
    /// changed. Elements requested with the same kind, name and type as in
    /// the previous pass are reused; elements not requested are removed.
    fn configure(&self, _ports: &mut ShapeBuilder<'_>) {}

    /// Hook run once after the node is fully created
    fn initialize(&self, _node: &Node) {}

    /// Compute outputs from inputs
    async fn process(&self, ctx: &ProcessContext<'_>) -> std::result::Result<(), NodeError>;
}

/// Editable node attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMeta {
    pub name: String,
    pub category: NodeCategory,
    pub description: String,
    pub visible: bool,
    pub is_output: bool,
    pub position: Position,
}

/// The ordered port collections of one node
#[derive(Debug, Clone, Default)]
pub struct PortSet {
    pub(crate) inputs: Vec<Arc<Port>>,
    pub(crate) outputs: Vec<Arc<Port>>,
    pub(crate) flow_inputs: Vec<Arc<Port>>,
    pub(crate) flow_outputs: Vec<Arc<Port>>,
    pub(crate) properties: Vec<Arc<Port>>,
}

impl PortSet {
    pub fn inputs(&self) -> &[Arc<Port>] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Arc<Port>] {
        &self.outputs
    }

    pub fn flow_inputs(&self) -> &[Arc<Port>] {
        &self.flow_inputs
    }

    pub fn flow_outputs(&self) -> &[Arc<Port>] {
        &self.flow_outputs
    }

    pub fn properties(&self) -> &[Arc<Port>] {
        &self.properties
    }

    pub fn list(&self, kind: PortKind) -> &[Arc<Port>] {
        match kind {
            PortKind::Input => &self.inputs,
            PortKind::Output => &self.outputs,
            PortKind::FlowIn => &self.flow_inputs,
            PortKind::FlowOut => &self.flow_outputs,
            PortKind::Property => &self.properties,
        }
    }

    pub(crate) fn list_mut(&mut self, kind: PortKind) -> &mut Vec<Arc<Port>> {
        match kind {
            PortKind::Input => &mut self.inputs,
            PortKind::Output => &mut self.outputs,
            PortKind::FlowIn => &mut self.flow_inputs,
            PortKind::FlowOut => &mut self.flow_outputs,
            PortKind::Property => &mut self.properties,
        }
    }

    pub fn find(&self, kind: PortKind, name: &str) -> Option<&Arc<Port>> {
        self.list(kind).iter().find(|port| port.name() == name)
    }

    /// Every port, in kind order then declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Port>> {
        self.inputs
            .iter()
            .chain(&self.outputs)
            .chain(&self.flow_inputs)
            .chain(&self.flow_outputs)
            .chain(&self.properties)
    }

    pub fn contains(&self, port: &Port) -> bool {
        self.list(port.kind())
            .iter()
            .any(|candidate| std::ptr::eq(candidate.as_ref(), port))
    }

    /// Only the ports declared up front
    pub(crate) fn structural(&self) -> PortSet {
        let keep = |ports: &Vec<Arc<Port>>| -> Vec<Arc<Port>> {
            ports
                .iter()
                .filter(|port| !port.is_dynamic())
                .cloned()
                .collect()
        };
        PortSet {
            inputs: keep(&self.inputs),
            outputs: keep(&self.outputs),
            flow_inputs: keep(&self.flow_inputs),
            flow_outputs: keep(&self.flow_outputs),
            properties: keep(&self.properties),
        }
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resets the reconfiguration flag even if `configure` panics
struct ConfigureGuard<'a>(&'a AtomicBool);

impl Drop for ConfigureGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A unit of computation on a canvas
pub struct Node {
    id: NodeId,
    node_type: String,
    meta: RwLock<NodeMeta>,
    logic: Arc<dyn NodeLogic>,
    ports: RwLock<PortSet>,
    next_index: AtomicUsize,
    configuring: AtomicBool,
    links: Arc<LinkTable>,
}

impl Node {
    /// Build a node and declare its structural ports
    ///
    /// The caller runs the first reconfiguration pass and the
    /// initialization hook.
    pub(crate) fn create(
        id: NodeId,
        logic: Arc<dyn NodeLogic>,
        position: Position,
        links: Arc<LinkTable>,
    ) -> Arc<Self> {
        let descriptor = logic.descriptor();
        let node = Arc::new(Self {
            id,
            node_type: descriptor.node_type,
            meta: RwLock::new(NodeMeta {
                name: descriptor.label,
                category: descriptor.category,
                description: descriptor.description,
                visible: true,
                is_output: descriptor.is_output,
                position,
            }),
            logic,
            ports: RwLock::new(PortSet::default()),
            next_index: AtomicUsize::new(0),
            configuring: AtomicBool::new(false),
            links,
        });

        let mut builder = ShapeBuilder::declaring(&node);
        node.logic.declare(&mut builder);
        let shape = builder.finish();
        *node.ports.write() = shape.next;
        node
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn logic(&self) -> &Arc<dyn NodeLogic> {
        &self.logic
    }

    pub fn meta(&self) -> NodeMeta {
        self.meta.read().clone()
    }

    pub fn name(&self) -> String {
        self.meta.read().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.meta.write().name = name.into();
    }

    pub fn category(&self) -> NodeCategory {
        self.meta.read().category
    }

    pub fn description(&self) -> String {
        self.meta.read().description.clone()
    }

    pub fn is_visible(&self) -> bool {
        self.meta.read().visible
    }

    pub fn set_visible(&self, visible: bool) {
        self.meta.write().visible = visible;
    }

    /// Output nodes are the roots of an execution plan
    pub fn is_output(&self) -> bool {
        self.meta.read().is_output
    }

    pub fn set_output(&self, is_output: bool) {
        self.meta.write().is_output = is_output;
    }

    pub fn position(&self) -> Position {
        self.meta.read().position
    }

    pub fn set_position(&self, position: Position) {
        self.meta.write().position = position;
    }

    pub(crate) fn next_port_index(&self) -> usize {
        self.next_index.fetch_add(1, Ordering::Relaxed)
    }

    /// Snapshot of the current port collections
    pub fn ports(&self) -> PortSet {
        self.ports.read().clone()
    }

    pub fn inputs(&self) -> Vec<Arc<Port>> {
        self.ports.read().inputs.clone()
    }

    pub fn outputs(&self) -> Vec<Arc<Port>> {
        self.ports.read().outputs.clone()
    }

    pub fn flow_inputs(&self) -> Vec<Arc<Port>> {
        self.ports.read().flow_inputs.clone()
    }

    pub fn flow_outputs(&self) -> Vec<Arc<Port>> {
        self.ports.read().flow_outputs.clone()
    }

    pub fn properties(&self) -> Vec<Arc<Port>> {
        self.ports.read().properties.clone()
    }

    pub fn port(&self, kind: PortKind, name: &str) -> Option<Arc<Port>> {
        self.ports.read().find(kind, name).cloned()
    }

    pub fn input(&self, name: &str) -> Option<Arc<Port>> {
        self.port(PortKind::Input, name)
    }

    pub fn output(&self, name: &str) -> Option<Arc<Port>> {
        self.port(PortKind::Output, name)
    }

    pub fn property(&self, name: &str) -> Option<Arc<Port>> {
        self.port(PortKind::Property, name)
    }

    pub fn port_by_id(&self, id: &PortId) -> Option<Arc<Port>> {
        self.ports
            .read()
            .list(id.kind)
            .iter()
            .find(|port| port.id() == id)
            .cloned()
    }

    /// Whether `port` is currently one of this node's ports
    pub fn owns(&self, port: &Port) -> bool {
        port.node_id() == self.id && self.ports.read().contains(port)
    }

    /// Ids of nodes whose outputs feed this node's inputs or published properties
    ///
    /// Flow connections are not data dependencies.
    pub fn dependencies(&self) -> Vec<NodeId> {
        let ports = self.ports.read();
        let mut deps: Vec<NodeId> = Vec::new();
        let feeding = ports
            .inputs
            .iter()
            .chain(ports.properties.iter().filter(|p| p.is_published()));
        for port in feeding {
            for connection in port.connections() {
                if connection.is_flow() {
                    continue;
                }
                let source = connection.source_node();
                if !deps.iter().any(|dep| dep == source) {
                    deps.push(source.to_string());
                }
            }
        }
        deps
    }

    /// Current value of a property
    pub fn property_value(&self, name: &str) -> Option<Value> {
        self.property(name).and_then(|port| port.read())
    }

    /// Set a property's scalar value
    ///
    /// Reconfigures the node when the property affects its shape.
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let port = self.property(name).ok_or_else(|| GraphError::UnknownProperty {
            node_id: self.id.clone(),
            name: name.to_string(),
        })?;
        port.set_property_value(value.into())?;
        self.property_changed(&port);
        Ok(())
    }

    pub(crate) fn property_changed(&self, port: &Port) {
        emit(
            self.links.events().as_ref(),
            GraphEvent::PropertyChanged {
                node_id: self.id.clone(),
                name: port.name().to_string(),
            },
        );
        if port.property_meta().map_or(false, |meta| meta.affects_shape()) {
            self.reconfigure();
        }
    }

    /// Expose or hide a property as a connectable input
    ///
    /// Unpublishing severs the property's connections.
    pub fn set_property_published(&self, name: &str, published: bool) -> Result<()> {
        let port = self.property(name).ok_or_else(|| GraphError::UnknownProperty {
            node_id: self.id.clone(),
            name: name.to_string(),
        })?;
        if port.is_published() == published {
            return Ok(());
        }
        port.set_published(published);
        if !published {
            self.links.sever_port(&port);
        }
        self.property_changed(&port);
        Ok(())
    }

    /// Run a reconfiguration pass
    ///
    /// Returns `false` when a pass is already in progress on this node; the
    /// nested request is ignored.
    pub fn reconfigure(&self) -> bool {
        if self.configuring.swap(true, Ordering::AcqRel) {
            log::debug!("Ignoring nested reconfiguration of node '{}'", self.id);
            return false;
        }
        let _guard = ConfigureGuard(&self.configuring);

        let previous = self.ports();
        let mut builder = ShapeBuilder::configuring(self, previous);
        self.logic.configure(&mut builder);
        let shape = builder.finish();

        let mut severed = Vec::new();
        for port in &shape.removed {
            severed.extend(self.links.sever_port(port));
        }
        *self.ports.write() = shape.next;

        if !shape.added.is_empty() || !shape.removed.is_empty() {
            log::debug!(
                "Node '{}' reconfigured: {} added, {} removed",
                self.id,
                shape.added.len(),
                shape.removed.len()
            );
            emit(
                self.links.events().as_ref(),
                GraphEvent::PortsChanged {
                    node_id: self.id.clone(),
                    added: shape.added.iter().map(|p| p.name().to_string()).collect(),
                    removed: shape.removed.iter().map(|p| p.name().to_string()).collect(),
                },
            );
        }

        // Nodes that lost an upstream connection re-resolve their types
        self.links.reconfigure_targets(&self.id, &severed);
        true
    }

    /// Write this node's fields into a document
    pub fn write(&self) -> NodeDocument {
        let meta = self.meta();
        let ports = self.ports.read();
        NodeDocument {
            id: self.id.clone(),
            node_type: self.node_type.clone(),
            name: meta.name,
            position: meta.position,
            visible: meta.visible,
            is_output: meta.is_output,
            properties: ports.properties.iter().map(|port| port.write()).collect(),
            ports: ports
                .iter()
                .filter(|port| port.kind() != PortKind::Property)
                .map(|port| port.write())
                .collect(),
        }
    }

    /// Restore fields from a document and re-run the builder
    ///
    /// Structural ports take the document's visibility and values.
    /// Dynamic elements listed in the document are seeded first, so the
    /// following reconfiguration pass reuses them and the node comes back
    /// with the same shape and values.
    pub fn read(&self, doc: &NodeDocument) -> Result<()> {
        if doc.node_type != self.node_type {
            return Err(GraphError::InvalidDocument(format!(
                "node '{}' has type '{}', document describes '{}'",
                self.id, self.node_type, doc.node_type
            )));
        }

        {
            let mut meta = self.meta.write();
            meta.name = doc.name.clone();
            meta.position = doc.position;
            meta.visible = doc.visible;
            meta.is_output = doc.is_output;
        }

        {
            let mut ports = self.ports.write();
            for port_doc in doc.properties.iter().chain(&doc.ports) {
                let existing = ports
                    .find(port_doc.kind, &port_doc.name)
                    .filter(|port| port.data_type() == port_doc.data_type.as_ref())
                    .cloned();
                match existing {
                    Some(port) => {
                        port.set_visible(port_doc.visible);
                        if let Some(options) = &port_doc.property {
                            port.set_published(options.published);
                        }
                        if let Some(value) = &port_doc.value {
                            port.restore_value(value.clone());
                        }
                    }
                    None if port_doc.dynamic => {
                        let id = PortId {
                            node_id: self.id.clone(),
                            kind: port_doc.kind,
                            index: self.next_port_index(),
                        };
                        match Port::from_document(id, port_doc, PortOrigin::Dynamic) {
                            Some(port) => ports.list_mut(port_doc.kind).push(Arc::new(port)),
                            None => log::warn!(
                                "Skipping untyped {:?} port '{}' on node '{}'",
                                port_doc.kind,
                                port_doc.name,
                                self.id
                            ),
                        }
                    }
                    None => log::warn!(
                        "Node '{}' has no {:?} port '{}' to restore",
                        self.id,
                        port_doc.kind,
                        port_doc.name
                    ),
                }
            }
        }

        self.reconfigure();
        Ok(())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("node_type", &self.node_type)
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::{NullEventSink, VecEventSink};
    use crate::port::PropertyOptions;
    use crate::value::DataType;
    use parking_lot::Mutex;

    /// Test node with one Float input, one Float output and an optional
    /// dynamic port chosen by its "Mode" property
    pub(crate) struct ShapeShifter {
        pub(crate) configured: Mutex<usize>,
    }

    impl ShapeShifter {
        pub(crate) fn new() -> Self {
            Self {
                configured: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl NodeLogic for ShapeShifter {
        fn descriptor(&self) -> NodeDescriptor {
            NodeDescriptor::new("shape-shifter", "Shape Shifter", NodeCategory::Processing)
        }

        fn declare(&self, ports: &mut ShapeBuilder<'_>) {
            ports.input("In", DataType::Float);
            ports.output("Out", DataType::Float);
            ports.property(
                "Mode",
                DataType::Text,
                PropertyOptions::new().affects_shape().default_value("int"),
            );
        }

        fn configure(&self, ports: &mut ShapeBuilder<'_>) {
            *self.configured.lock() += 1;
            let mode = ports
                .property_value("Mode")
                .and_then(|v| v.as_text().map(str::to_string))
                .unwrap_or_default();
            if let Ok(data_type) = mode.parse::<DataType>() {
                ports.input("Extra", data_type.clone());
                ports.property("Setting", data_type, PropertyOptions::new());
            }
        }

        async fn process(&self, _ctx: &ProcessContext<'_>) -> std::result::Result<(), NodeError> {
            Ok(())
        }
    }

    fn make_node(logic: Arc<dyn NodeLogic>) -> Arc<Node> {
        let links = Arc::new(LinkTable::new(Arc::new(NullEventSink)));
        let node = Node::create("n1".to_string(), logic, (0.0, 0.0), links);
        node.reconfigure();
        node
    }

    #[test]
    fn test_structural_ports_declared_once() {
        let node = make_node(Arc::new(ShapeShifter::new()));
        assert_eq!(node.name(), "Shape Shifter");
        assert_eq!(node.inputs().len(), 2);
        assert!(!node.input("In").unwrap().is_dynamic());
        assert!(node.input("Extra").unwrap().is_dynamic());
        assert_eq!(
            node.input("Extra").unwrap().data_type(),
            Some(&DataType::Int)
        );
    }

    #[test]
    fn test_reconfigure_keeps_matching_elements() {
        let node = make_node(Arc::new(ShapeShifter::new()));
        let extra = node.input("Extra").unwrap();
        node.set_property("Setting", 5).unwrap();

        assert!(node.reconfigure());
        assert!(Arc::ptr_eq(&extra, &node.input("Extra").unwrap()));
        assert_eq!(node.property_value("Setting"), Some(Value::Int(5)));
    }

    #[test]
    fn test_shape_property_replaces_elements() {
        let node = make_node(Arc::new(ShapeShifter::new()));
        let extra = node.input("Extra").unwrap();
        node.set_property("Setting", 5).unwrap();

        node.set_property("Mode", "float").unwrap();
        let replaced = node.input("Extra").unwrap();
        assert!(!Arc::ptr_eq(&extra, &replaced));
        assert_eq!(replaced.data_type(), Some(&DataType::Float));
        assert_eq!(node.property_value("Setting"), Some(Value::Float(0.0)));

        // Unparsable mode requests nothing: dynamic elements go away
        node.set_property("Mode", "nonsense").unwrap();
        assert!(node.input("Extra").is_none());
        assert!(node.property("Setting").is_none());
        assert!(node.input("In").is_some());
    }

    #[test]
    fn test_ports_changed_event() {
        let events = Arc::new(VecEventSink::new());
        let links = Arc::new(LinkTable::new(events.clone()));
        let node = Node::create(
            "n1".to_string(),
            Arc::new(ShapeShifter::new()),
            (0.0, 0.0),
            links,
        );
        node.reconfigure();

        let changed = events
            .events()
            .into_iter()
            .filter(|e| matches!(e, GraphEvent::PortsChanged { .. }))
            .count();
        assert_eq!(changed, 1);

        // Same shape again: nothing to report
        node.reconfigure();
        let changed = events
            .events()
            .into_iter()
            .filter(|e| matches!(e, GraphEvent::PortsChanged { .. }))
            .count();
        assert_eq!(changed, 1);
    }

    #[test]
    fn test_unknown_property() {
        let node = make_node(Arc::new(ShapeShifter::new()));
        assert!(matches!(
            node.set_property("Missing", 1),
            Err(GraphError::UnknownProperty { .. })
        ));
        assert!(matches!(
            node.set_property("Setting", true),
            Err(GraphError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_document_restores_dynamic_shape() {
        let node = make_node(Arc::new(ShapeShifter::new()));
        node.set_property("Mode", "text").unwrap();
        node.set_property("Setting", "hello").unwrap();
        node.set_position((10.0, 20.0));
        node.set_output(true);
        node.output("Out").unwrap().set_visible(false);
        let doc = node.write();

        assert!(doc.ports.iter().any(|p| p.name == "Extra" && p.dynamic));
        assert!(doc.ports.iter().any(|p| p.name == "In" && !p.dynamic));

        let links = Arc::new(LinkTable::new(Arc::new(NullEventSink)));
        let restored = Node::create(
            doc.id.clone(),
            Arc::new(ShapeShifter::new()),
            (0.0, 0.0),
            links,
        );
        restored.read(&doc).unwrap();

        assert_eq!(restored.position(), (10.0, 20.0));
        assert!(restored.is_output());
        assert!(!restored.output("Out").unwrap().is_visible());
        assert_eq!(
            restored.input("Extra").unwrap().data_type(),
            Some(&DataType::Text)
        );
        assert_eq!(
            restored.property_value("Setting"),
            Some(Value::Text("hello".to_string()))
        );
        assert_eq!(restored.inputs().len(), 2);
        assert_eq!(restored.properties().len(), 2);
    }
}
