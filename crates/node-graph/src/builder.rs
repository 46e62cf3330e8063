//! Dynamic reconfiguration of node shapes
//!
//! `ShapeBuilder` is handed to `NodeLogic::declare` and
//! `NodeLogic::configure`. Each request names an element; during a
//! configure pass the builder first looks for a dynamic element of the
//! previous shape with the same kind, name and type and hands that back
//! unchanged, so its value and connections survive. Anything from the
//! previous shape that nobody asked for again is reported as removed when
//! the pass finishes.
//!
//! ```text
//! previous: [In] [Out] {Item 1: int} {Item 2: int}
//! requests:               Item 1: int   Item 2: float
//! next:     [In] [Out] {Item 1: int} {Item 2: float}   removed: Item 2: int
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::node::{Node, PortSet};
use crate::port::{Port, PortId, PortKind, PortOrigin, PropertyOptions};
use crate::value::{DataType, FromValue, Value};

/// Outcome of one builder pass
#[derive(Debug)]
pub(crate) struct Reconciliation {
    pub(crate) next: PortSet,
    pub(crate) added: Vec<Arc<Port>>,
    pub(crate) removed: Vec<Arc<Port>>,
}

/// Collects the ports a node requests during one declare/configure pass
pub struct ShapeBuilder<'a> {
    node: &'a Node,
    origin: PortOrigin,
    previous: PortSet,
    next: PortSet,
    reused: HashSet<*const Port>,
    added: Vec<Arc<Port>>,
}

impl<'a> ShapeBuilder<'a> {
    /// Builder for the one-time structural declaration
    pub(crate) fn declaring(node: &'a Node) -> Self {
        Self {
            node,
            origin: PortOrigin::Structural,
            previous: PortSet::default(),
            next: PortSet::default(),
            reused: HashSet::new(),
            added: Vec::new(),
        }
    }

    /// Builder for a reconfiguration pass over `previous`
    pub(crate) fn configuring(node: &'a Node, previous: PortSet) -> Self {
        let next = previous.structural();
        Self {
            node,
            origin: PortOrigin::Dynamic,
            previous,
            next,
            reused: HashSet::new(),
            added: Vec::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        self.node.id()
    }

    pub fn input(&mut self, name: impl Into<String>, data_type: DataType) -> Arc<Port> {
        self.request(PortKind::Input, name.into(), Some(data_type), None)
    }

    pub fn output(&mut self, name: impl Into<String>, data_type: DataType) -> Arc<Port> {
        self.request(PortKind::Output, name.into(), Some(data_type), None)
    }

    pub fn flow_input(&mut self, name: impl Into<String>) -> Arc<Port> {
        self.request(PortKind::FlowIn, name.into(), None, None)
    }

    pub fn flow_output(&mut self, name: impl Into<String>) -> Arc<Port> {
        self.request(PortKind::FlowOut, name.into(), None, None)
    }

    /// Request a property; `options` only apply when a new one is created
    pub fn property(
        &mut self,
        name: impl Into<String>,
        data_type: DataType,
        options: PropertyOptions,
    ) -> Arc<Port> {
        self.request(PortKind::Property, name.into(), Some(data_type), Some(options))
    }

    fn request(
        &mut self,
        kind: PortKind,
        name: String,
        data_type: Option<DataType>,
        options: Option<PropertyOptions>,
    ) -> Arc<Port> {
        if let Some(existing) = self.next.find(kind, &name) {
            if existing.data_type() != data_type.as_ref() {
                log::warn!(
                    "Node '{}' requested {:?} port '{}' twice with different types; keeping the first",
                    self.node.id(),
                    kind,
                    name
                );
            }
            return existing.clone();
        }

        let reusable = self
            .previous
            .list(kind)
            .iter()
            .find(|port| {
                port.is_dynamic()
                    && port.name() == name
                    && port.data_type() == data_type.as_ref()
                    && !self.reused.contains(&Arc::as_ptr(port))
            })
            .cloned();

        let port = match reusable {
            Some(port) => {
                self.reused.insert(Arc::as_ptr(&port));
                port
            }
            None => {
                let port = Arc::new(self.create(kind, name, data_type, options));
                self.added.push(port.clone());
                port
            }
        };
        self.next.list_mut(kind).push(port.clone());
        port
    }

    fn create(
        &self,
        kind: PortKind,
        name: String,
        data_type: Option<DataType>,
        options: Option<PropertyOptions>,
    ) -> Port {
        let id = PortId {
            node_id: self.node.id().clone(),
            kind,
            index: self.node.next_port_index(),
        };
        match (kind, data_type) {
            (PortKind::Property, Some(data_type)) => {
                Port::property(id, name, data_type, options.unwrap_or_default(), self.origin)
            }
            (PortKind::FlowIn | PortKind::FlowOut, _) | (_, None) => {
                Port::flow(id, name, self.origin)
            }
            (_, Some(data_type)) => Port::data(id, name, data_type, self.origin),
        }
    }

    /// Port already requested in this pass, or else from the previous shape
    pub fn existing(&self, kind: PortKind, name: &str) -> Option<Arc<Port>> {
        self.next
            .find(kind, name)
            .or_else(|| self.previous.find(kind, name))
            .cloned()
    }

    /// Current value of a property
    pub fn property_value(&self, name: &str) -> Option<Value> {
        self.existing(PortKind::Property, name)
            .and_then(|port| port.read())
    }

    /// Current value of a property, extracted as `T`
    pub fn property_as<T: FromValue>(&self, name: &str) -> Option<T> {
        let value = self.property_value(name)?;
        crate::coercion::convert(&value, &T::data_type()).and_then(T::from_value)
    }

    /// Type of the value feeding an input (or published property)
    pub fn upstream_type(&self, name: &str) -> Option<DataType> {
        self.existing(PortKind::Input, name)
            .or_else(|| self.existing(PortKind::Property, name))
            .and_then(|port| port.upstream_type())
    }

    /// Set a property value from inside a pass
    ///
    /// Change notifications fire as usual; the reconfiguration they would
    /// trigger is ignored because a pass is already running.
    pub fn set_property_value(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let port = self
            .existing(PortKind::Property, name)
            .ok_or_else(|| GraphError::UnknownProperty {
                node_id: self.node.id().clone(),
                name: name.to_string(),
            })?;
        port.set_property_value(value.into())?;
        self.node.property_changed(&port);
        Ok(())
    }

    /// Close the pass and compute what changed
    pub(crate) fn finish(self) -> Reconciliation {
        let removed = self
            .previous
            .iter()
            .filter(|port| port.is_dynamic() && !self.reused.contains(&Arc::as_ptr(port)))
            .cloned()
            .collect();
        Reconciliation {
            next: self.next,
            added: self.added,
            removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LinkTable;
    use crate::context::ProcessContext;
    use crate::descriptor::NodeDescriptor;
    use crate::error::NodeError;
    use crate::events::NullEventSink;
    use crate::node::NodeLogic;
    use crate::types::NodeCategory;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Requests "Item 1..=count" inputs of the type in `element`
    struct Items {
        element: Mutex<DataType>,
        count: Mutex<usize>,
        nested: Mutex<Vec<bool>>,
    }

    impl Items {
        fn new(element: DataType, count: usize) -> Self {
            Self {
                element: Mutex::new(element),
                count: Mutex::new(count),
                nested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl NodeLogic for Items {
        fn descriptor(&self) -> NodeDescriptor {
            NodeDescriptor::new("items", "Items", NodeCategory::Data)
        }

        fn declare(&self, ports: &mut ShapeBuilder<'_>) {
            ports.output("Count", DataType::Int);
            ports.property(
                "Label",
                DataType::Text,
                PropertyOptions::new().affects_shape(),
            );
        }

        fn configure(&self, ports: &mut ShapeBuilder<'_>) {
            let element = self.element.lock().clone();
            for i in 1..=*self.count.lock() {
                ports.input(format!("Item {}", i), element.clone());
            }
            ports.flow_output("Done");
            // Changing a shape property mid-pass must not recurse
            ports.set_property_value("Label", "configured").unwrap();
            self.nested.lock().push(true);
        }

        async fn process(&self, _ctx: &ProcessContext<'_>) -> std::result::Result<(), NodeError> {
            Ok(())
        }
    }

    fn make_node(logic: Arc<Items>) -> Arc<Node> {
        let links = Arc::new(LinkTable::new(Arc::new(NullEventSink)));
        let node = Node::create("n1".to_string(), logic, (0.0, 0.0), links);
        node.reconfigure();
        node
    }

    #[test]
    fn test_identity_preserved_across_passes() {
        let logic = Arc::new(Items::new(DataType::Int, 2));
        let node = make_node(logic.clone());
        let first = node.input("Item 1").unwrap();
        let done = node.flow_outputs()[0].clone();

        node.reconfigure();
        assert!(Arc::ptr_eq(&first, &node.input("Item 1").unwrap()));
        assert!(Arc::ptr_eq(&done, &node.flow_outputs()[0]));
        assert_eq!(node.inputs().len(), 2);
    }

    #[test]
    fn test_unrequested_elements_removed() {
        let logic = Arc::new(Items::new(DataType::Int, 3));
        let node = make_node(logic.clone());
        let first = node.input("Item 1").unwrap();

        *logic.count.lock() = 1;
        node.reconfigure();

        let names: Vec<_> = node.inputs().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["Item 1".to_string()]);
        assert!(Arc::ptr_eq(&first, &node.input("Item 1").unwrap()));
    }

    #[test]
    fn test_type_change_creates_new_port() {
        let logic = Arc::new(Items::new(DataType::Int, 1));
        let node = make_node(logic.clone());
        let first = node.input("Item 1").unwrap();

        *logic.element.lock() = DataType::Text;
        node.reconfigure();

        let replaced = node.input("Item 1").unwrap();
        assert!(!Arc::ptr_eq(&first, &replaced));
        assert_eq!(replaced.data_type(), Some(&DataType::Text));
        assert_ne!(first.id(), replaced.id());
    }

    #[test]
    fn test_structural_ports_survive_empty_configure() {
        let logic = Arc::new(Items::new(DataType::Int, 0));
        let node = make_node(logic);
        assert!(node.output("Count").is_some());
        assert!(node.property("Label").is_some());
        assert!(node.inputs().is_empty());
    }

    #[test]
    fn test_nested_reconfigure_ignored() {
        let logic = Arc::new(Items::new(DataType::Int, 1));
        let node = make_node(logic.clone());

        // One pass per explicit reconfigure; the in-pass property change
        // does not start another
        assert_eq!(logic.nested.lock().len(), 1);
        assert_eq!(
            node.property_value("Label"),
            Some(Value::Text("configured".to_string()))
        );

        // Outside a pass, the same change does reconfigure
        node.set_property("Label", "outside").unwrap();
        assert_eq!(logic.nested.lock().len(), 2);
    }

    #[test]
    fn test_property_as() {
        let links = Arc::new(LinkTable::new(Arc::new(NullEventSink)));
        let node = Node::create(
            "n2".to_string(),
            Arc::new(crate::node::tests::ShapeShifter::new()),
            (0.0, 0.0),
            links,
        );
        node.reconfigure();
        node.set_property("Setting", 12).unwrap();

        let builder = ShapeBuilder::configuring(&node, node.ports());
        assert_eq!(builder.property_as::<i64>("Setting"), Some(12));
        assert_eq!(builder.property_as::<bool>("Setting"), None);
        assert!(builder.upstream_type("Extra").is_none());
        assert!(builder.upstream_type("Missing").is_none());
    }
}
