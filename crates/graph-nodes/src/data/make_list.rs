//! Make List Node
//!
//! Collects a user-chosen number of items of a user-chosen type into a list.

use async_trait::async_trait;
use node_graph::{
    DataType, NodeCategory, NodeDescriptor, NodeError, NodeLogic, ProcessContext,
    PropertyOptions, ShapeBuilder, Value,
};

/// Upper bound on the "Count" property
const MAX_ITEMS: i64 = 64;

/// Make List Node
///
/// Exposes inputs `Item 1` to `Item n` of the element type and one
/// `List` output of `list<element>`. Growing `Count` adds inputs and keeps
/// the existing ones connected; changing `Element Type` replaces every
/// item input.
///
/// # Properties
/// - `Element Type` - element type name
/// - `Count` - number of item inputs
///
/// # Outputs
/// - `List` - the items, in input order
#[derive(Debug, Default, Clone)]
pub struct MakeListNode;

impl MakeListNode {
    pub const PROPERTY_ELEMENT_TYPE: &'static str = "Element Type";
    pub const PROPERTY_COUNT: &'static str = "Count";
    pub const PORT_LIST: &'static str = "List";

    /// Name of the `index`-th item input, counting from 1
    pub fn item_port(index: usize) -> String {
        format!("Item {}", index)
    }
}

/// Item count from the property, clamped to `0..=MAX_ITEMS`
fn item_count(ports: &ShapeBuilder<'_>) -> usize {
    let count = ports
        .property_as::<i64>(MakeListNode::PROPERTY_COUNT)
        .unwrap_or(0);
    count.clamp(0, MAX_ITEMS) as usize
}

#[async_trait]
impl NodeLogic for MakeListNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("make-list", "Make List", NodeCategory::Data)
            .with_description("Builds a list from individual items")
    }

    fn declare(&self, ports: &mut ShapeBuilder<'_>) {
        ports.property(
            Self::PROPERTY_ELEMENT_TYPE,
            DataType::Text,
            PropertyOptions::new().affects_shape().default_value("int"),
        );
        ports.property(
            Self::PROPERTY_COUNT,
            DataType::Int,
            PropertyOptions::new().affects_shape().default_value(2),
        );
    }

    fn configure(&self, ports: &mut ShapeBuilder<'_>) {
        let element = crate::chosen_type(ports, Self::PROPERTY_ELEMENT_TYPE, DataType::Int);
        for index in 1..=item_count(ports) {
            ports.input(Self::item_port(index), element.clone());
        }
        ports.output(Self::PORT_LIST, DataType::list_of(element));
    }

    async fn process(&self, ctx: &ProcessContext<'_>) -> Result<(), NodeError> {
        let list_type = ctx
            .output_type(Self::PORT_LIST)
            .ok_or_else(|| NodeError::UnknownPort(Self::PORT_LIST.to_string()))?;
        let element = list_type.element().cloned().unwrap_or(DataType::Json);

        let items = ctx
            .node()
            .inputs()
            .iter()
            .filter_map(|port| port.read())
            .collect::<Vec<Value>>();
        log::debug!(
            "MakeListNode {}: {} item(s) of {}",
            ctx.node().id(),
            items.len(),
            element
        );
        ctx.set_output(Self::PORT_LIST, Value::list(element, items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_graph::{Canvas, PortKind};
    use std::sync::Arc;

    fn canvas() -> Canvas {
        Canvas::new().with_factory(Arc::new(crate::builtin_registry()))
    }

    fn input_names(node: &node_graph::Node) -> Vec<String> {
        node.inputs().iter().map(|p| p.name().to_string()).collect()
    }

    #[test]
    fn test_count_controls_inputs() {
        let canvas = canvas();
        let node = canvas.create_node("make-list", (0.0, 0.0)).unwrap();
        assert_eq!(input_names(&node), vec!["Item 1", "Item 2"]);

        let first = node.input("Item 1").unwrap();
        node.set_property(MakeListNode::PROPERTY_COUNT, 4).unwrap();
        assert_eq!(input_names(&node).len(), 4);
        assert!(Arc::ptr_eq(&first, &node.input("Item 1").unwrap()));

        node.set_property(MakeListNode::PROPERTY_COUNT, -3).unwrap();
        assert!(node.inputs().is_empty());
    }

    #[test]
    fn test_element_type_drives_list_type() {
        let canvas = canvas();
        let node = canvas.create_node("make-list", (0.0, 0.0)).unwrap();
        node.set_property(MakeListNode::PROPERTY_ELEMENT_TYPE, "text")
            .unwrap();

        assert_eq!(
            node.input("Item 2").unwrap().data_type(),
            Some(&DataType::Text)
        );
        assert_eq!(
            node.port(PortKind::Output, MakeListNode::PORT_LIST)
                .unwrap()
                .data_type(),
            Some(&DataType::list_of(DataType::Text))
        );
    }

    #[tokio::test]
    async fn test_builds_list_with_defaults_for_unconnected_items() {
        let canvas = canvas();
        let constant = canvas.create_node("constant", (0.0, 0.0)).unwrap();
        let list = canvas.create_node("make-list", (0.0, 0.0)).unwrap();
        let display = canvas.create_node("display", (0.0, 0.0)).unwrap();

        constant.set_property("Type", "int").unwrap();
        constant.set_property("Value", 9).unwrap();
        canvas
            .connect_by_name(constant.id(), "Value", list.id(), "Item 2")
            .unwrap();
        canvas
            .connect_by_name(list.id(), MakeListNode::PORT_LIST, display.id(), "Value")
            .unwrap();

        canvas.run().await.unwrap();
        assert_eq!(
            list.output(MakeListNode::PORT_LIST).unwrap().value(),
            Some(Value::list(DataType::Int, vec![Value::Int(0), Value::Int(9)]))
        );
        assert_eq!(
            display.output("Text").unwrap().value(),
            Some(Value::Text("[0, 9]".into()))
        );
    }
}
