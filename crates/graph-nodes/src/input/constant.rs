//! Constant Node
//!
//! Emits a user-set value of a user-chosen type.

use async_trait::async_trait;
use node_graph::{
    DataType, NodeCategory, NodeDescriptor, NodeError, NodeLogic, ProcessContext,
    PropertyOptions, ShapeBuilder,
};

/// Constant Node
///
/// The "Type" property picks the payload type. Changing it replaces the
/// "Value" property and output; setting it to the same type keeps both,
/// along with the stored value and any connections.
///
/// # Properties
/// - `Type` - type name (`int`, `float`, `text`, `list<int>`, ...)
/// - `Value` - the constant, typed by `Type`
///
/// # Outputs
/// - `Value` - the constant
#[derive(Debug, Default, Clone)]
pub struct ConstantNode;

impl ConstantNode {
    /// Property holding the type name
    pub const PROPERTY_TYPE: &'static str = "Type";
    /// Property and output carrying the value
    pub const PORT_VALUE: &'static str = "Value";
}

#[async_trait]
impl NodeLogic for ConstantNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("constant", "Constant", NodeCategory::Input)
            .with_description("Emits a fixed value of a chosen type")
    }

    fn declare(&self, ports: &mut ShapeBuilder<'_>) {
        ports.property(
            Self::PROPERTY_TYPE,
            DataType::Text,
            PropertyOptions::new()
                .display_name("Type")
                .affects_shape()
                .default_value("float"),
        );
    }

    fn configure(&self, ports: &mut ShapeBuilder<'_>) {
        let data_type = crate::chosen_type(ports, Self::PROPERTY_TYPE, DataType::Float);
        ports.property(
            Self::PORT_VALUE,
            data_type.clone(),
            PropertyOptions::new().display_name("Value"),
        );
        ports.output(Self::PORT_VALUE, data_type);
    }

    async fn process(&self, ctx: &ProcessContext<'_>) -> Result<(), NodeError> {
        let value = ctx.input(Self::PORT_VALUE)?;
        log::debug!("ConstantNode {}: emitting {}", ctx.node().id(), value);
        ctx.set_output(Self::PORT_VALUE, value)
    }
}
