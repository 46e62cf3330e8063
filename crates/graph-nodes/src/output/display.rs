//! Display Node
//!
//! Renders its input as text. Marks the end of a graph.

use async_trait::async_trait;
use node_graph::{
    DataType, NodeCategory, NodeDescriptor, NodeError, NodeLogic, ProcessContext, ShapeBuilder,
};

/// Display Node
///
/// Any value is accepted; it is converted to text on read. The text is
/// also published on `Text` so a caller can pick it up after a run.
///
/// # Inputs
/// - `Value` - the value to show
///
/// # Outputs
/// - `Text` - the rendered value
#[derive(Debug, Default, Clone)]
pub struct DisplayNode;

impl DisplayNode {
    pub const PORT_VALUE: &'static str = "Value";
    pub const PORT_TEXT: &'static str = "Text";
}

#[async_trait]
impl NodeLogic for DisplayNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("display", "Display", NodeCategory::Output)
            .with_description("Shows a value as text")
            .output()
    }

    fn declare(&self, ports: &mut ShapeBuilder<'_>) {
        ports.input(Self::PORT_VALUE, DataType::Text);
        ports.output(Self::PORT_TEXT, DataType::Text);
    }

    async fn process(&self, ctx: &ProcessContext<'_>) -> Result<(), NodeError> {
        let text: String = ctx.input_as(Self::PORT_VALUE)?;
        log::info!("{}: {}", ctx.node().name(), text);
        ctx.set_output(Self::PORT_TEXT, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_graph::{Canvas, Value};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unconnected_shows_empty_text() {
        let canvas = Canvas::new().with_factory(Arc::new(crate::builtin_registry()));
        let display = canvas.create_node("display", (0.0, 0.0)).unwrap();
        assert!(display.is_output());

        canvas.run().await.unwrap();
        assert_eq!(
            display.output(DisplayNode::PORT_TEXT).unwrap().value(),
            Some(Value::Text(String::new()))
        );
    }
}
