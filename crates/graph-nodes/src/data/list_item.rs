//! List Item Node
//!
//! Picks one element out of a list, typed after whatever feeds it.

use async_trait::async_trait;
use node_graph::{
    DataType, NodeCategory, NodeDescriptor, NodeError, NodeLogic, PortKind, ProcessContext,
    PropertyOptions, ShapeBuilder, Value,
};

/// List Item Node
///
/// The `Item` output takes the element type of the connected list. With
/// nothing connected it keeps the type it had, so a loaded graph keeps its
/// shape until its connections are restored.
///
/// # Inputs
/// - `List` - any list, or a JSON array
///
/// # Properties
/// - `Index` - position to read; negative values count from the end
///
/// # Outputs
/// - `Item` - the element at `Index`
#[derive(Debug, Default, Clone)]
pub struct ListItemNode;

impl ListItemNode {
    pub const PORT_LIST: &'static str = "List";
    pub const PROPERTY_INDEX: &'static str = "Index";
    pub const PORT_ITEM: &'static str = "Item";
}

/// Resolve a possibly negative index against `len`
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { len + index } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

#[async_trait]
impl NodeLogic for ListItemNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("list-item", "List Item", NodeCategory::Data)
            .with_description("Reads one element of a list")
    }

    fn declare(&self, ports: &mut ShapeBuilder<'_>) {
        ports.input(Self::PORT_LIST, DataType::Json);
        ports.property(
            Self::PROPERTY_INDEX,
            DataType::Int,
            PropertyOptions::new().default_value(0),
        );
    }

    fn configure(&self, ports: &mut ShapeBuilder<'_>) {
        let item_type = match ports.upstream_type(Self::PORT_LIST) {
            Some(upstream) => upstream.element().cloned().unwrap_or(DataType::Json),
            None => ports
                .existing(PortKind::Output, Self::PORT_ITEM)
                .and_then(|port| port.data_type().cloned())
                .unwrap_or(DataType::Json),
        };
        ports.output(Self::PORT_ITEM, item_type);
    }

    async fn process(&self, ctx: &ProcessContext<'_>) -> Result<(), NodeError> {
        let index: i64 = ctx.input_as(Self::PROPERTY_INDEX)?;

        let item = match ctx.upstream(Self::PORT_LIST) {
            Some(Value::List { items, .. }) => {
                let len = items.len();
                resolve_index(index, len)
                    .and_then(|i| items.into_iter().nth(i))
                    .ok_or_else(|| {
                        NodeError::failed(format!("Index {} out of range for {} item(s)", index, len))
                    })?
            }
            _ => {
                let json = ctx.input(Self::PORT_LIST)?.to_json();
                let array = json.as_array().ok_or_else(|| NodeError::InvalidInput {
                    port: Self::PORT_LIST.to_string(),
                    expected: DataType::list_of(DataType::Json),
                    found: DataType::Json,
                })?;
                resolve_index(index, array.len())
                    .and_then(|i| array.get(i))
                    .map(|item| Value::Json(item.clone()))
                    .ok_or_else(|| {
                        NodeError::failed(format!(
                            "Index {} out of range for {} item(s)",
                            index,
                            array.len()
                        ))
                    })?
            }
        };
        ctx.set_output(Self::PORT_ITEM, item)
    }
}
