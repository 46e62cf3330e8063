//! Graph Nodes
//!
//! Built-in node implementations for the node-graph engine.
//! Each node is a small building block; several of them choose their
//! ports at run time from a type picked by the user or inferred from
//! upstream.
//!
//! # Categories
//!
//! - **Input**: Nodes that produce values (constants)
//! - **Processing**: Nodes that transform values (arithmetic)
//! - **Data**: Nodes that build and take apart lists
//! - **Output**: Nodes that display results; these are execution roots
//!
//! # Usage
//!
//! ```ignore
//! let registry = graph_nodes::builtin_registry();
//! let canvas = Canvas::new().with_factory(Arc::new(registry));
//! ```

pub mod data;
pub mod input;
pub mod output;
pub mod processing;

// Re-export all nodes for convenience
pub use data::*;
pub use input::*;
pub use output::*;
pub use processing::*;

use node_graph::{DataType, NodeRegistry, ShapeBuilder};

/// Register every built-in node type
pub fn register_builtins(registry: &mut NodeRegistry) {
    registry.register_logic::<ConstantNode>();
    registry.register_logic::<MathNode>();
    registry.register_logic::<MakeListNode>();
    registry.register_logic::<ListItemNode>();
    registry.register_logic::<DisplayNode>();
}

/// A registry holding only the built-in node types
pub fn builtin_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_builtins(&mut registry);
    registry
}

/// Read a type-name property, falling back when it does not parse
pub(crate) fn chosen_type(ports: &ShapeBuilder<'_>, property: &str, fallback: DataType) -> DataType {
    let Some(name) = ports.property_as::<String>(property) else {
        return fallback;
    };
    match name.parse() {
        Ok(data_type) => data_type,
        Err(e) => {
            log::warn!(
                "Node '{}': {}; using {}",
                ports.node_id(),
                e,
                fallback
            );
            fallback
        }
    }
}
