//! Input nodes
//!
//! Nodes that produce values for the rest of the graph.

mod constant;

pub use constant::ConstantNode;
