//! Output nodes
//!
//! Nodes that display results. Every node here is an execution root.

mod display;

pub use display::DisplayNode;
