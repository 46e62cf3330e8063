//! Processing nodes
//!
//! Nodes that transform their inputs.

mod math;

pub use math::{MathNode, Operation};
