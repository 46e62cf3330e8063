//! Math Node
//!
//! Binary arithmetic on two floats.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use node_graph::{
    DataType, NodeCategory, NodeDescriptor, NodeError, NodeLogic, ProcessContext,
    PropertyOptions, ShapeBuilder,
};

/// Arithmetic operation selected by the "Operation" property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Min,
    Max,
    Power,
}

impl Operation {
    /// Apply the operation; `None` for division by zero
    pub fn apply(self, a: f64, b: f64) -> Option<f64> {
        match self {
            Self::Add => Some(a + b),
            Self::Subtract => Some(a - b),
            Self::Multiply => Some(a * b),
            Self::Divide if b == 0.0 => None,
            Self::Divide => Some(a / b),
            Self::Min => Some(a.min(b)),
            Self::Max => Some(a.max(b)),
            Self::Power => Some(a.powf(b)),
        }
    }
}

impl FromStr for Operation {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "add" | "+" => Ok(Self::Add),
            "subtract" | "-" => Ok(Self::Subtract),
            "multiply" | "*" => Ok(Self::Multiply),
            "divide" | "/" => Ok(Self::Divide),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "power" | "^" => Ok(Self::Power),
            other => Err(NodeError::failed(format!("Unknown operation '{}'", other))),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
            Self::Min => "min",
            Self::Max => "max",
            Self::Power => "power",
        };
        f.write_str(name)
    }
}

/// Math Node
///
/// # Inputs
/// - `A`, `B` - operands; integers and numeric text are accepted
///
/// # Properties
/// - `Operation` - `add`, `subtract`, `multiply`, `divide`, `min`, `max` or `power`
///
/// # Outputs
/// - `Result` - `A <op> B`
#[derive(Debug, Default, Clone)]
pub struct MathNode;

impl MathNode {
    pub const PORT_A: &'static str = "A";
    pub const PORT_B: &'static str = "B";
    pub const PROPERTY_OPERATION: &'static str = "Operation";
    pub const PORT_RESULT: &'static str = "Result";
}

#[async_trait]
impl NodeLogic for MathNode {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor::new("math", "Math", NodeCategory::Processing)
            .with_description("Applies an arithmetic operation to two numbers")
    }

    fn declare(&self, ports: &mut ShapeBuilder<'_>) {
        ports.input(Self::PORT_A, DataType::Float);
        ports.input(Self::PORT_B, DataType::Float);
        ports.property(
            Self::PROPERTY_OPERATION,
            DataType::Text,
            PropertyOptions::new().default_value(Operation::Add.to_string()),
        );
        ports.output(Self::PORT_RESULT, DataType::Float);
    }

    async fn process(&self, ctx: &ProcessContext<'_>) -> Result<(), NodeError> {
        let a: f64 = ctx.input_as(Self::PORT_A)?;
        let b: f64 = ctx.input_as(Self::PORT_B)?;
        let operation: Operation = ctx.property_as::<String>(Self::PROPERTY_OPERATION)?.parse()?;

        let result = operation
            .apply(a, b)
            .ok_or_else(|| NodeError::failed("Division by zero"))?;
        log::debug!(
            "MathNode {}: {} {} {} = {}",
            ctx.node().id(),
            a,
            operation,
            b,
            result
        );
        ctx.set_output(Self::PORT_RESULT, result)
    }
}
