//! Node type metadata
//!
//! Every `NodeLogic` implementation describes itself with a
//! `NodeDescriptor`. The registry indexes node types by it and the canvas
//! copies its label, category and output flag onto new nodes.

use serde::{Deserialize, Serialize};

use crate::types::NodeCategory;

/// Static metadata for a node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    /// Unique type key (e.g., "math", "make-list")
    pub node_type: String,
    /// Category for grouping in editors
    pub category: NodeCategory,
    /// Human-readable label, used as the default node name
    pub label: String,
    /// Description of what the node does
    pub description: String,
    /// Whether instances are execution roots
    pub is_output: bool,
}

impl NodeDescriptor {
    pub fn new(
        node_type: impl Into<String>,
        label: impl Into<String>,
        category: NodeCategory,
    ) -> Self {
        Self {
            node_type: node_type.into(),
            category,
            label: label.into(),
            description: String::new(),
            is_output: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark instances of this type as execution roots
    pub fn output(mut self) -> Self {
        self.is_output = true;
        self
    }
}
