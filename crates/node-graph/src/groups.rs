//! Node groups
//!
//! Groups are stored by the canvas for editors to render; the engine
//! attaches no behavior to them beyond keeping member ids consistent when
//! nodes are removed.

use serde::{Deserialize, Serialize};

use crate::types::{GroupId, NodeId};

/// Named set of nodes on a canvas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroup {
    /// Unique identifier for this group
    pub id: GroupId,
    /// Human-readable name for the group
    pub name: String,
    /// Member nodes
    pub node_ids: Vec<NodeId>,
    /// Optional description for the group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NodeGroup {
    /// Create a new empty node group
    pub fn new(id: impl Into<GroupId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            node_ids: Vec::new(),
            description: None,
        }
    }

    /// Set the member nodes
    pub fn with_nodes(mut self, node_ids: Vec<NodeId>) -> Self {
        self.node_ids = node_ids;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.node_ids.iter().any(|id| id == node_id)
    }

    /// Drop a member; returns whether it was present
    pub(crate) fn remove_node(&mut self, node_id: &str) -> bool {
        let before = self.node_ids.len();
        self.node_ids.retain(|id| id != node_id);
        self.node_ids.len() != before
    }
}
