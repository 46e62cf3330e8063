//! Serialized forms of graph entities
//!
//! Each entity writes itself into one of these documents and reads itself
//! back from it. Types are written as explicit names (`"int"`,
//! `"list<float>"`) and values carry a type tag, so documents are
//! self-describing JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::groups::NodeGroup;
use crate::port::{PortKind, PropertyOptions};
use crate::types::{NodeId, Position};
use crate::value::{DataType, Value};

pub use crate::connection::ConnectionDocument;

/// Document format version written by this crate
pub const DOCUMENT_VERSION: u32 = 1;

/// Serialized port or property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDocument {
    pub name: String,
    pub kind: PortKind,
    /// Declared payload type; absent for flow ports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
    pub visible: bool,
    /// Produced by a builder pass rather than declared structurally
    pub dynamic: bool,
    /// Output value or property scalar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Property display/publish settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<PropertyOptions>,
}

/// Serialized node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDocument {
    pub id: NodeId,
    pub node_type: String,
    pub name: String,
    pub position: Position,
    pub visible: bool,
    /// Root of execution plans
    #[serde(default)]
    pub is_output: bool,
    /// Every property, structural and dynamic, in declaration order
    #[serde(default)]
    pub properties: Vec<PortDocument>,
    /// Inputs, outputs and flow ports, structural and dynamic
    #[serde(default)]
    pub ports: Vec<PortDocument>,
}

/// Serialized canvas
///
/// Nodes come first so a reader can create every node before wiring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasDocument {
    pub version: u32,
    pub nodes: Vec<NodeDocument>,
    #[serde(default)]
    pub connections: Vec<ConnectionDocument>,
    #[serde(default)]
    pub groups: Vec<NodeGroup>,
}

impl Default for CanvasDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            nodes: Vec::new(),
            connections: Vec::new(),
            groups: Vec::new(),
        }
    }
}

impl CanvasDocument {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the document to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        log::debug!("Saved canvas document to {}", path.as_ref().display());
        Ok(())
    }

    /// Read a document from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&contents)
    }

    pub fn node(&self, id: &str) -> Option<&NodeDocument> {
        self.nodes.iter().find(|node| node.id == id)
    }
}
