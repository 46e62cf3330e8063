//! Ports: typed endpoints owned by exactly one node
//!
//! A `Port` is one struct with a tagged `PortRole`: plain input/output,
//! flow-in/flow-out for control edges, or `Property`, an input that also
//! carries a directly settable value and display metadata.
//!
//! Output values can only be assigned with a [`WriteToken`] for the owning
//! node. The scheduler mints that token and hands it to the node's
//! processing routine only.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::coercion::{self, Converter, Converters};
use crate::connection::Connection;
use crate::document::PortDocument;
use crate::error::{GraphError, NodeError};
use crate::types::{ConnectionId, NodeId};
use crate::value::{DataType, Value};

/// Discriminant of a port's role, used in ids, errors and documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    Input,
    Output,
    FlowIn,
    FlowOut,
    Property,
}

impl PortKind {
    pub fn is_flow(self) -> bool {
        matches!(self, Self::FlowIn | Self::FlowOut)
    }
}

/// Whether a port was declared up front or produced by a builder pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortOrigin {
    /// Declared by `NodeLogic::declare`; never removed by reconfiguration
    Structural,
    /// Produced by `NodeLogic::configure`; removed when no longer requested
    Dynamic,
}

/// Stable port identity: owning node, kind and creation index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortId {
    pub node_id: NodeId,
    pub kind: PortKind,
    pub index: usize,
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}/{}", self.node_id, self.kind, self.index)
    }
}

/// Display and behavior settings of a property
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PropertyOptions {
    /// Label shown in editors; defaults to the property name
    pub display_name: Option<String>,
    /// Free-form format hint (e.g. "0.00", "multiline")
    pub format: Option<String>,
    /// Expose the property as a connectable input port
    pub published: bool,
    /// Changing the value re-runs the node's configure pass
    pub affects_shape: bool,
    /// Initial value; the type's default when absent
    pub default: Option<Value>,
}

impl PropertyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn published(mut self) -> Self {
        self.published = true;
        self
    }

    pub fn affects_shape(mut self) -> Self {
        self.affects_shape = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Property state carried by the `Property` role
#[derive(Debug)]
pub struct PropertyMeta {
    display_name: String,
    format: Option<String>,
    affects_shape: bool,
    published: AtomicBool,
}

impl PropertyMeta {
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    pub fn affects_shape(&self) -> bool {
        self.affects_shape
    }

    pub fn is_published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }
}

/// What a port is for
#[derive(Debug)]
pub enum PortRole {
    Input,
    Output,
    FlowIn,
    FlowOut,
    Property(PropertyMeta),
}

/// Capability to assign output values of one node
///
/// Only the scheduler constructs these, and only for the node it is about
/// to run. Code outside a processing routine has no way to obtain one.
#[derive(Debug)]
pub struct WriteToken {
    node_id: NodeId,
}

impl WriteToken {
    pub(crate) fn new(node_id: NodeId) -> Self {
        Self { node_id }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

/// A typed endpoint on a node
pub struct Port {
    id: PortId,
    name: String,
    role: PortRole,
    data_type: Option<DataType>,
    origin: PortOrigin,
    visible: AtomicBool,
    /// Outputs: last published value. Properties: scalar value.
    value: RwLock<Option<Value>>,
    connections: Mutex<Vec<Weak<Connection>>>,
    converters: RwLock<Converters>,
}

impl Port {
    fn build(
        id: PortId,
        name: String,
        role: PortRole,
        data_type: Option<DataType>,
        origin: PortOrigin,
        value: Option<Value>,
    ) -> Self {
        Self {
            id,
            name,
            role,
            data_type,
            origin,
            visible: AtomicBool::new(true),
            value: RwLock::new(value),
            connections: Mutex::new(Vec::new()),
            converters: RwLock::new(Converters::new()),
        }
    }

    pub(crate) fn data(
        id: PortId,
        name: impl Into<String>,
        data_type: DataType,
        origin: PortOrigin,
    ) -> Self {
        let role = match id.kind {
            PortKind::Output => PortRole::Output,
            _ => PortRole::Input,
        };
        let value = match role {
            PortRole::Output => Some(data_type.default_value()),
            _ => None,
        };
        Self::build(id, name.into(), role, Some(data_type), origin, value)
    }

    pub(crate) fn flow(id: PortId, name: impl Into<String>, origin: PortOrigin) -> Self {
        let role = match id.kind {
            PortKind::FlowOut => PortRole::FlowOut,
            _ => PortRole::FlowIn,
        };
        Self::build(id, name.into(), role, None, origin, None)
    }

    pub(crate) fn property(
        id: PortId,
        name: impl Into<String>,
        data_type: DataType,
        options: PropertyOptions,
        origin: PortOrigin,
    ) -> Self {
        let name = name.into();
        let initial = options
            .default
            .as_ref()
            .and_then(|value| coercion::convert(value, &data_type))
            .unwrap_or_else(|| data_type.default_value());
        let meta = PropertyMeta {
            display_name: options.display_name.unwrap_or_else(|| name.clone()),
            format: options.format,
            affects_shape: options.affects_shape,
            published: AtomicBool::new(options.published),
        };
        Self::build(id, name, PortRole::Property(meta), Some(data_type), origin, Some(initial))
    }

    pub fn id(&self) -> &PortId {
        &self.id
    }

    pub fn node_id(&self) -> &str {
        &self.id.node_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PortKind {
        self.id.kind
    }

    pub fn role(&self) -> &PortRole {
        &self.role
    }

    /// Declared payload type; `None` for flow ports
    pub fn data_type(&self) -> Option<&DataType> {
        self.data_type.as_ref()
    }

    pub fn origin(&self) -> PortOrigin {
        self.origin
    }

    pub fn is_dynamic(&self) -> bool {
        self.origin == PortOrigin::Dynamic
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Release);
    }

    pub fn is_flow(&self) -> bool {
        self.kind().is_flow()
    }

    pub fn property_meta(&self) -> Option<&PropertyMeta> {
        match &self.role {
            PortRole::Property(meta) => Some(meta),
            _ => None,
        }
    }

    /// Published properties are addressable like ordinary inputs
    pub fn is_published(&self) -> bool {
        self.property_meta().map_or(false, PropertyMeta::is_published)
    }

    pub(crate) fn set_published(&self, published: bool) {
        if let Some(meta) = self.property_meta() {
            meta.published.store(published, Ordering::Release);
        }
    }

    /// Whether this port can be the target of a connection
    pub fn is_input_side(&self) -> bool {
        match &self.role {
            PortRole::Input | PortRole::FlowIn => true,
            PortRole::Property(meta) => meta.is_published(),
            _ => false,
        }
    }

    /// Whether this port can be the source of a connection
    pub fn is_output_side(&self) -> bool {
        matches!(self.role, PortRole::Output | PortRole::FlowOut)
    }

    /// Live connections attached to this port
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        self.connections
            .lock()
            .iter()
            .any(|conn| conn.strong_count() > 0)
    }

    pub(crate) fn attach(&self, connection: &Arc<Connection>) {
        let mut connections = self.connections.lock();
        connections.retain(|conn| conn.strong_count() > 0);
        connections.push(Arc::downgrade(connection));
    }

    pub(crate) fn detach(&self, connection_id: &ConnectionId) {
        self.connections.lock().retain(|conn| {
            conn.upgrade()
                .map_or(false, |conn| conn.id() != connection_id)
        });
    }

    /// Register a custom converter for values of `source` type
    ///
    /// Affects both [`Port::can_accept`] and reads.
    pub fn register_converter(&self, source: DataType, converter: Converter) {
        self.converters.write().register(source, converter);
    }

    /// Whether a connection from a port of `source` type would be readable
    pub fn can_accept(&self, source: &DataType) -> bool {
        match &self.data_type {
            Some(target) => coercion::can_accept(target, source, &self.converters.read()),
            None => false,
        }
    }

    /// The single active upstream connection, if any
    pub fn active_connection(&self) -> Option<Arc<Connection>> {
        self.connections().into_iter().next()
    }

    /// Type of the port feeding this one
    pub fn upstream_type(&self) -> Option<DataType> {
        self.active_connection()
            .and_then(|conn| conn.source().data_type().cloned())
    }

    /// Raw, unconverted value of the port feeding this one
    pub fn upstream_value(&self) -> Option<Value> {
        self.active_connection().and_then(|conn| conn.source().value())
    }

    /// Stored value: last published output, or a property's scalar value
    pub fn value(&self) -> Option<Value> {
        self.value.read().clone()
    }

    /// Read this port as its declared type
    ///
    /// Inputs pull and coerce from upstream; unconnected inputs yield the
    /// type's default. Published, connected properties behave like inputs,
    /// otherwise they yield their scalar value. Flow ports carry no value.
    pub fn read(&self) -> Option<Value> {
        let target = self.data_type.as_ref()?;
        match &self.role {
            PortRole::Output => self.value(),
            PortRole::Input => Some(self.coerce_upstream(target)),
            PortRole::Property(meta) => {
                if meta.is_published() && self.is_connected() {
                    Some(self.coerce_upstream(target))
                } else {
                    self.value()
                }
            }
            PortRole::FlowIn | PortRole::FlowOut => None,
        }
    }

    fn coerce_upstream(&self, target: &DataType) -> Value {
        let upstream = self.upstream_value();
        coercion::coerce(upstream.as_ref(), target, &self.converters.read())
    }

    /// Publish an output value
    ///
    /// Rejects tokens minted for another node, non-output ports, and values
    /// that cannot be implicitly converted to the declared type.
    pub fn assign(&self, value: Value, token: &WriteToken) -> Result<(), NodeError> {
        if token.node_id != self.id.node_id {
            return Err(NodeError::ForeignPort(self.name.clone()));
        }
        if !matches!(self.role, PortRole::Output) {
            return Err(NodeError::UnknownPort(self.name.clone()));
        }
        let expected = self
            .data_type
            .as_ref()
            .ok_or_else(|| NodeError::UnknownPort(self.name.clone()))?;

        let stored = fit_value(&value, expected).ok_or_else(|| NodeError::InvalidOutputType {
            port: self.name.clone(),
            expected: expected.clone(),
            found: value.data_type(),
        })?;
        *self.value.write() = Some(stored);
        Ok(())
    }

    /// Set a property's scalar value
    pub(crate) fn set_property_value(&self, value: Value) -> crate::error::Result<()> {
        let expected = self.data_type.as_ref().filter(|_| self.property_meta().is_some());
        let Some(expected) = expected else {
            return Err(GraphError::UnknownProperty {
                node_id: self.id.node_id.clone(),
                name: self.name.clone(),
            });
        };

        let stored = fit_value(&value, expected).ok_or_else(|| GraphError::InvalidValue {
            name: self.name.clone(),
            expected: expected.clone(),
            found: value.data_type(),
        })?;
        *self.value.write() = Some(stored);
        Ok(())
    }

    /// Restore a stored value from a document without type negotiation
    pub(crate) fn restore_value(&self, value: Value) {
        if let Some(expected) = &self.data_type {
            if let Some(value) = coercion::convert(&value, expected) {
                *self.value.write() = Some(value);
            }
        }
    }

    /// Write this port's fields into a document
    pub fn write(&self) -> PortDocument {
        PortDocument {
            name: self.name.clone(),
            kind: self.kind(),
            data_type: self.data_type.clone(),
            visible: self.is_visible(),
            dynamic: self.is_dynamic(),
            value: match self.role {
                PortRole::Output | PortRole::Property(_) => self.value(),
                _ => None,
            },
            property: self.property_meta().map(|meta| PropertyOptions {
                display_name: Some(meta.display_name.clone()),
                format: meta.format.clone(),
                published: meta.is_published(),
                affects_shape: meta.affects_shape,
                default: None,
            }),
        }
    }

    /// Rebuild a port from its document (used when restoring dynamic shape)
    pub(crate) fn from_document(
        id: PortId,
        doc: &PortDocument,
        origin: PortOrigin,
    ) -> Option<Self> {
        let port = match doc.kind {
            PortKind::FlowIn | PortKind::FlowOut => Self::flow(id, doc.name.clone(), origin),
            PortKind::Input | PortKind::Output => {
                Self::data(id, doc.name.clone(), doc.data_type.clone()?, origin)
            }
            PortKind::Property => {
                let options = doc.property.clone().unwrap_or_default();
                Self::property(id, doc.name.clone(), doc.data_type.clone()?, options, origin)
            }
        };
        port.set_visible(doc.visible);
        if let Some(value) = &doc.value {
            port.restore_value(value.clone());
        }
        Some(port)
    }
}

/// Accept a value as-is when types match, else through an implicit conversion
fn fit_value(value: &Value, expected: &DataType) -> Option<Value> {
    if &value.data_type() == expected {
        return Some(value.clone());
    }
    if coercion::implicit_conversion(&value.data_type(), expected) {
        return coercion::convert(value, expected);
    }
    None
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("data_type", &self.data_type)
            .field("origin", &self.origin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port_id(kind: PortKind, index: usize) -> PortId {
        PortId {
            node_id: "n1".to_string(),
            kind,
            index,
        }
    }

    #[test]
    fn test_unconnected_input_reads_default() {
        let port = Port::data(
            port_id(PortKind::Input, 0),
            "A",
            DataType::Float,
            PortOrigin::Structural,
        );
        assert_eq!(port.read(), Some(Value::Float(0.0)));
        assert!(!port.is_connected());
    }

    #[test]
    fn test_assign_requires_owning_token() {
        let port = Port::data(
            port_id(PortKind::Output, 0),
            "Out",
            DataType::Float,
            PortOrigin::Structural,
        );

        let foreign = WriteToken::new("other".to_string());
        assert!(matches!(
            port.assign(Value::Float(1.0), &foreign),
            Err(NodeError::ForeignPort(_))
        ));

        let own = WriteToken::new("n1".to_string());
        port.assign(Value::Int(2), &own).unwrap();
        assert_eq!(port.value(), Some(Value::Float(2.0)));

        assert!(matches!(
            port.assign(Value::Bool(true), &own),
            Err(NodeError::InvalidOutputType { .. })
        ));
    }

    #[test]
    fn test_inputs_cannot_be_assigned() {
        let port = Port::data(
            port_id(PortKind::Input, 0),
            "In",
            DataType::Int,
            PortOrigin::Structural,
        );
        let own = WriteToken::new("n1".to_string());
        assert!(port.assign(Value::Int(1), &own).is_err());
    }

    #[test]
    fn test_property_value_and_publish_switch() {
        let port = Port::property(
            port_id(PortKind::Property, 0),
            "Count",
            DataType::Int,
            PropertyOptions::new().default_value(3).display_name("Item Count"),
            PortOrigin::Structural,
        );

        assert_eq!(port.read(), Some(Value::Int(3)));
        assert!(!port.is_input_side());
        assert_eq!(port.property_meta().unwrap().display_name(), "Item Count");

        port.set_published(true);
        assert!(port.is_input_side());

        port.set_property_value(Value::from("7")).unwrap();
        assert_eq!(port.read(), Some(Value::Int(7)));
        assert!(port.set_property_value(Value::Bool(true)).is_err());
    }

    #[test]
    fn test_flow_ports_carry_no_value() {
        let port = Port::flow(port_id(PortKind::FlowIn, 0), "Exec", PortOrigin::Structural);
        assert!(port.is_flow());
        assert!(port.read().is_none());
        assert!(!port.can_accept(&DataType::Int));
    }
}
