//! Payload types and values carried by ports
//!
//! `DataType` is the runtime type descriptor every data port is declared
//! with. It doubles as the capability table dynamic nodes query when they
//! derive their shape (`element()`, `is_list()`, `is_numeric()`), so no
//! reflection is needed to decide what a generic node should expose.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Declared payload type of a data port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DataType {
    /// Boolean flag
    Bool,
    /// 64-bit signed integer
    Int,
    /// 64-bit float
    Float,
    /// UTF-8 text
    Text,
    /// Arbitrary JSON document
    Json,
    /// Homogeneous list of another type
    List(Box<DataType>),
}

impl DataType {
    /// Shorthand for `List(element)`
    pub fn list_of(element: DataType) -> Self {
        Self::List(Box::new(element))
    }

    /// Element type, if this is a list type
    pub fn element(&self) -> Option<&DataType> {
        match self {
            Self::List(element) => Some(element),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }

    /// The value an unconnected or unconvertible port of this type yields
    pub fn default_value(&self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Int => Value::Int(0),
            Self::Float => Value::Float(0.0),
            Self::Text => Value::Text(String::new()),
            Self::Json => Value::Json(serde_json::Value::Null),
            Self::List(element) => Value::List {
                element: (**element).clone(),
                items: Vec::new(),
            },
        }
    }

    /// Explicit type name used in documents (`"int"`, `"list<float>"`, ...)
    pub fn type_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::List(element) => write!(f, "list<{}>", element),
        }
    }
}

/// Error returned when a type name cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown data type: '{0}'")]
pub struct UnknownDataType(pub String);

impl FromStr for DataType {
    type Err = UnknownDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        let lowered = name.to_ascii_lowercase();
        match lowered.as_str() {
            "bool" | "boolean" => return Ok(Self::Bool),
            "int" | "integer" => return Ok(Self::Int),
            "float" | "number" => return Ok(Self::Float),
            "text" | "string" => return Ok(Self::Text),
            "json" => return Ok(Self::Json),
            _ => {}
        }

        if let Some(inner) = lowered
            .strip_prefix("list<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return inner.parse().map(DataType::list_of);
        }

        Err(UnknownDataType(name.to_string()))
    }
}

impl From<DataType> for String {
    fn from(data_type: DataType) -> Self {
        data_type.to_string()
    }
}

impl TryFrom<String> for DataType {
    type Error = UnknownDataType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A value flowing through a port, tagged with its type in documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
    List { element: DataType, items: Vec<Value> },
}

impl Value {
    /// Build a list value, typed by its declared element type
    pub fn list(element: DataType, items: Vec<Value>) -> Self {
        Self::List { element, items }
    }

    /// Runtime type of this value
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Bool(_) => DataType::Bool,
            Self::Int(_) => DataType::Int,
            Self::Float(_) => DataType::Float,
            Self::Text(_) => DataType::Text,
            Self::Json(_) => DataType::Json,
            Self::List { element, .. } => DataType::list_of(element.clone()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_items(&self) -> Option<&[Value]> {
        match self {
            Self::List { items, .. } => Some(items),
            _ => None,
        }
    }

    /// Natural (untagged) JSON rendering of this value
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Json(json) => json.clone(),
            Self::List { items, .. } => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => f.write_str(s),
            Self::Json(serde_json::Value::String(s)) => f.write_str(s),
            Self::Json(json) => write!(f, "{}", json),
            Self::List { items, .. } => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Rust types that can be read out of a coerced port value
pub trait FromValue: Sized {
    /// The port type a value must be coerced to before extraction
    fn data_type() -> DataType;

    fn from_value(value: Value) -> Option<Self>;
}

impl FromValue for bool {
    fn data_type() -> DataType {
        DataType::Bool
    }

    fn from_value(value: Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for i64 {
    fn data_type() -> DataType {
        DataType::Int
    }

    fn from_value(value: Value) -> Option<Self> {
        value.as_int()
    }
}

impl FromValue for f64 {
    fn data_type() -> DataType {
        DataType::Float
    }

    fn from_value(value: Value) -> Option<Self> {
        value.as_float()
    }
}

impl FromValue for String {
    fn data_type() -> DataType {
        DataType::Text
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_parse_back() {
        let ty = DataType::list_of(DataType::list_of(DataType::Int));
        assert_eq!(ty.type_name(), "list<list<int>>");
        assert_eq!("list<list<int>>".parse::<DataType>().unwrap(), ty);
        assert_eq!("String".parse::<DataType>().unwrap(), DataType::Text);
        assert!("list<nope>".parse::<DataType>().is_err());
    }

    #[test]
    fn test_default_values() {
        assert_eq!(DataType::Int.default_value(), Value::Int(0));
        assert_eq!(DataType::Text.default_value(), Value::Text(String::new()));
        let list = DataType::list_of(DataType::Float).default_value();
        assert_eq!(list.data_type(), DataType::list_of(DataType::Float));
        assert_eq!(list.as_items().map(|items| items.len()), Some(0));
    }

    #[test]
    fn test_value_serialization_carries_type() {
        let value = Value::list(DataType::Int, vec![Value::Int(1), Value::Int(2)]);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["type"], "list");
        assert_eq!(json["value"]["element"], "int");

        let restored: Value = serde_json::from_value(json).unwrap();
        assert_eq!(restored, value);
    }

    #[test]
    fn test_display_stringifies_lists() {
        let value = Value::list(DataType::Float, vec![Value::Float(1.5), Value::Float(2.0)]);
        assert_eq!(value.to_string(), "[1.5, 2]");
        assert_eq!(Value::Json(serde_json::json!("hi")).to_string(), "hi");
    }
}
