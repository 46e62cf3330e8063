//! Read-time type coercion for input ports
//!
//! An input port never stores a value of its own. It pulls from its
//! upstream output and converts to its declared type in this order:
//!
//! 1. a custom converter registered on the port for the source type
//! 2. an implicit conversion, when [`implicit_conversion`] allows it
//! 3. otherwise the target type's default value
//!
//! [`can_accept`] answers "would a connection from this source type be
//! readable" with exactly the same rules, so connection validation and
//! read-time conversion cannot disagree.

use std::collections::HashMap;
use std::sync::Arc;

use crate::value::{DataType, Value};

/// User-supplied conversion from one source type to a port's type
///
/// Returning `None` makes the read fall back to the default value.
pub type Converter = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Custom converters of one input port, keyed by source type
#[derive(Clone, Default)]
pub struct Converters {
    by_source: HashMap<DataType, Converter>,
}

impl Converters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the converter used for values of `source` type
    pub fn register(&mut self, source: DataType, converter: Converter) {
        self.by_source.insert(source, converter);
    }

    pub fn get(&self, source: &DataType) -> Option<&Converter> {
        self.by_source.get(source)
    }

    pub fn contains(&self, source: &DataType) -> bool {
        self.by_source.contains_key(source)
    }

    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}

impl std::fmt::Debug for Converters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.by_source.keys()).finish()
    }
}

/// Whether a value of `source` type converts to `target` without a custom converter
pub fn implicit_conversion(source: &DataType, target: &DataType) -> bool {
    if source == target {
        return true;
    }

    match (source, target) {
        // Everything stringifies and everything renders as JSON
        (_, DataType::Text) | (_, DataType::Json) => true,
        (DataType::Int, DataType::Float) => true,
        (DataType::Text, DataType::Bool | DataType::Int | DataType::Float) => true,
        (DataType::Json, DataType::Bool | DataType::Int | DataType::Float) => true,
        (DataType::List(from), DataType::List(to)) => implicit_conversion(from, to),
        _ => false,
    }
}

/// Convert a value to `target`, if an implicit path exists and succeeds
///
/// Parse paths (`Text → Int`, `Json → Float`, ...) are accepted at connect
/// time but may still fail for a particular value; that yields `None`.
pub fn convert(value: &Value, target: &DataType) -> Option<Value> {
    if &value.data_type() == target {
        return Some(value.clone());
    }

    match (value, target) {
        (_, DataType::Text) => Some(Value::Text(value.to_string())),
        (_, DataType::Json) => Some(Value::Json(value.to_json())),
        (Value::Int(i), DataType::Float) => Some(Value::Float(*i as f64)),
        (Value::Text(s), DataType::Bool) => parse_bool(s).map(Value::Bool),
        (Value::Text(s), DataType::Int) => s.trim().parse().ok().map(Value::Int),
        (Value::Text(s), DataType::Float) => s.trim().parse().ok().map(Value::Float),
        (Value::Json(json), DataType::Bool) => json.as_bool().map(Value::Bool),
        (Value::Json(json), DataType::Int) => json.as_i64().map(Value::Int),
        (Value::Json(json), DataType::Float) => json.as_f64().map(Value::Float),
        (Value::List { items, .. }, DataType::List(element)) => items
            .iter()
            .map(|item| convert(item, element))
            .collect::<Option<Vec<_>>>()
            .map(|items| Value::list((**element).clone(), items)),
        _ => None,
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Whether a port of `target` type with `converters` accepts `source` values
pub fn can_accept(target: &DataType, source: &DataType, converters: &Converters) -> bool {
    converters.contains(source) || implicit_conversion(source, target)
}

/// Coerce an upstream value (or its absence) into `target`
///
/// Never fails: a missing, unconvertible or unparsable value degrades to
/// `target`'s default.
pub fn coerce(value: Option<&Value>, target: &DataType, converters: &Converters) -> Value {
    let Some(value) = value else {
        return target.default_value();
    };

    let source = value.data_type();
    if let Some(converter) = converters.get(&source) {
        return converter(value)
            .and_then(|converted| convert(&converted, target))
            .unwrap_or_else(|| target.default_value());
    }

    if implicit_conversion(&source, target) {
        if let Some(converted) = convert(value, target) {
            return converted;
        }
        log::debug!(
            "Coercion of {} value to {} failed, using default",
            source,
            target
        );
    }

    target.default_value()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_widening() {
        assert!(implicit_conversion(&DataType::Int, &DataType::Float));
        assert!(!implicit_conversion(&DataType::Float, &DataType::Int));
        assert_eq!(
            coerce(Some(&Value::Int(3)), &DataType::Float, &Converters::new()),
            Value::Float(3.0)
        );
    }

    #[test]
    fn test_text_accepts_everything() {
        let list = DataType::list_of(DataType::Bool);
        assert!(can_accept(&DataType::Text, &list, &Converters::new()));
        let value = Value::list(DataType::Bool, vec![Value::Bool(true)]);
        assert_eq!(
            coerce(Some(&value), &DataType::Text, &Converters::new()),
            Value::Text("[true]".to_string())
        );
    }

    #[test]
    fn test_parse_path_falls_back_to_default() {
        let converters = Converters::new();
        assert!(can_accept(&DataType::Int, &DataType::Text, &converters));
        assert_eq!(
            coerce(Some(&Value::from(" 42 ")), &DataType::Int, &converters),
            Value::Int(42)
        );
        assert_eq!(
            coerce(Some(&Value::from("forty-two")), &DataType::Int, &converters),
            Value::Int(0)
        );
    }

    #[test]
    fn test_missing_value_is_default() {
        assert_eq!(
            coerce(None, &DataType::Bool, &Converters::new()),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_incompatible_types_rejected() {
        let converters = Converters::new();
        assert!(!can_accept(&DataType::Int, &DataType::Bool, &converters));
        assert!(!can_accept(
            &DataType::list_of(DataType::Int),
            &DataType::Int,
            &converters
        ));
        assert_eq!(
            coerce(Some(&Value::Bool(true)), &DataType::Int, &converters),
            Value::Int(0)
        );
    }

    #[test]
    fn test_custom_converter_mirrors_accept() {
        let mut converters = Converters::new();
        assert!(!can_accept(&DataType::Int, &DataType::Bool, &converters));

        converters.register(
            DataType::Bool,
            Arc::new(|value| value.as_bool().map(|b| Value::Int(b as i64))),
        );
        assert!(can_accept(&DataType::Int, &DataType::Bool, &converters));
        assert_eq!(
            coerce(Some(&Value::Bool(true)), &DataType::Int, &converters),
            Value::Int(1)
        );
    }

    #[test]
    fn test_list_elements_convert() {
        let from = DataType::list_of(DataType::Int);
        let to = DataType::list_of(DataType::Float);
        assert!(implicit_conversion(&from, &to));

        let value = Value::list(DataType::Int, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(
            convert(&value, &to),
            Some(Value::list(
                DataType::Float,
                vec![Value::Float(1.0), Value::Float(2.0)]
            ))
        );
    }
}
