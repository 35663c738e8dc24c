//! Value types for ports and params, with assignability and value conformance.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ValueType {
    Any,
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array { items: Box<ValueType> },
    Object { fields: BTreeMap<String, ValueType> },
}

impl ValueType {
    pub fn array(items: ValueType) -> Self {
        ValueType::Array {
            items: Box::new(items),
        }
    }

    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, ValueType)>,
        K: Into<String>,
    {
        ValueType::Object {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Whether a value of type `self` may flow into a slot of type `target`.
    pub fn is_assignable_to(&self, target: &ValueType) -> bool {
        match (self, target) {
            (_, ValueType::Any) | (ValueType::Any, _) => true,
            (ValueType::Integer, ValueType::Number) => true,
            (ValueType::Array { items: a }, ValueType::Array { items: b }) => a.is_assignable_to(b),
            (ValueType::Object { fields: source }, ValueType::Object { fields: wanted }) => {
                wanted.iter().all(|(name, ty)| {
                    source
                        .get(name)
                        .map(|have| have.is_assignable_to(ty))
                        .unwrap_or(false)
                })
            }
            (a, b) => a == b,
        }
    }

    /// Resolve the type found at a dotted path inside this type.
    ///
    /// Numeric segments index into arrays. Returns `None` when the path
    /// leaves the declared shape.
    pub fn type_at_path(&self, path: &str) -> Option<ValueType> {
        if path.is_empty() {
            return Some(self.clone());
        }
        let mut current = self.clone();
        for segment in path.split('.') {
            current = match current {
                ValueType::Any => return Some(ValueType::Any),
                ValueType::Object { mut fields } => fields.remove(segment)?,
                ValueType::Array { items } if segment.parse::<usize>().is_ok() => *items,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Whether a concrete JSON value conforms to this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ValueType::Any, _) => true,
            (ValueType::Null, Value::Null) => true,
            (ValueType::Boolean, Value::Bool(_)) => true,
            (ValueType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (ValueType::Number, Value::Number(_)) => true,
            (ValueType::String, Value::String(_)) => true,
            (ValueType::Array { items }, Value::Array(values)) => {
                values.iter().all(|v| items.accepts(v))
            }
            (ValueType::Object { fields }, Value::Object(map)) => fields
                .iter()
                .all(|(name, ty)| map.get(name).map(|v| ty.accepts(v)).unwrap_or(false)),
            _ => false,
        }
    }

    /// The narrowest type describing a literal value. Arrays take the element
    /// type when every element agrees, `any` otherwise.
    pub fn of_value(value: &Value) -> ValueType {
        match value {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => ValueType::Integer,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Array(values) => {
                let mut types = values.iter().map(ValueType::of_value);
                let items = match types.next() {
                    Some(first) if types.all(|t| t == first) => first,
                    _ => ValueType::Any,
                };
                ValueType::array(items)
            }
            Value::Object(map) => ValueType::Object {
                fields: map
                    .iter()
                    .map(|(k, v)| (k.clone(), ValueType::of_value(v)))
                    .collect(),
            },
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ValueType::Any => "any".into(),
            ValueType::Null => "null".into(),
            ValueType::Boolean => "boolean".into(),
            ValueType::Integer => "integer".into(),
            ValueType::Number => "number".into(),
            ValueType::String => "string".into(),
            ValueType::Array { items } => format!("array<{}>", items.describe()),
            ValueType::Object { fields } => {
                let inner: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.describe()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_widens_to_number() {
        assert!(ValueType::Integer.is_assignable_to(&ValueType::Number));
        assert!(!ValueType::Number.is_assignable_to(&ValueType::Integer));
    }

    #[test]
    fn object_allows_extra_source_fields() {
        let source = ValueType::object([("a", ValueType::Integer), ("b", ValueType::String)]);
        let target = ValueType::object([("a", ValueType::Number)]);
        assert!(source.is_assignable_to(&target));
        assert!(!target.is_assignable_to(&source));
    }

    #[test]
    fn type_at_nested_path() {
        let ty = ValueType::object([(
            "result",
            ValueType::object([("value", ValueType::Integer)]),
        )]);
        assert_eq!(ty.type_at_path("result.value"), Some(ValueType::Integer));
        assert_eq!(ty.type_at_path("result.missing"), None);
        assert_eq!(ValueType::Any.type_at_path("x.y"), Some(ValueType::Any));
    }

    #[test]
    fn array_index_segment() {
        let ty = ValueType::array(ValueType::String);
        assert_eq!(ty.type_at_path("0"), Some(ValueType::String));
        assert_eq!(ty.type_at_path("first"), None);
    }

    #[test]
    fn value_conformance() {
        let ty = ValueType::object([("y", ValueType::Integer)]);
        assert!(ty.accepts(&json!({"y": 2})));
        assert!(ty.accepts(&json!({"y": 2, "extra": true})));
        assert!(!ty.accepts(&json!({"y": "2"})));
        assert!(!ty.accepts(&json!({})));
        assert!(ValueType::Number.accepts(&json!(1.5)));
        assert!(!ValueType::Integer.accepts(&json!(1.5)));
    }

    #[test]
    fn literal_types() {
        assert_eq!(ValueType::of_value(&json!(3)), ValueType::Integer);
        assert_eq!(
            ValueType::of_value(&json!([1, 2])),
            ValueType::array(ValueType::Integer)
        );
        assert_eq!(
            ValueType::of_value(&json!([1, "a"])),
            ValueType::array(ValueType::Any)
        );
    }

    #[test]
    fn serde_shape() {
        let ty: ValueType =
            serde_json::from_str(r#"{"type":"array","items":{"type":"integer"}}"#).unwrap();
        assert_eq!(ty, ValueType::array(ValueType::Integer));
    }
}
