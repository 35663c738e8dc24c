//! Evaluate `ValueExpr` against recorded run data.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::emit::InputMapping;
use crate::ir::types::{TemplatePart, ValueExpr};
use crate::registry::PortSchema;

use super::record::{ActionStatus, NodeRecord};

/// Everything an expression may read.
pub struct BindingScope<'a> {
    pub input: &'a Value,
    pub nodes: &'a BTreeMap<String, NodeRecord>,
    /// Current fan-out element and its index.
    pub element: Option<(usize, &'a Value)>,
    /// Output visible as this node's own output (compensation of a fan-out
    /// instance sees the instance output).
    pub own_output: Option<(&'a str, &'a Value)>,
}

impl<'a> BindingScope<'a> {
    pub fn new(input: &'a Value, nodes: &'a BTreeMap<String, NodeRecord>) -> Self {
        BindingScope {
            input,
            nodes,
            element: None,
            own_output: None,
        }
    }

    pub fn with_element(mut self, index: usize, item: &'a Value) -> Self {
        self.element = Some((index, item));
        self
    }

    pub fn with_own_output(mut self, node_id: &'a str, output: &'a Value) -> Self {
        self.own_output = Some((node_id, output));
        self
    }

    fn node_output(&self, node_id: &str) -> Result<Value, String> {
        if let Some((own, output)) = self.own_output {
            if own == node_id {
                return Ok(output.clone());
            }
        }
        match self.nodes.get(node_id) {
            Some(record) => match (record.status, &record.output) {
                (ActionStatus::Skipped, _) => Ok(Value::Null),
                (_, Some(output)) => Ok(output.clone()),
                (status, None) if status.is_resolved() => Ok(Value::Null),
                _ => Err(format!("node '{}' has not produced output yet", node_id)),
            },
            None => Err(format!("unknown node '{}'", node_id)),
        }
    }
}

/// Evaluate strictly: a path that leaves the value is an error.
pub fn evaluate(expr: &ValueExpr, scope: &BindingScope) -> Result<Value, String> {
    match expr {
        ValueExpr::Literal { value } => Ok(value.clone()),
        ValueExpr::Binding(b) => {
            let output = scope.node_output(&b.node_id)?;
            if output.is_null() {
                return Ok(Value::Null);
            }
            lookup(&output, &b.field_path)
                .cloned()
                .ok_or_else(|| format!("'{}.{}' is missing from the node output", b.node_id, b.field_path))
        }
        ValueExpr::WorkflowInput { field_path } => lookup(scope.input, field_path)
            .cloned()
            .ok_or_else(|| format!("'input.{}' is missing from the workflow input", field_path)),
        ValueExpr::Item { field_path } => {
            let (_, item) = scope
                .element
                .ok_or_else(|| "'item' used outside a fan-out".to_string())?;
            lookup(item, field_path)
                .cloned()
                .ok_or_else(|| format!("'item.{}' is missing from the element", field_path))
        }
        ValueExpr::Index => scope
            .element
            .map(|(i, _)| Value::from(i))
            .ok_or_else(|| "'index' used outside a fan-out".to_string()),
        ValueExpr::Template { parts } => {
            let mut out = String::new();
            for part in parts {
                match part {
                    TemplatePart::Lit { value } => out.push_str(value),
                    TemplatePart::Expr { value } => match evaluate(value, scope)? {
                        Value::String(s) => out.push_str(&s),
                        Value::Null => {}
                        other => out.push_str(&other.to_string()),
                    },
                }
            }
            Ok(Value::String(out))
        }
    }
}

/// Evaluate leniently: anything that does not resolve is `null`. Used for
/// condition operands, where `exists` must see a missing field as absent.
pub fn evaluate_lenient(expr: &ValueExpr, scope: &BindingScope) -> Value {
    evaluate(expr, scope).unwrap_or(Value::Null)
}

/// Evaluate input mappings into one object keyed by port.
pub fn evaluate_input(mappings: &[InputMapping], scope: &BindingScope) -> Result<Value, String> {
    let mut object = Map::new();
    for mapping in mappings {
        let value = evaluate(&mapping.value, scope)
            .map_err(|e| format!("input '{}': {}", mapping.port, e))?;
        object.insert(mapping.port.clone(), value);
    }
    Ok(Value::Object(object))
}

/// Follow a dotted path; numeric segments index arrays.
pub fn lookup<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Check a value against declared ports: an object carrying every required
/// port with a conforming value. No declared ports accepts anything.
pub fn check_ports(ports: &[PortSchema], value: &Value) -> Result<(), String> {
    if ports.is_empty() {
        return Ok(());
    }
    let Value::Object(map) = value else {
        return Err(format!("expected an object, got {}", value));
    };
    for port in ports {
        match map.get(&port.name) {
            None | Some(Value::Null) if port.required => {
                return Err(format!("missing required field '{}'", port.name));
            }
            None => {}
            Some(v) if !port.value_type.accepts(v) && !(v.is_null() && !port.required) => {
                return Err(format!(
                    "field '{}' must be {}, got {}",
                    port.name, port.value_type, v
                ));
            }
            Some(_) => {}
        }
    }
    Ok(())
}
