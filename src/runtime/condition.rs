//! Side-effect-free evaluation of choice conditions.

use std::cmp::Ordering;

use serde_json::Value;

use crate::ir::types::{Combinator, ComparisonOp, ConditionIR};

use super::binding::{BindingScope, evaluate_lenient};

/// Evaluate every condition and combine the results.
pub fn evaluate_conditions(
    conditions: &[ConditionIR],
    combine_with: Combinator,
    scope: &BindingScope,
) -> bool {
    let mut results = conditions.iter().map(|c| {
        let left = evaluate_lenient(&c.field, scope);
        let right = c
            .value
            .as_ref()
            .map(|v| evaluate_lenient(v, scope))
            .unwrap_or(Value::Null);
        compare(c.operator, &left, &right)
    });
    match combine_with {
        Combinator::And => results.all(|r| r),
        Combinator::Or => results.any(|r| r),
    }
}

pub fn compare(op: ComparisonOp, left: &Value, right: &Value) -> bool {
    match op {
        ComparisonOp::Equals => values_equal(left, right),
        ComparisonOp::NotEquals => !values_equal(left, right),
        ComparisonOp::Gt => order(left, right) == Some(Ordering::Greater),
        ComparisonOp::Gte => matches!(order(left, right), Some(Ordering::Greater | Ordering::Equal)),
        ComparisonOp::Lt => order(left, right) == Some(Ordering::Less),
        ComparisonOp::Lte => matches!(order(left, right), Some(Ordering::Less | Ordering::Equal)),
        ComparisonOp::Contains => contains(left, right),
        ComparisonOp::NotContains => !contains(left, right),
        ComparisonOp::StartsWith => match (left, right) {
            (Value::String(l), Value::String(r)) => l.starts_with(r.as_str()),
            _ => false,
        },
        ComparisonOp::EndsWith => match (left, right) {
            (Value::String(l), Value::String(r)) => l.ends_with(r.as_str()),
            _ => false,
        },
        ComparisonOp::Exists => !left.is_null(),
        ComparisonOp::NotExists => left.is_null(),
        ComparisonOp::IsEmpty => is_empty(left),
        ComparisonOp::IsNotEmpty => !is_empty(left),
    }
}

/// JSON equality, except numbers compare by value (`1 == 1.0`).
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64() == r.as_f64(),
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

fn contains(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::String(l), Value::String(r)) => l.contains(r.as_str()),
        (Value::Array(items), needle) => items.iter().any(|i| values_equal(i, needle)),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}
