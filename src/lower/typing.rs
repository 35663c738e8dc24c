//! Static types of value expressions.

use std::collections::HashMap;

use crate::ir::types::{TemplatePart, ValueExpr};
use crate::registry::{PortSchema, PortSet, ValueType, ports_as_object};

pub struct TypeEnv<'a> {
    pub workflow_inputs: &'a [PortSchema],
    /// Every node in the graph; `None` ports type as `any`.
    pub ports: &'a HashMap<&'a str, Option<PortSet>>,
    /// Whether `item` and `index` are in scope.
    pub fan_out: bool,
}

/// Infer the type an expression evaluates to. `Err` names the reference
/// that does not resolve.
pub fn infer_type(expr: &ValueExpr, env: &TypeEnv) -> Result<ValueType, String> {
    match expr {
        ValueExpr::Literal { value } => Ok(ValueType::of_value(value)),
        ValueExpr::Binding(b) => {
            let ports = env
                .ports
                .get(b.node_id.as_str())
                .ok_or_else(|| format!("'{}' is not a node", b.node_id))?;
            match ports {
                None => Ok(ValueType::Any),
                Some(ports) => ports.output_type_at(&b.field_path).ok_or_else(|| {
                    format!(
                        "'{}.{}' is not a declared output field",
                        b.node_id, b.field_path
                    )
                }),
            }
        }
        ValueExpr::WorkflowInput { field_path } => ports_as_object(env.workflow_inputs)
            .type_at_path(field_path)
            .ok_or_else(|| format!("'input.{}' is not a declared workflow input", field_path)),
        ValueExpr::Item { .. } if !env.fan_out => {
            Err("'item' is only defined inside foreach/map nodes".into())
        }
        ValueExpr::Item { .. } => Ok(ValueType::Any),
        ValueExpr::Index if !env.fan_out => {
            Err("'index' is only defined inside foreach/map nodes".into())
        }
        ValueExpr::Index => Ok(ValueType::Integer),
        ValueExpr::Template { parts } => {
            for part in parts {
                if let TemplatePart::Expr { value } = part {
                    infer_type(value, env)?;
                }
            }
            Ok(ValueType::String)
        }
    }
}
