//! Data-edge and port-binding checks (D001–D005, W001).

use std::collections::{BTreeMap, BTreeSet};

use crate::error::CompilerError;
use crate::lower::CompileContext;
use crate::lower::reference::resolve_value_expr;
use crate::parse::types::{CompensationDecl, GraphNode};
use crate::registry::{PortSchema, ValueType};

use super::template::{Scope, Visible, check_expr, input_scope};

/// Check every node's port bindings. Returns errors and warnings.
pub fn validate_bindings(ctx: &CompileContext) -> Vec<CompilerError> {
    let mut errors = Vec::new();

    for node in ctx.unique_nodes() {
        let Some(ports) = ctx.ports_of(&node.id) else {
            continue;
        };
        let ancestors = ctx.ancestors(&node.id);
        let mut bound: BTreeMap<&str, usize> = BTreeMap::new();

        for edge in ctx.doc.data_edges.iter().filter(|e| e.target == node.id) {
            *bound.entry(edge.target_port.as_str()).or_default() += 1;
            let node_id = Some(node.id.clone());

            let target = ports.input(&edge.target_port);
            if target.is_none() {
                errors.push(CompilerError::validate(
                    "D001",
                    format!(
                        "Data edge targets undeclared input port '{}' of node '{}'",
                        edge.target_port, node.id
                    ),
                    node_id.clone(),
                ));
            }

            if !ctx.node_ids.contains(edge.source.as_str()) {
                continue;
            }
            if !ancestors.contains(&edge.source) {
                errors.push(CompilerError::validate(
                    "D004",
                    format!(
                        "Data edge source '{}' is not upstream of '{}' in the control graph",
                        edge.source, node.id
                    ),
                    node_id.clone(),
                ));
            }

            let Some(source_ports) = ctx.ports_of(&edge.source) else {
                continue;
            };
            if source_ports.output(&edge.source_port).is_none() {
                errors.push(CompilerError::validate(
                    "D001",
                    format!(
                        "Data edge reads undeclared output port '{}' of node '{}'",
                        edge.source_port, edge.source
                    ),
                    node_id.clone(),
                ));
                continue;
            }
            let field_path = edge.field_path();
            let Some(source_type) = source_ports.output_type_at(&field_path) else {
                errors.push(CompilerError::validate(
                    "D001",
                    format!(
                        "Path '{}' is not part of the declared output of node '{}'",
                        field_path, edge.source
                    ),
                    node_id.clone(),
                ));
                continue;
            };
            if let Some(target) = target {
                check_assignable(
                    &source_type,
                    target,
                    &format!("{}.{}", edge.source, field_path),
                    &node.id,
                    &mut errors,
                );
            }
        }

        let scope = input_scope(node, &ancestors);
        for (port, template) in &node.inputs {
            *bound.entry(port.as_str()).or_default() += 1;
            match ports.input(port) {
                None => errors.push(CompilerError::validate(
                    "D001",
                    format!("Node '{}' binds undeclared input port '{}'", node.id, port),
                    Some(node.id.clone()),
                )),
                Some(target) => {
                    let parsed = resolve_value_expr(template, &ctx.node_ids);
                    // Template errors are reported by the template pass.
                    if let Ok((_, ty)) = check_expr(ctx, parsed, &scope, Some(&node.id), port) {
                        check_assignable(&ty, target, template, &node.id, &mut errors);
                    }
                }
            }
        }

        for (port, count) in &bound {
            if *count > 1 {
                errors.push(CompilerError::validate(
                    "D003",
                    format!(
                        "Input port '{}' of node '{}' is bound {} times",
                        port, node.id, count
                    ),
                    Some(node.id.clone()),
                ));
            }
        }

        let bound_ports: BTreeSet<&str> = bound.keys().copied().collect();
        check_unbound(node, &ports.inputs, &bound_ports, "input", &mut errors);

        if let Some(decl) = &node.compensation {
            check_compensation_bindings(ctx, node, decl, &ancestors, &mut errors);
        }
    }

    errors
}

fn check_compensation_bindings(
    ctx: &CompileContext,
    node: &GraphNode,
    decl: &CompensationDecl,
    ancestors: &BTreeSet<String>,
    errors: &mut Vec<CompilerError>,
) {
    let Some(contract) = ctx.registry.contract(&decl.action) else {
        return;
    };
    let mut with_self = ancestors.clone();
    with_self.insert(node.id.clone());
    let scope = Scope {
        visible: Visible::Nodes(&with_self),
        fan_out: node.is_fan_out(),
    };

    for (port, template) in &decl.inputs {
        match contract.inputs.iter().find(|p| &p.name == port) {
            None => errors.push(CompilerError::validate(
                "D001",
                format!(
                    "Compensation '{}' of node '{}' binds undeclared input port '{}'",
                    decl.action, node.id, port
                ),
                Some(node.id.clone()),
            )),
            Some(target) => {
                let parsed = resolve_value_expr(template, &ctx.node_ids);
                if let Ok((_, ty)) = check_expr(ctx, parsed, &scope, Some(&node.id), port) {
                    check_assignable(&ty, target, template, &node.id, errors);
                }
            }
        }
    }

    let bound: BTreeSet<&str> = decl.inputs.keys().map(String::as_str).collect();
    check_unbound(node, &contract.inputs, &bound, "compensation input", errors);
}

fn check_assignable(
    source: &ValueType,
    target: &PortSchema,
    what: &str,
    node_id: &str,
    errors: &mut Vec<CompilerError>,
) {
    if !source.is_assignable_to(&target.value_type) {
        errors.push(CompilerError::validate(
            "D002",
            format!(
                "Type mismatch on port '{}' of node '{}': '{}' is {}, port expects {}",
                target.name, node_id, what, source, target.value_type
            ),
            Some(node_id.to_string()),
        ));
    }
}

fn check_unbound(
    node: &GraphNode,
    declared: &[PortSchema],
    bound: &BTreeSet<&str>,
    what: &str,
    errors: &mut Vec<CompilerError>,
) {
    for port in declared {
        if bound.contains(port.name.as_str()) {
            continue;
        }
        if port.required {
            errors.push(CompilerError::validate(
                "D005",
                format!(
                    "Required {} port '{}' of node '{}' is not bound",
                    what, port.name, node.id
                ),
                Some(node.id.clone()),
            ));
        } else {
            errors.push(CompilerError::warning(
                "W001",
                format!(
                    "Optional {} port '{}' of node '{}' is not bound",
                    what, port.name, node.id
                ),
                Some(node.id.clone()),
            ));
        }
    }
}
