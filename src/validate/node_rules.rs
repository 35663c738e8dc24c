//! Per-node contract and controller validation (R001–R009).

use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::CompilerConfig;
use crate::error::CompilerError;
use crate::ir::types::ComparisonOp;
use crate::lower::builder::resolve_execution;
use crate::parse::types::*;
use crate::registry::ports::ITEMS_PORT;
use crate::registry::{NodeContract, PortSchema, Registry};

/// Validate a single node against the registry. Returns all errors found.
pub fn validate_node_config(
    node: &GraphNode,
    registry: &Registry,
    config: &CompilerConfig,
) -> Vec<CompilerError> {
    let mut errors = Vec::new();
    let node_id = Some(node.id.clone());

    // R001: the wrapped action kind must be registered
    let contract = match node.action_kind() {
        Some(kind) => {
            let contract = registry.contract(kind);
            if contract.is_none() {
                errors.push(CompilerError::validate(
                    "R001",
                    format!("Node '{}' uses unknown action kind '{}'", node.id, kind),
                    node_id.clone(),
                ));
            }
            contract
        }
        None => None,
    };

    // R002–R004: params against the contract's param schema
    if let Some(contract) = contract {
        check_params(&node.id, &node.params, &contract.params, &mut errors);
    } else if node.action_kind().is_none() && !node.params.is_empty() {
        errors.push(CompilerError::validate(
            "R004",
            format!(
                "Node '{}' of type {} takes no params",
                node.id,
                node.node_type()
            ),
            node_id.clone(),
        ));
    }

    // R005/R006 only once the contract itself resolves
    if node.action_kind().is_none() || contract.is_some() {
        if let Err(e) = resolve_execution(node, registry, config) {
            errors.extend(e);
        }
    }

    check_controller(node, contract, &mut errors);

    if let Some(decl) = &node.compensation {
        check_compensation(node, decl, registry, &mut errors);
    }

    errors
}

fn check_params(
    node_id: &str,
    params: &BTreeMap<String, Value>,
    schema: &[PortSchema],
    errors: &mut Vec<CompilerError>,
) {
    for declared in schema {
        match params.get(&declared.name) {
            None if declared.required => errors.push(CompilerError::validate(
                "R002",
                format!(
                    "Node '{}' is missing required param '{}'",
                    node_id, declared.name
                ),
                Some(node_id.to_string()),
            )),
            None => {}
            Some(value) if !declared.value_type.accepts(value) => {
                errors.push(CompilerError::validate(
                    "R003",
                    format!(
                        "Param '{}' of node '{}' must be {}, got {}",
                        declared.name, node_id, declared.value_type, value
                    ),
                    Some(node_id.to_string()),
                ))
            }
            Some(_) => {}
        }
    }
    for name in params.keys() {
        if !schema.iter().any(|p| &p.name == name) {
            errors.push(CompilerError::validate(
                "R004",
                format!("Node '{}' sets undeclared param '{}'", node_id, name),
                Some(node_id.to_string()),
            ));
        }
    }
}

fn check_controller(
    node: &GraphNode,
    contract: Option<&NodeContract>,
    errors: &mut Vec<CompilerError>,
) {
    let node_id = Some(node.id.clone());
    let invalid = |message: String| CompilerError::validate("R007", message, node_id.clone());

    match &node.body {
        NodeBody::Foreach {
            max_concurrency,
            success_policy,
            ..
        } => {
            if *max_concurrency == Some(0) {
                errors.push(invalid(format!(
                    "Foreach node '{}' has maxConcurrency 0",
                    node.id
                )));
            }
            check_success_policy(node, success_policy, errors);
        }
        NodeBody::Map {
            max_concurrency,
            success_policy,
            ..
        } => {
            if *max_concurrency == 0 {
                errors.push(invalid(format!("Map node '{}' has maxConcurrency 0", node.id)));
            }
            check_success_policy(node, success_policy, errors);
        }
        NodeBody::Retry {
            max_attempts,
            backoff,
            ..
        } => {
            if *max_attempts == 0 {
                errors.push(invalid(format!("Retry node '{}' has maxAttempts 0", node.id)));
            }
            if let Some(Backoff::Exponential {
                initial_ms,
                factor,
                max_ms,
            }) = backoff
            {
                if *factor == 0 || initial_ms > max_ms {
                    errors.push(invalid(format!(
                        "Retry node '{}' has an invalid exponential backoff (factor {}, initial {}ms, max {}ms)",
                        node.id, factor, initial_ms, max_ms
                    )));
                }
            }
        }
        NodeBody::Condition { conditions, .. } => {
            if conditions.is_empty() {
                errors.push(invalid(format!(
                    "Condition node '{}' has no conditions",
                    node.id
                )));
            }
            for c in conditions {
                match ComparisonOp::parse(&c.operator) {
                    None => errors.push(invalid(format!(
                        "Condition node '{}' uses unknown operator '{}'",
                        node.id, c.operator
                    ))),
                    Some(op) if !op.is_unary() && c.value.is_none() => {
                        errors.push(invalid(format!(
                            "Condition node '{}': operator '{}' needs a value",
                            node.id, c.operator
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        NodeBody::Action { .. } | NodeBody::Subworkflow { .. } => {}
    }

    // R008: `items` is reserved on fan-out nodes
    if node.is_fan_out() {
        if let Some(contract) = contract {
            if contract.inputs.iter().any(|p| p.name == ITEMS_PORT) {
                errors.push(CompilerError::validate(
                    "R008",
                    format!(
                        "Action '{}' wrapped by fan-out node '{}' declares the reserved input port '{}'",
                        contract.kind, node.id, ITEMS_PORT
                    ),
                    node_id.clone(),
                ));
            }
        }
    }
}

fn check_success_policy(
    node: &GraphNode,
    policy: &Option<SuccessPolicy>,
    errors: &mut Vec<CompilerError>,
) {
    if let Some(SuccessPolicy::AtLeast { min_successes: 0 }) = policy {
        errors.push(CompilerError::validate(
            "R007",
            format!("Node '{}' has success policy atLeast 0", node.id),
            Some(node.id.clone()),
        ));
    }
}

fn check_compensation(
    node: &GraphNode,
    decl: &CompensationDecl,
    registry: &Registry,
    errors: &mut Vec<CompilerError>,
) {
    let node_id = Some(node.id.clone());
    if node.is_condition() {
        errors.push(CompilerError::validate(
            "R009",
            format!(
                "Condition node '{}' has no side effects to compensate",
                node.id
            ),
            node_id,
        ));
        return;
    }
    match registry.contract(&decl.action) {
        None => errors.push(CompilerError::validate(
            "R001",
            format!(
                "Compensation of node '{}' uses unknown action kind '{}'",
                node.id, decl.action
            ),
            node_id,
        )),
        Some(contract) => check_params(&node.id, &decl.params, &contract.params, errors),
    }
}
