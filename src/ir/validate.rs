//! IR invariant validation.
//!
//! Checks that a `GraphIR` is well formed before emission. A violation here
//! means an earlier phase let something through; it is never a user error.

use std::collections::{HashMap, HashSet};

use crate::ir::types::*;

#[derive(Debug, Clone)]
pub struct InvariantViolation {
    pub code: &'static str,
    pub message: String,
    /// The node where the violation was found, if applicable.
    pub node_id: Option<String>,
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node_id {
            Some(id) => write!(f, "[{}] {} (at node '{}')", self.code, self.message, id),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

/// Validate a GraphIR against all invariants. Returns all violations found.
pub fn validate_ir(ir: &GraphIR) -> Vec<InvariantViolation> {
    let mut errors = Vec::new();

    validate_non_empty(ir, &mut errors);
    validate_unique_states(ir, &mut errors);
    validate_edges(ir, &mut errors);
    validate_forward_bindings(ir, &mut errors);

    errors
}

// ---------------------------------------------------------------------------
// Invariant: at least one node
// ---------------------------------------------------------------------------

fn validate_non_empty(ir: &GraphIR, errors: &mut Vec<InvariantViolation>) {
    if ir.nodes.is_empty() {
        errors.push(InvariantViolation {
            code: "E001",
            message: "Workflow must contain at least one node".into(),
            node_id: None,
        });
    }
}

// ---------------------------------------------------------------------------
// Invariant: node ids and derived state names are unique
// ---------------------------------------------------------------------------

fn validate_unique_states(ir: &GraphIR, errors: &mut Vec<InvariantViolation>) {
    let mut ids = HashSet::new();
    let mut states: HashMap<String, &str> = HashMap::new();
    for node in &ir.nodes {
        if !ids.insert(node.id.as_str()) {
            errors.push(InvariantViolation {
                code: "E002",
                message: format!("Duplicate node ID '{}'", node.id),
                node_id: Some(node.id.clone()),
            });
            continue;
        }
        let state = state_name(&node.id);
        if let Some(other) = states.insert(state.clone(), &node.id) {
            errors.push(InvariantViolation {
                code: "E002",
                message: format!(
                    "Nodes '{}' and '{}' derive the same state name '{}'",
                    other, node.id, state
                ),
                node_id: Some(node.id.clone()),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Invariant: transitions target known nodes and follow topological order
// ---------------------------------------------------------------------------

fn validate_edges(ir: &GraphIR, errors: &mut Vec<InvariantViolation>) {
    let position: HashMap<&str, usize> = ir
        .nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    for edge in &ir.control_edges {
        match (position.get(edge.source.as_str()), position.get(edge.target.as_str())) {
            (Some(s), Some(t)) if s < t => {}
            (Some(_), Some(_)) => errors.push(InvariantViolation {
                code: "E004",
                message: format!(
                    "Transition '{}' -> '{}' runs against topological order",
                    edge.source, edge.target
                ),
                node_id: Some(edge.source.clone()),
            }),
            _ => errors.push(InvariantViolation {
                code: "E003",
                message: format!(
                    "Transition '{}' -> '{}' references an unknown state",
                    edge.source, edge.target
                ),
                node_id: Some(edge.source.clone()),
            }),
        }
    }

    for edge in &ir.data_edges {
        if !position.contains_key(edge.source.as_str())
            || !position.contains_key(edge.target.as_str())
        {
            errors.push(InvariantViolation {
                code: "E003",
                message: format!(
                    "Data edge '{}' -> '{}' references an unknown node",
                    edge.source, edge.target
                ),
                node_id: Some(edge.target.clone()),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Invariant: bindings only read nodes earlier in the order
// ---------------------------------------------------------------------------

fn validate_forward_bindings(ir: &GraphIR, errors: &mut Vec<InvariantViolation>) {
    let mut scope: HashSet<&str> = HashSet::new();

    for node in &ir.nodes {
        let mut refs: Vec<&BindingRef> = node
            .inputs
            .iter()
            .flat_map(|b| b.expr.binding_refs())
            .collect();
        if let NodeKind::Condition { conditions, .. } = &node.kind {
            for c in conditions {
                refs.extend(c.field.binding_refs());
                if let Some(v) = &c.value {
                    refs.extend(v.binding_refs());
                }
            }
        }
        for r in refs {
            if !scope.contains(r.node_id.as_str()) {
                errors.push(InvariantViolation {
                    code: "E005",
                    message: format!(
                        "Node '{}' reads '{}' which is not scheduled before it",
                        node.id, r.node_id
                    ),
                    node_id: Some(node.id.clone()),
                });
            }
        }
        scope.insert(node.id.as_str());
    }

    for output in &ir.outputs {
        for r in output.expr.binding_refs() {
            if !scope.contains(r.node_id.as_str()) {
                errors.push(InvariantViolation {
                    code: "E005",
                    message: format!(
                        "Workflow output '{}' reads unknown node '{}'",
                        output.name, r.node_id
                    ),
                    node_id: None,
                });
            }
        }
    }
}
