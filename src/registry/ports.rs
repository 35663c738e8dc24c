//! Port derivation: a pure function from a node's declared contract to its
//! port set. Ports are recomputed on every use, never stored on the node.

use crate::parse::types::{GraphNode, NodeBody};

use super::{NodeContract, PortSchema, Registry, ValueType, WorkflowSignature, ports_as_object};

/// Input port carrying the fan-out sequence.
pub const ITEMS_PORT: &str = "items";
/// Output port carrying per-element results in index order.
pub const RESULTS_PORT: &str = "results";
/// Output port of a condition node.
pub const CONDITION_RESULT_PORT: &str = "result";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSet {
    pub inputs: Vec<PortSchema>,
    pub outputs: Vec<PortSchema>,
}

impl PortSet {
    pub fn input(&self, name: &str) -> Option<&PortSchema> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&PortSchema> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// The whole node output as one object type.
    pub fn output_object(&self) -> ValueType {
        ports_as_object(&self.outputs)
    }

    /// Type found at `field_path` (`port.nested.path`) in the node output.
    pub fn output_type_at(&self, field_path: &str) -> Option<ValueType> {
        if field_path.is_empty() {
            return Some(self.output_object());
        }
        let (port, rest) = match field_path.split_once('.') {
            Some((p, r)) => (p, r),
            None => (field_path, ""),
        };
        self.output(port)?.value_type.type_at_path(rest)
    }
}

pub fn action_ports(contract: &NodeContract) -> PortSet {
    PortSet {
        inputs: contract.inputs.clone(),
        outputs: contract.outputs.clone(),
    }
}

/// Fan-out wraps an action: `items` plus the action's inputs in, one
/// `results` array of the action's output object out.
pub fn fan_out_ports(contract: &NodeContract) -> PortSet {
    let mut inputs = vec![PortSchema::required(
        ITEMS_PORT,
        ValueType::array(ValueType::Any),
    )];
    inputs.extend(contract.inputs.iter().cloned());
    PortSet {
        inputs,
        outputs: vec![PortSchema::required(
            RESULTS_PORT,
            ValueType::array(ports_as_object(&contract.outputs)),
        )],
    }
}

pub fn condition_ports() -> PortSet {
    PortSet {
        inputs: vec![],
        outputs: vec![PortSchema::required(
            CONDITION_RESULT_PORT,
            ValueType::Boolean,
        )],
    }
}

pub fn subworkflow_ports(signature: &WorkflowSignature) -> PortSet {
    PortSet {
        inputs: signature.inputs.clone(),
        outputs: signature.outputs.clone(),
    }
}

/// Derive a node's ports from the registry. `None` when the node's action
/// kind or workflow reference is unknown.
pub fn node_ports(node: &GraphNode, registry: &Registry) -> Option<PortSet> {
    match &node.body {
        NodeBody::Action { action } | NodeBody::Retry { action, .. } => {
            registry.contract(action).map(action_ports)
        }
        NodeBody::Foreach { action, .. } | NodeBody::Map { action, .. } => {
            registry.contract(action).map(fan_out_ports)
        }
        NodeBody::Condition { .. } => Some(condition_ports()),
        NodeBody::Subworkflow { workflow } => registry.workflow(workflow).map(subworkflow_ports),
    }
}
