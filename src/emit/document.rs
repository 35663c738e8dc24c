//! The emitted workflow-definition DSL.
//!
//! One state per IR node, in IR order. Control edges become transitions, data
//! edges and input templates become typed input mappings, controllers become
//! a single composite construct. Execution metadata rides alongside each
//! state and never affects transitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ir::types::*;
use crate::registry::ports::ITEMS_PORT;
use crate::registry::{PortSchema, Runtime, ValueType};

/// Format tag written at the top of every definition.
pub const DSL_VERSION: &str = "sagaflow.workflow/v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub dsl: String,
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_contract: Vec<PortSchema>,
    pub output_contract: Vec<PortSchema>,
    /// States with no incoming transition.
    pub start_at: Vec<String>,
    pub states: Vec<StateDef>,
    pub output: Vec<OutputField>,
}

impl WorkflowDefinition {
    pub fn state(&self, name: &str) -> Option<&StateDef> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn state_for_node(&self, node_id: &str) -> Option<&StateDef> {
        self.states.iter().find(|s| s.node_id == node_id)
    }

    /// Incoming transitions of `state` as `(source state, when)`.
    pub fn incoming(&self, state: &str) -> Vec<(&str, Option<bool>)> {
        self.states
            .iter()
            .flat_map(|s| {
                s.transitions
                    .iter()
                    .filter(move |t| t.to == state)
                    .map(move |t| (s.name.as_str(), t.when))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDef {
    pub name: String,
    pub node_id: String,
    pub label: String,
    pub construct: Construct,
    pub transitions: Vec<Transition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationDef>,
    pub execution: ExecutionMeta,
}

impl StateDef {
    pub fn retry_policy(&self) -> RetryPolicy {
        match &self.construct {
            Construct::Retry { policy, .. } => *policy,
            _ => RetryPolicy::once(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub to: String,
    /// Branch label; set only on transitions out of a choice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMeta {
    pub runtime: Runtime,
    pub task_queue: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "construct", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Construct {
    Task {
        call: ActionCall,
    },
    /// Bounded dynamic expansion: one execution of `call` per element of `items`.
    FanOut {
        mode: FanOutMode,
        items: ValueExpr,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_concurrency: Option<u32>,
        success_policy: SuccessPolicy,
        call: ActionCall,
    },
    Retry {
        call: ActionCall,
        policy: RetryPolicy,
    },
    Choice {
        conditions: Vec<ConditionIR>,
        combine_with: Combinator,
    },
    ChildWorkflow {
        workflow_id: String,
        input: Vec<InputMapping>,
        input_contract: Vec<PortSchema>,
        output_contract: Vec<PortSchema>,
    },
}

impl Construct {
    pub fn call(&self) -> Option<&ActionCall> {
        match self {
            Construct::Task { call } | Construct::FanOut { call, .. } | Construct::Retry { call, .. } => {
                Some(call)
            }
            Construct::Choice { .. } | Construct::ChildWorkflow { .. } => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Construct::Task { .. } => "task",
            Construct::FanOut { .. } => "fanOut",
            Construct::Retry { .. } => "retry",
            Construct::Choice { .. } => "choice",
            Construct::ChildWorkflow { .. } => "childWorkflow",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCall {
    pub action: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    pub input: Vec<InputMapping>,
    /// Declared output contract of one execution.
    pub outputs: Vec<PortSchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationDef {
    pub call: ActionCall,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMapping {
    pub port: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub value: ValueExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputField {
    pub name: String,
    pub value: ValueExpr,
}

// =============================================================================
// IR → DSL
// =============================================================================

pub fn build_definition(ir: &GraphIR) -> WorkflowDefinition {
    let states: Vec<StateDef> = ir.nodes.iter().map(|n| build_state(n, ir)).collect();

    let start_at = ir
        .nodes
        .iter()
        .filter(|n| !ir.control_edges.iter().any(|e| e.target == n.id))
        .map(|n| state_name(&n.id))
        .collect();

    WorkflowDefinition {
        dsl: DSL_VERSION.to_string(),
        id: ir.metadata.id.clone(),
        name: ir.metadata.name.clone(),
        version: ir.metadata.version.clone(),
        description: ir.metadata.description.clone(),
        input_contract: ir.inputs.clone(),
        output_contract: ir.output_contract(),
        start_at,
        states,
        output: ir
            .outputs
            .iter()
            .map(|o| OutputField {
                name: o.name.clone(),
                value: o.expr.clone(),
            })
            .collect(),
    }
}

fn build_state(node: &NodeIR, ir: &GraphIR) -> StateDef {
    let transitions = ir
        .control_edges
        .iter()
        .filter(|e| e.source == node.id)
        .map(|e| Transition {
            to: state_name(&e.target),
            when: e.branch,
        })
        .collect();

    StateDef {
        name: state_name(&node.id),
        node_id: node.id.clone(),
        label: node.label.clone(),
        construct: build_construct(node),
        transitions,
        compensation: node.compensation.as_ref().map(|c| CompensationDef {
            call: ActionCall {
                action: c.action.clone(),
                params: c.params.clone(),
                input: mappings(&c.inputs),
                outputs: vec![],
            },
            timeout_ms: c.timeout_ms,
        }),
        execution: ExecutionMeta {
            runtime: node.execution.runtime,
            task_queue: node.execution.task_queue.clone(),
            timeout_ms: node.execution.timeout_ms,
        },
    }
}

fn build_construct(node: &NodeIR) -> Construct {
    let call = |action: &str, inputs: &[InputBinding], outputs: &[PortSchema]| ActionCall {
        action: action.to_string(),
        params: node.params.clone(),
        input: mappings(inputs),
        outputs: outputs.to_vec(),
    };

    match &node.kind {
        NodeKind::Action { action } => Construct::Task {
            call: call(action, &node.inputs, &node.outputs),
        },
        NodeKind::FanOut {
            mode,
            action,
            max_concurrency,
            success_policy,
            element_outputs,
        } => {
            let (items, per_element): (Vec<&InputBinding>, Vec<&InputBinding>) =
                node.inputs.iter().partition(|b| b.port == ITEMS_PORT);
            let items = items
                .first()
                .map(|b| b.expr.clone())
                .unwrap_or(ValueExpr::literal(Value::Array(vec![])));
            let per_element: Vec<InputBinding> = per_element.into_iter().cloned().collect();
            Construct::FanOut {
                mode: *mode,
                items,
                max_concurrency: *max_concurrency,
                success_policy: *success_policy,
                call: call(action, &per_element, element_outputs),
            }
        }
        NodeKind::Retry { action, policy } => Construct::Retry {
            call: call(action, &node.inputs, &node.outputs),
            policy: *policy,
        },
        NodeKind::Condition {
            conditions,
            combine_with,
        } => Construct::Choice {
            conditions: conditions.clone(),
            combine_with: *combine_with,
        },
        NodeKind::Subworkflow {
            workflow_id,
            input_contract,
            output_contract,
        } => Construct::ChildWorkflow {
            workflow_id: workflow_id.clone(),
            input: mappings(&node.inputs),
            input_contract: input_contract.clone(),
            output_contract: output_contract.clone(),
        },
    }
}

fn mappings(inputs: &[InputBinding]) -> Vec<InputMapping> {
    inputs
        .iter()
        .map(|b| InputMapping {
            port: b.port.clone(),
            value_type: b.value_type.clone(),
            value: b.expr.clone(),
        })
        .collect()
}
