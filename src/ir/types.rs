//! IR type definitions.
//!
//! The IR bridges the authored node-edge graph (input) and the emitted
//! workflow definition (output). Every node is fully resolved here: ports come
//! from the registry, runtime and task queue are fixed, and every input is a
//! typed `ValueExpr`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use crate::parse::types::{Backoff, Combinator, SuccessPolicy};
use crate::registry::{PortSchema, Runtime, ValueType};

// =============================================================================
// TOP-LEVEL IR
// =============================================================================

/// Canonical, validated form of one workflow graph. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphIR {
    pub metadata: WorkflowMetadata,
    /// Workflow input contract.
    pub inputs: Vec<PortSchema>,
    /// Workflow output fields, sorted by name.
    pub outputs: Vec<OutputMapping>,
    /// Nodes in topological order, ties broken by node id.
    pub nodes: Vec<NodeIR>,
    /// Sorted by (source, target, branch).
    pub control_edges: Vec<ControlEdgeIR>,
    /// Sorted by (target, target_port).
    pub data_edges: Vec<DataEdgeIR>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputMapping {
    pub name: String,
    pub value_type: ValueType,
    pub expr: ValueExpr,
}

impl GraphIR {
    pub fn node(&self, id: &str) -> Option<&NodeIR> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The workflow output contract, derived from the output mappings.
    pub fn output_contract(&self) -> Vec<PortSchema> {
        self.outputs
            .iter()
            .map(|o| PortSchema::required(o.name.clone(), o.value_type.clone()))
            .collect()
    }
}

// =============================================================================
// NODES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeIR {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    pub execution: ExecutionTarget,
    pub params: BTreeMap<String, Value>,
    /// One binding per bound input port, sorted by port name.
    pub inputs: Vec<InputBinding>,
    /// Declared output ports (derived from the contract).
    pub outputs: Vec<PortSchema>,
    pub compensation: Option<CompensationIR>,
}

/// Scheduling designation fixed at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTarget {
    pub runtime: Runtime,
    pub task_queue: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputBinding {
    pub port: String,
    pub value_type: ValueType,
    pub expr: ValueExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationIR {
    pub action: String,
    pub params: BTreeMap<String, Value>,
    pub inputs: Vec<InputBinding>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FanOutMode {
    Foreach,
    Map,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn once() -> Self {
        RetryPolicy {
            max_attempts: 1,
            backoff: Backoff::None,
        }
    }

    /// Delay before attempt `next_attempt` (2-based: the first retry is 2).
    pub fn delay_before(&self, next_attempt: u32) -> u64 {
        match self.backoff {
            Backoff::None => 0,
            Backoff::Fixed { delay_ms } => delay_ms,
            Backoff::Exponential {
                initial_ms,
                factor,
                max_ms,
            } => {
                let exponent = next_attempt.saturating_sub(2);
                let mut delay = initial_ms;
                for _ in 0..exponent {
                    delay = delay.saturating_mul(factor as u64);
                    if delay >= max_ms {
                        return max_ms;
                    }
                }
                delay.min(max_ms)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeKind {
    Action {
        action: String,
    },
    /// One node, N executions of `action`, one per element of the `items` input.
    FanOut {
        mode: FanOutMode,
        action: String,
        max_concurrency: Option<u32>,
        success_policy: SuccessPolicy,
        /// Per-element output contract (the wrapped action's outputs).
        element_outputs: Vec<PortSchema>,
    },
    Retry {
        action: String,
        policy: RetryPolicy,
    },
    Condition {
        conditions: Vec<ConditionIR>,
        combine_with: Combinator,
    },
    Subworkflow {
        workflow_id: String,
        input_contract: Vec<PortSchema>,
        output_contract: Vec<PortSchema>,
    },
}

impl NodeKind {
    pub fn action(&self) -> Option<&str> {
        match self {
            NodeKind::Action { action }
            | NodeKind::FanOut { action, .. }
            | NodeKind::Retry { action, .. } => Some(action.as_str()),
            NodeKind::Condition { .. } | NodeKind::Subworkflow { .. } => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Action { .. } => "action",
            NodeKind::FanOut {
                mode: FanOutMode::Foreach,
                ..
            } => "foreach",
            NodeKind::FanOut {
                mode: FanOutMode::Map,
                ..
            } => "map",
            NodeKind::Retry { .. } => "retry",
            NodeKind::Condition { .. } => "condition",
            NodeKind::Subworkflow { .. } => "subworkflow",
        }
    }
}

// =============================================================================
// EDGES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ControlEdgeIR {
    pub source: String,
    pub target: String,
    pub branch: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEdgeIR {
    pub source: String,
    /// `port.nested.path` inside the source node's output.
    pub field_path: String,
    pub target: String,
    pub target_port: String,
    pub value_type: ValueType,
}

// =============================================================================
// CONDITIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionIR {
    pub field: ValueExpr,
    pub operator: ComparisonOp,
    pub value: Option<ValueExpr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComparisonOp {
    Equals,
    NotEquals,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Exists,
    NotExists,
    IsEmpty,
    IsNotEmpty,
}

impl ComparisonOp {
    pub fn parse(op: &str) -> Option<Self> {
        let parsed = match op {
            "equals" => ComparisonOp::Equals,
            "notEquals" => ComparisonOp::NotEquals,
            "gt" => ComparisonOp::Gt,
            "gte" => ComparisonOp::Gte,
            "lt" => ComparisonOp::Lt,
            "lte" => ComparisonOp::Lte,
            "contains" => ComparisonOp::Contains,
            "notContains" => ComparisonOp::NotContains,
            "startsWith" => ComparisonOp::StartsWith,
            "endsWith" => ComparisonOp::EndsWith,
            "exists" => ComparisonOp::Exists,
            "notExists" => ComparisonOp::NotExists,
            "isEmpty" => ComparisonOp::IsEmpty,
            "isNotEmpty" => ComparisonOp::IsNotEmpty,
            _ => return None,
        };
        Some(parsed)
    }

    /// Unary operators take no right-hand value.
    pub fn is_unary(&self) -> bool {
        matches!(
            self,
            ComparisonOp::Exists
                | ComparisonOp::NotExists
                | ComparisonOp::IsEmpty
                | ComparisonOp::IsNotEmpty
        )
    }
}

// =============================================================================
// VALUE EXPRESSIONS: the data reference model
// =============================================================================

/// Unified representation of any data reference in the IR.
/// Replaces `{{nodeId.field}}` from the authored graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ValueExpr {
    /// A literal JSON value.
    Literal { value: Value },
    /// Reference to an upstream node's output.
    Binding(BindingRef),
    /// Reference to the workflow input: `{{input.field}}`.
    WorkflowInput { field_path: String },
    /// The current fan-out element: `{{item}}` / `{{item.field}}`.
    Item { field_path: String },
    /// The current fan-out element index: `{{index}}`.
    Index,
    /// String interpolation of literal text and expressions.
    Template { parts: Vec<TemplatePart> },
}

/// Reference to a field of a node's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRef {
    pub node_id: String,
    /// Dot-separated path: `port` or `port.nested`. Empty = the whole output.
    pub field_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "part", rename_all = "camelCase")]
pub enum TemplatePart {
    Lit { value: String },
    Expr { value: ValueExpr },
}

impl ValueExpr {
    pub fn literal(value: Value) -> Self {
        ValueExpr::Literal { value }
    }

    pub fn string(s: impl Into<String>) -> Self {
        ValueExpr::Literal {
            value: Value::String(s.into()),
        }
    }

    pub fn binding(node_id: impl Into<String>, field_path: impl Into<String>) -> Self {
        ValueExpr::Binding(BindingRef {
            node_id: node_id.into(),
            field_path: field_path.into(),
        })
    }

    pub fn input(field_path: impl Into<String>) -> Self {
        ValueExpr::WorkflowInput {
            field_path: field_path.into(),
        }
    }

    pub fn item(field_path: impl Into<String>) -> Self {
        ValueExpr::Item {
            field_path: field_path.into(),
        }
    }

    /// Every node binding this expression reads.
    pub fn binding_refs(&self) -> Vec<&BindingRef> {
        match self {
            ValueExpr::Binding(b) => vec![b],
            ValueExpr::Template { parts } => parts
                .iter()
                .flat_map(|p| match p {
                    TemplatePart::Expr { value } => value.binding_refs(),
                    TemplatePart::Lit { .. } => vec![],
                })
                .collect(),
            _ => vec![],
        }
    }

    /// Canonical `{{…}}` spelling, used in plan renderings.
    pub fn render(&self) -> String {
        match self {
            ValueExpr::Literal { value } => value.to_string(),
            ValueExpr::Binding(b) if b.field_path.is_empty() => format!("{{{{{}}}}}", b.node_id),
            ValueExpr::Binding(b) => format!("{{{{{}.{}}}}}", b.node_id, b.field_path),
            ValueExpr::WorkflowInput { field_path } => format!("{{{{input.{}}}}}", field_path),
            ValueExpr::Item { field_path } if field_path.is_empty() => "{{item}}".into(),
            ValueExpr::Item { field_path } => format!("{{{{item.{}}}}}", field_path),
            ValueExpr::Index => "{{index}}".into(),
            ValueExpr::Template { parts } => {
                let mut out = String::from("\"");
                for part in parts {
                    match part {
                        TemplatePart::Lit { value } => out.push_str(value),
                        TemplatePart::Expr { value } => out.push_str(&value.render()),
                    }
                }
                out.push('"');
                out
            }
        }
    }
}

/// Derived state identifier for a node: `state_<id>` with `-` and `.`
/// replaced by `_`.
pub fn state_name(node_id: &str) -> String {
    format!("state_{}", node_id.replace(['-', '.'], "_"))
}
