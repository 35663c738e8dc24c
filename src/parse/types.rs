//! Serde types for the authored graph document.
//!
//! These mirror the JSON the authoring tool saves: typed nodes, control edges,
//! data edges and the workflow's own input/output contract.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::{PortSchema, Runtime};

// =============================================================================
// TOP-LEVEL DOCUMENT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDocument {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub version: String,
    /// Declared workflow input contract; referenced as `{{input.<name>}}`.
    #[serde(default)]
    pub inputs: Vec<PortSchema>,
    /// Workflow output fields, each a template over node outputs.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub control_edges: Vec<ControlEdge>,
    #[serde(default)]
    pub data_edges: Vec<DataEdge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEdge {
    pub source: String,
    pub target: String,
    /// Only set on successors of a condition node.
    #[serde(default)]
    pub branch: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataEdge {
    pub source: String,
    pub source_port: String,
    /// Dotted path inside the source port's value.
    #[serde(default)]
    pub path: Option<String>,
    pub target: String,
    pub target_port: String,
}

impl DataEdge {
    /// The full field path inside the source node's output (`port.path`).
    pub fn field_path(&self) -> String {
        match self.path.as_deref() {
            Some(p) if !p.is_empty() => format!("{}.{}", self.source_port, p),
            _ => self.source_port.clone(),
        }
    }
}

// =============================================================================
// NODES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(flatten)]
    pub body: NodeBody,
    /// Static params, checked against the action contract's param schema.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    /// Input port bindings written as templates.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    #[serde(default)]
    pub compensation: Option<CompensationDecl>,
    #[serde(default)]
    pub runtime: Option<Runtime>,
    #[serde(default)]
    pub task_queue: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl GraphNode {
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    /// The registry kind this node invokes, if any.
    pub fn action_kind(&self) -> Option<&str> {
        match &self.body {
            NodeBody::Action { action }
            | NodeBody::Foreach { action, .. }
            | NodeBody::Map { action, .. }
            | NodeBody::Retry { action, .. } => Some(action.as_str()),
            NodeBody::Condition { .. } | NodeBody::Subworkflow { .. } => None,
        }
    }

    pub fn node_type(&self) -> &'static str {
        match &self.body {
            NodeBody::Action { .. } => "action",
            NodeBody::Foreach { .. } => "foreach",
            NodeBody::Map { .. } => "map",
            NodeBody::Retry { .. } => "retry",
            NodeBody::Condition { .. } => "condition",
            NodeBody::Subworkflow { .. } => "subworkflow",
        }
    }

    pub fn is_fan_out(&self) -> bool {
        matches!(self.body, NodeBody::Foreach { .. } | NodeBody::Map { .. })
    }

    pub fn is_condition(&self) -> bool {
        matches!(self.body, NodeBody::Condition { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum NodeBody {
    Action {
        action: String,
    },
    Foreach {
        action: String,
        #[serde(default)]
        max_concurrency: Option<u32>,
        #[serde(default)]
        success_policy: Option<SuccessPolicy>,
    },
    Map {
        action: String,
        max_concurrency: u32,
        #[serde(default)]
        success_policy: Option<SuccessPolicy>,
    },
    Retry {
        action: String,
        max_attempts: u32,
        #[serde(default)]
        backoff: Option<Backoff>,
    },
    Condition {
        conditions: Vec<Condition>,
        #[serde(default)]
        combine_with: Combinator,
    },
    Subworkflow {
        workflow: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationDecl {
    pub action: String,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

// =============================================================================
// CONTROLLER SETTINGS
// =============================================================================

/// How many fan-out elements must succeed for the controller to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SuccessPolicy {
    #[default]
    AllOrFail,
    AtLeast { min_successes: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Backoff {
    #[default]
    None,
    Fixed {
        delay_ms: u64,
    },
    Exponential {
        initial_ms: u64,
        factor: u32,
        max_ms: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Template naming the value under test.
    pub field: String,
    pub operator: String,
    /// Literal, or a template string when it contains `{{`.
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Combinator {
    #[default]
    And,
    Or,
}
