//! Run record: the state of one workflow run as derived from its history.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Compensating,
    Compensated,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Compensated | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Compensating => "COMPENSATING",
            RunStatus::Compensated => "COMPENSATED",
            RunStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Per-node (and per fan-out instance) state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
    Compensating,
    Compensated,
    CompensationFailed,
}

impl ActionStatus {
    /// Forward work has finished one way or another.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ActionStatus::NotStarted | ActionStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Purpose {
    Forward,
    Compensation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub workflow_id: String,
    pub run_id: String,
    pub status: RunStatus,
    pub input: Value,
    pub nodes: BTreeMap<String, NodeRecord>,
    pub attempts: Vec<ActionAttempt>,
    /// Forward completions in the order they were recorded.
    pub completion_order: Vec<CompletionRef>,
    pub compensations: Vec<CompensationEntry>,
    pub children: Vec<SubworkflowInvocation>,
    pub output: Option<Value>,
    /// The failure that started compensation, if any.
    pub failure: Option<Failure>,
    pub compensation_failures: Vec<Failure>,
    pub cancel_requested: bool,
}

impl RunRecord {
    pub fn new(workflow_id: &str, run_id: &str, input: Value) -> Self {
        RunRecord {
            workflow_id: workflow_id.to_string(),
            run_id: run_id.to_string(),
            status: RunStatus::Pending,
            input,
            nodes: BTreeMap::new(),
            attempts: Vec::new(),
            completion_order: Vec::new(),
            compensations: Vec::new(),
            children: Vec::new(),
            output: None,
            failure: None,
            compensation_failures: Vec::new(),
            cancel_requested: false,
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeRecord> {
        self.nodes.get(node_id)
    }

    pub fn node_status(&self, node_id: &str) -> Option<ActionStatus> {
        self.nodes.get(node_id).map(|n| n.status)
    }

    /// Forward attempts of one node, in issue order.
    pub fn attempts_of(&self, node_id: &str) -> Vec<&ActionAttempt> {
        self.attempts
            .iter()
            .filter(|a| a.node_id == node_id && a.purpose == Purpose::Forward)
            .collect()
    }

    /// Node ids of compensations in the order they were invoked.
    pub fn compensation_sequence(&self) -> Vec<&str> {
        self.compensations.iter().map(|c| c.node_id.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub status: ActionStatus,
    pub output: Option<Value>,
    /// Forward attempts issued so far.
    pub attempts: u32,
    /// Chosen branch of a condition node.
    pub branch: Option<bool>,
    /// Fan-out instances, one per element.
    pub instances: Vec<InstanceRecord>,
    pub error: Option<String>,
}

impl NodeRecord {
    pub fn new() -> Self {
        NodeRecord {
            status: ActionStatus::NotStarted,
            output: None,
            attempts: 0,
            branch: None,
            instances: Vec::new(),
            error: None,
        }
    }
}

impl Default for NodeRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    pub index: usize,
    pub status: ActionStatus,
    pub item: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionAttempt {
    pub node_id: String,
    pub expansion_index: Option<usize>,
    pub attempt: u32,
    pub activity_id: String,
    pub purpose: Purpose,
    pub status: AttemptStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRef {
    pub node_id: String,
    pub expansion_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompensationStatus {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationEntry {
    pub node_id: String,
    pub expansion_index: Option<usize>,
    /// Position in the sweep, starting at 0.
    pub sequence: usize,
    pub activity_id: String,
    pub status: CompensationStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubworkflowInvocation {
    pub node_id: String,
    pub child_run_id: String,
    pub workflow_id: String,
    pub input: Value,
    pub output_contract: Vec<crate::registry::PortSchema>,
    /// Child run status; `RUNNING` until the child resolves.
    pub status: RunStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    Action,
    Timeout,
    Compensation,
    Contract,
    Binding,
}

/// A user-visible failure: which node, what kind, why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    /// `None` for failures of the workflow output mapping.
    pub node_id: Option<String>,
    pub expansion_index: Option<usize>,
    pub kind: FailureKind,
    pub cause: String,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let node = self.node_id.as_deref().unwrap_or("<output>");
        match self.expansion_index {
            Some(i) => write!(f, "{:?} failure at '{}#{}': {}", self.kind, node, i, self.cause),
            None => write!(f, "{:?} failure at '{}': {}", self.kind, node, self.cause),
        }
    }
}
