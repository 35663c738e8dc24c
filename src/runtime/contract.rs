//! The execution boundary: what a worker receives and what it reports back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ir::types::RetryPolicy;
use crate::registry::Runtime;

use super::record::Purpose;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionInvocation {
    /// Deterministic id; also the idempotency key for the worker.
    pub activity_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub node_id: String,
    pub expansion_index: Option<usize>,
    pub attempt: u32,
    pub purpose: Purpose,
    pub action: String,
    pub runtime: Runtime,
    pub task_queue: String,
    pub params: BTreeMap<String, Value>,
    pub input: Value,
    pub timeout_ms: u64,
    pub retry_policy: RetryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub activity_id: String,
    pub node_id: String,
    pub expansion_index: Option<usize>,
    pub status: ResultStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub logs_ref: Option<String>,
}

impl ActionResult {
    pub fn succeeded(invocation: &ActionInvocation, output: Value) -> Self {
        Self::with_status(invocation, ResultStatus::Succeeded, Some(output), None)
    }

    pub fn failed(invocation: &ActionInvocation, error: impl Into<String>) -> Self {
        Self::with_status(invocation, ResultStatus::Failed, None, Some(error.into()))
    }

    pub fn timed_out(invocation: &ActionInvocation) -> Self {
        let error = format!("exceeded timeout of {}ms", invocation.timeout_ms);
        Self::with_status(invocation, ResultStatus::TimedOut, None, Some(error))
    }

    pub fn cancelled(invocation: &ActionInvocation) -> Self {
        Self::with_status(
            invocation,
            ResultStatus::Cancelled,
            None,
            Some("cancelled".into()),
        )
    }

    fn with_status(
        invocation: &ActionInvocation,
        status: ResultStatus,
        output: Option<Value>,
        error: Option<String>,
    ) -> Self {
        ActionResult {
            activity_id: invocation.activity_id.clone(),
            node_id: invocation.node_id.clone(),
            expansion_index: invocation.expansion_index,
            status,
            output,
            error,
            artifacts: Vec::new(),
            logs_ref: None,
        }
    }
}

/// Request to start an isolated child run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildRequest {
    pub child_run_id: String,
    pub parent_run_id: String,
    pub node_id: String,
    pub workflow_id: String,
    /// Runtime of the invoking node.
    pub runtime: Runtime,
    pub input: Value,
}
