//! Span constructors for the executor.
//!
//! Span fields carry the same attributes the compiler writes into the
//! metadata side table (`workflowId`, `runId`, `nodeId`, `runtime`).

use tracing::{Span, field, info_span};

use super::contract::{ActionInvocation, ChildRequest};

pub fn run_span(workflow_id: &str, run_id: &str) -> Span {
    info_span!(
        "workflow_run",
        workflowId = %workflow_id,
        runId = %run_id,
        nodeId = field::Empty,
        runtime = field::Empty,
    )
}

pub fn action_span(invocation: &ActionInvocation) -> Span {
    info_span!(
        "action",
        workflowId = %invocation.workflow_id,
        runId = %invocation.run_id,
        nodeId = %invocation.node_id,
        runtime = %invocation.runtime,
        expansionIndex = ?invocation.expansion_index,
        attempt = invocation.attempt,
        purpose = ?invocation.purpose,
    )
}

pub fn subworkflow_span(request: &ChildRequest) -> Span {
    info_span!(
        "subworkflow",
        workflowId = %request.workflow_id,
        runId = %request.child_run_id,
        parentRunId = %request.parent_run_id,
        nodeId = %request.node_id,
        runtime = %request.runtime,
    )
}
