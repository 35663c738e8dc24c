//! Compile-metadata side table keyed by node id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ir::types::{GraphIR, state_name};
use crate::registry::Runtime;

/// Span attribute names shared by the compiler and the executor.
pub const ATTR_WORKFLOW_ID: &str = "workflowId";
pub const ATTR_NODE_ID: &str = "nodeId";
pub const ATTR_RUNTIME: &str = "runtime";
pub const ATTR_RUN_ID: &str = "runId";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileMetadata {
    pub workflow_id: String,
    pub version: String,
    pub nodes: BTreeMap<String, NodeMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    pub state: String,
    pub kind: String,
    pub runtime: Runtime,
    pub task_queue: String,
    pub timeout_ms: u64,
    /// Default span attributes; `runId` is added per run.
    pub trace_attributes: BTreeMap<String, String>,
}

pub fn build_metadata(ir: &GraphIR, extra_attributes: &BTreeMap<String, String>) -> CompileMetadata {
    let nodes = ir
        .nodes
        .iter()
        .map(|node| {
            let mut attrs = extra_attributes.clone();
            attrs.insert(ATTR_WORKFLOW_ID.into(), ir.metadata.id.clone());
            attrs.insert(ATTR_NODE_ID.into(), node.id.clone());
            attrs.insert(ATTR_RUNTIME.into(), node.execution.runtime.to_string());
            (
                node.id.clone(),
                NodeMetadata {
                    state: state_name(&node.id),
                    kind: node.kind.tag().to_string(),
                    runtime: node.execution.runtime,
                    task_queue: node.execution.task_queue.clone(),
                    timeout_ms: node.execution.timeout_ms,
                    trace_attributes: attrs,
                },
            )
        })
        .collect();

    CompileMetadata {
        workflow_id: ir.metadata.id.clone(),
        version: ir.metadata.version.clone(),
        nodes,
    }
}
