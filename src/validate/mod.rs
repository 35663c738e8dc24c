//! Graph-level validation phase (pre-IR).
//!
//! Validates the authored graph against the registry before lowering. Every
//! rule runs; findings accumulate into one list.

pub mod bindings;
pub mod node_rules;
pub mod structural;
pub mod subworkflow;
pub mod template;

use crate::config::CompilerConfig;
use crate::error::CompilerError;
use crate::lower::CompileContext;
use crate::parse::graph::ControlGraph;
use crate::parse::types::{GraphDocument, GraphNode};
use crate::registry::Registry;

/// Validate the entire graph. Returns errors and warnings together; use
/// [`crate::error::partition`] to split them.
pub fn validate_graph(
    doc: &GraphDocument,
    graph: &ControlGraph,
    registry: &Registry,
    config: &CompilerConfig,
) -> Vec<CompilerError> {
    let mut errors = structural::validate_structural(doc, graph);

    let ctx = CompileContext::new(doc, graph, registry, config);
    for node in ctx.unique_nodes() {
        errors.extend(validate_node(node, registry, config));
    }
    errors.extend(subworkflow::validate_subworkflows(doc, registry));
    errors.extend(template::validate_templates(&ctx));
    errors.extend(bindings::validate_bindings(&ctx));

    errors
}

/// Validate a single node's contract and controller settings.
pub fn validate_node(
    node: &GraphNode,
    registry: &Registry,
    config: &CompilerConfig,
) -> Vec<CompilerError> {
    node_rules::validate_node_config(node, registry, config)
}
