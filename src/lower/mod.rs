//! Lowering phase: GraphDocument → GraphIR.
//!
//! Runs only on a document that passed validation. Every node resolves to one
//! `NodeIR` with its execution target fixed, and every template and data edge
//! becomes a typed `ValueExpr`.

pub mod builder;
pub mod context;
pub mod reference;
pub mod topo;
pub mod typing;

pub use context::CompileContext;

use crate::config::CompilerConfig;
use crate::error::CompilerError;
use crate::ir::types::*;
use crate::parse::graph::ControlGraph;
use crate::parse::types::GraphDocument;
use crate::registry::{Registry, ValueType};

use reference::resolve_value_expr;
use typing::{TypeEnv, infer_type};

/// Lower a validated document + graph into a GraphIR.
pub fn lower(
    doc: &GraphDocument,
    graph: &ControlGraph,
    registry: &Registry,
    config: &CompilerConfig,
) -> Result<GraphIR, Vec<CompilerError>> {
    let ctx = CompileContext::new(doc, graph, registry, config);

    // 1. Deterministic topological order
    let order = topo::topo_sort(graph)?;

    // 2. Nodes
    let mut nodes = Vec::with_capacity(order.len());
    let mut errors = Vec::new();
    for id in &order {
        let Some(node) = ctx.node(id) else { continue };
        match builder::build_node(node, &ctx) {
            Ok(n) => nodes.push(n),
            Err(e) => errors.extend(e),
        }
    }

    // 3. Edges
    let mut control_edges: Vec<ControlEdgeIR> = doc
        .control_edges
        .iter()
        .map(|e| ControlEdgeIR {
            source: e.source.clone(),
            target: e.target.clone(),
            branch: e.branch,
        })
        .collect();
    control_edges.sort();
    control_edges.dedup();

    let mut data_edges: Vec<DataEdgeIR> = doc
        .data_edges
        .iter()
        .map(|e| DataEdgeIR {
            source: e.source.clone(),
            field_path: e.field_path(),
            target: e.target.clone(),
            target_port: e.target_port.clone(),
            value_type: ctx
                .ports_of(&e.target)
                .and_then(|p| p.input(&e.target_port))
                .map(|p| p.value_type.clone())
                .unwrap_or(ValueType::Any),
        })
        .collect();
    data_edges.sort_by(|a, b| {
        (&a.target, &a.target_port, &a.source, &a.field_path)
            .cmp(&(&b.target, &b.target_port, &b.source, &b.field_path))
    });

    // 4. Workflow outputs (BTreeMap iteration keeps them sorted)
    let env = TypeEnv {
        workflow_inputs: &doc.inputs,
        ports: &ctx.ports,
        fan_out: false,
    };
    let mut outputs = Vec::with_capacity(doc.outputs.len());
    for (name, template) in &doc.outputs {
        match resolve_value_expr(template, &ctx.node_ids) {
            Ok(expr) => {
                let value_type = infer_type(&expr, &env).unwrap_or(ValueType::Any);
                outputs.push(OutputMapping {
                    name: name.clone(),
                    value_type,
                    expr,
                });
            }
            Err(issue) => errors.push(CompilerError::lower(
                "L003",
                format!("Workflow output '{}': {}", name, issue.message()),
                None,
            )),
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(GraphIR {
        metadata: WorkflowMetadata {
            id: doc.id.clone(),
            name: doc.name.clone(),
            description: doc.description.clone(),
            version: doc.version.clone(),
        },
        inputs: doc.inputs.clone(),
        outputs,
        nodes,
        control_edges,
        data_edges,
    })
}
