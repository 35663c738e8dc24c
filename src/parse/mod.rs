//! Parse phase: JSON → Rust types + control graph construction.

pub mod graph;
pub mod types;

pub use graph::ControlGraph;
pub use types::*;

use crate::error::CompilerError;

/// Deserialize a graph document JSON string.
pub fn parse(json: &str) -> Result<GraphDocument, Vec<CompilerError>> {
    serde_json::from_str::<GraphDocument>(json).map_err(|e| {
        vec![CompilerError::parse(
            "P001",
            format!("Failed to parse graph document JSON: {}", e),
        )]
    })
}

/// Parse JSON and build the control graph in one step.
pub fn parse_and_build(json: &str) -> Result<(GraphDocument, ControlGraph), Vec<CompilerError>> {
    let document = parse(json)?;
    let graph = ControlGraph::build(&document)?;
    Ok((document, graph))
}
