//! Emit pass: GraphIR → workflow-definition document.
//!
//! Public API: `emit(ir, config) -> Result<EmitOutput, CompilationInvariantViolation>`.
//! The definition and its JSON are a pure function of the IR; the config only
//! contributes extra trace attributes to the metadata side table.

pub mod document;
pub mod metadata;
pub mod plan;
pub mod writer;

pub use document::*;
pub use metadata::{CompileMetadata, NodeMetadata};

use crate::config::CompilerConfig;
use crate::ir::types::GraphIR;
use crate::ir::validate::{InvariantViolation, validate_ir};

/// Internal compiler fault: the IR handed to the emitter is not well formed.
#[derive(Debug, thiserror::Error)]
pub enum CompilationInvariantViolation {
    #[error("IR invariant violated: {}", summarize(.0))]
    Ir(Vec<InvariantViolation>),
    #[error("failed to serialize emitted document: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn summarize(violations: &[InvariantViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// The complete output of the emit pass.
#[derive(Debug, Clone)]
pub struct EmitOutput {
    pub definition: WorkflowDefinition,
    pub metadata: CompileMetadata,
    /// Canonical JSON of `definition`.
    pub document: String,
    /// Canonical JSON of `metadata`.
    pub metadata_document: String,
    pub plan: String,
}

pub fn emit(ir: &GraphIR, config: &CompilerConfig) -> Result<EmitOutput, CompilationInvariantViolation> {
    let violations = validate_ir(ir);
    if !violations.is_empty() {
        return Err(CompilationInvariantViolation::Ir(violations));
    }

    let definition = document::build_definition(ir);
    let metadata = metadata::build_metadata(ir, &config.trace_attributes);
    let document = serde_json::to_string_pretty(&definition)?;
    let metadata_document = serde_json::to_string_pretty(&metadata)?;
    let plan = plan::render_plan(&definition);

    Ok(EmitOutput {
        definition,
        metadata,
        document,
        metadata_document,
        plan,
    })
}
