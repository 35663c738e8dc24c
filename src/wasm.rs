//! WASM entry points for browser use.

use std::collections::BTreeMap;

use wasm_bindgen::prelude::*;

use crate::config::CompilerConfig;
use crate::control::{self, PlanError};
use crate::emit::CompilationInvariantViolation;
use crate::error::CompilerError;
use crate::registry::Registry;

/// Validate a graph document against a registry snapshot.
/// Returns `{ errors: [...], warnings: [...] }`.
#[wasm_bindgen]
pub fn validate_workflow(json: &str, registry_json: &str) -> JsValue {
    let result = validate_workflow_inner(json, registry_json);
    serde_wasm_bindgen::to_value(&result).unwrap_or(JsValue::NULL)
}

fn validate_workflow_inner(json: &str, registry_json: &str) -> ValidationDto {
    let registry = match Registry::from_json(registry_json) {
        Ok(r) => r,
        Err(e) => {
            return ValidationDto {
                errors: vec![ErrorDto::from(e)],
                warnings: vec![],
            };
        }
    };
    let report = control::validate(json, &registry, &CompilerConfig::default());
    ValidationDto {
        errors: report.errors.into_iter().map(ErrorDto::from).collect(),
        warnings: report.warnings.into_iter().map(ErrorDto::from).collect(),
    }
}

/// Full pipeline: parse → validate → lower → emit.
/// Returns `{ status: "success", ... }` with the definition, metadata and plan,
/// or `{ status: "errors", errors }`.
#[wasm_bindgen]
pub fn plan_workflow(json: &str, registry_json: &str, config_json: &str) -> JsValue {
    let result = plan_workflow_inner(json, registry_json, config_json);
    serde_wasm_bindgen::to_value(&result).unwrap_or(JsValue::NULL)
}

fn plan_workflow_inner(json: &str, registry_json: &str, config_json: &str) -> PlanResult {
    let registry = match Registry::from_json(registry_json) {
        Ok(r) => r,
        Err(e) => return PlanResult::Errors(vec![ErrorDto::from(e)]),
    };
    let config = if config_json.trim().is_empty() {
        CompilerConfig::default()
    } else {
        match CompilerConfig::from_json(config_json) {
            Ok(c) => c,
            Err(e) => return PlanResult::Errors(vec![ErrorDto::from(e)]),
        }
    };

    match control::plan(json, &registry, &config) {
        Ok(plan) => PlanResult::Success(PlanDto {
            document: plan.output.document,
            metadata: plan.output.metadata_document,
            plan: plan.output.plan,
            warnings: plan.warnings.into_iter().map(ErrorDto::from).collect(),
        }),
        Err(PlanError::Compile(errors)) => {
            PlanResult::Errors(errors.into_iter().map(ErrorDto::from).collect())
        }
        Err(PlanError::Invariant(CompilationInvariantViolation::Ir(violations))) => PlanResult::Errors(
            violations
                .into_iter()
                .map(|v| ErrorDto::from(CompilerError::from(v)))
                .collect(),
        ),
        Err(PlanError::Invariant(e)) => PlanResult::Errors(vec![ErrorDto {
            code: "E000".into(),
            phase: "Emit".into(),
            severity: "error".into(),
            message: e.to_string(),
            node_id: None,
        }]),
    }
}

// ---------------------------------------------------------------------------
// DTOs for serialization to JS
// ---------------------------------------------------------------------------

#[derive(serde::Serialize, serde::Deserialize)]
struct ErrorDto {
    code: String,
    phase: String,
    severity: String,
    message: String,
    node_id: Option<String>,
}

impl From<CompilerError> for ErrorDto {
    fn from(e: CompilerError) -> Self {
        ErrorDto {
            severity: if e.is_warning() { "warning" } else { "error" }.into(),
            code: e.code,
            phase: e.phase.to_string(),
            message: e.message,
            node_id: e.node_id,
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct ValidationDto {
    errors: Vec<ErrorDto>,
    warnings: Vec<ErrorDto>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct PlanDto {
    /// Canonical workflow-definition JSON.
    document: String,
    /// Compile-metadata side table JSON.
    metadata: String,
    plan: String,
    warnings: Vec<ErrorDto>,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "status")]
enum PlanResult {
    #[serde(rename = "success")]
    Success(PlanDto),
    #[serde(rename = "errors")]
    Errors(Vec<ErrorDto>),
}

/// Node ids mapped to their finding codes; handy for editor highlighting.
#[wasm_bindgen]
pub fn finding_codes_by_node(json: &str, registry_json: &str) -> JsValue {
    let report = validate_workflow_inner(json, registry_json);
    let mut by_node: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for finding in report.errors.iter().chain(report.warnings.iter()) {
        if let Some(id) = &finding.node_id {
            by_node.entry(id.clone()).or_default().push(finding.code.clone());
        }
    }
    serde_wasm_bindgen::to_value(&by_node).unwrap_or(JsValue::NULL)
}
