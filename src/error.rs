//! Unified compiler error type used across all compile phases.

use serde::{Deserialize, Serialize};

use crate::ir::validate::InvariantViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Parse,
    Validate,
    Lower,
    Emit,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Parse => write!(f, "Parse"),
            Phase::Validate => write!(f, "Validate"),
            Phase::Lower => write!(f, "Lower"),
            Phase::Emit => write!(f, "Emit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerError {
    pub code: String,
    pub phase: Phase,
    pub severity: Severity,
    pub message: String,
    pub node_id: Option<String>,
}

impl std::fmt::Display for CompilerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            Severity::Error => "",
            Severity::Warning => " warning",
        };
        match &self.node_id {
            Some(id) => write!(
                f,
                "[{}:{}{}] {} (node '{}')",
                self.phase, self.code, tag, self.message, id
            ),
            None => write!(f, "[{}:{}{}] {}", self.phase, self.code, tag, self.message),
        }
    }
}

impl std::error::Error for CompilerError {}

impl From<InvariantViolation> for CompilerError {
    fn from(e: InvariantViolation) -> Self {
        CompilerError {
            code: e.code.to_string(),
            phase: Phase::Emit,
            severity: Severity::Error,
            message: e.message,
            node_id: e.node_id,
        }
    }
}

impl CompilerError {
    pub fn parse(code: &str, message: impl Into<String>) -> Self {
        CompilerError {
            code: code.into(),
            phase: Phase::Parse,
            severity: Severity::Error,
            message: message.into(),
            node_id: None,
        }
    }

    pub fn validate(code: &str, message: impl Into<String>, node_id: Option<String>) -> Self {
        CompilerError {
            code: code.into(),
            phase: Phase::Validate,
            severity: Severity::Error,
            message: message.into(),
            node_id,
        }
    }

    /// A validation finding that does not block compilation.
    pub fn warning(code: &str, message: impl Into<String>, node_id: Option<String>) -> Self {
        CompilerError {
            code: code.into(),
            phase: Phase::Validate,
            severity: Severity::Warning,
            message: message.into(),
            node_id,
        }
    }

    pub fn lower(code: &str, message: impl Into<String>, node_id: Option<String>) -> Self {
        CompilerError {
            code: code.into(),
            phase: Phase::Lower,
            severity: Severity::Error,
            message: message.into(),
            node_id,
        }
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }
}

/// Split a mixed finding list into (errors, warnings).
pub fn partition(findings: Vec<CompilerError>) -> (Vec<CompilerError>, Vec<CompilerError>) {
    findings.into_iter().partition(|e| !e.is_warning())
}
