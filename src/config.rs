//! Compiler and executor configuration.
//!
//! Both structs deserialize from camelCase JSON and fill unspecified fields
//! from their `Default` impls.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CompilerError;
use crate::registry::Runtime;

/// Default forward-action timeout (5 minutes).
pub const DEFAULT_ACTION_TIMEOUT_MS: u64 = 300_000;

/// Default compensation-action timeout (5 minutes).
pub const DEFAULT_COMPENSATION_TIMEOUT_MS: u64 = 300_000;

/// Upper bound on decider steps a single `run_to_completion` call may take.
pub const DEFAULT_MAX_STEPS: usize = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerConfig {
    /// Runtime used when neither the node nor its contract names one.
    pub default_runtime: Option<Runtime>,
    /// Task queue used when neither the node nor its contract names one.
    pub default_task_queue: Option<String>,
    pub default_timeout_ms: u64,
    pub default_compensation_timeout_ms: u64,
    /// Extra attributes copied into every node's trace-attribute defaults.
    pub trace_attributes: BTreeMap<String, String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            default_runtime: None,
            default_task_queue: None,
            default_timeout_ms: DEFAULT_ACTION_TIMEOUT_MS,
            default_compensation_timeout_ms: DEFAULT_COMPENSATION_TIMEOUT_MS,
            trace_attributes: BTreeMap::new(),
        }
    }
}

impl CompilerConfig {
    pub fn from_json(json: &str) -> Result<Self, CompilerError> {
        serde_json::from_str(json).map_err(|e| {
            CompilerError::parse("P001", format!("Failed to parse compiler config JSON: {}", e))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorConfig {
    pub max_steps: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_uses_defaults() {
        let config = CompilerConfig::from_json("{}").unwrap();
        assert_eq!(config.default_timeout_ms, DEFAULT_ACTION_TIMEOUT_MS);
        assert!(config.default_runtime.is_none());
    }

    #[test]
    fn camel_case_fields() {
        let config = CompilerConfig::from_json(
            r#"{"defaultRuntime":"host","defaultTaskQueue":"general","defaultTimeoutMs":1000}"#,
        )
        .unwrap();
        assert_eq!(config.default_runtime, Some(Runtime::Host));
        assert_eq!(config.default_task_queue.as_deref(), Some("general"));
        assert_eq!(config.default_timeout_ms, 1000);
    }

    #[test]
    fn malformed_json_is_p001() {
        let err = CompilerConfig::from_json("{").unwrap_err();
        assert_eq!(err.code, "P001");
    }
}
