use std::collections::BTreeMap;

use crate::emit::WorkflowDefinition;
use crate::registry::WorkflowSignature;

/// Compiled definitions available to the executor, keyed by workflow id.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    definitions: BTreeMap<String, WorkflowDefinition>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a definition.
    pub fn register(&mut self, definition: WorkflowDefinition) {
        self.definitions.insert(definition.id.clone(), definition);
    }

    pub fn with(mut self, definition: WorkflowDefinition) -> Self {
        self.register(definition);
        self
    }

    pub fn get(&self, workflow_id: &str) -> Option<&WorkflowDefinition> {
        self.definitions.get(workflow_id)
    }

    /// Signatures of every registered workflow, for resolving subworkflow
    /// nodes at compile time.
    pub fn signatures(&self) -> Vec<WorkflowSignature> {
        self.definitions
            .values()
            .map(|d| WorkflowSignature {
                id: d.id.clone(),
                inputs: d.input_contract.clone(),
                outputs: d.output_contract.clone(),
            })
            .collect()
    }
}
