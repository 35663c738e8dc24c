//! Sub-workflow reference resolution (S001–S002).

use crate::error::CompilerError;
use crate::parse::types::{GraphDocument, NodeBody};
use crate::registry::Registry;

pub fn validate_subworkflows(doc: &GraphDocument, registry: &Registry) -> Vec<CompilerError> {
    let mut errors = Vec::new();

    for node in &doc.nodes {
        let NodeBody::Subworkflow { workflow } = &node.body else {
            continue;
        };
        if workflow == &doc.id {
            errors.push(CompilerError::validate(
                "S002",
                format!(
                    "Sub-workflow node '{}' references the workflow '{}' being compiled",
                    node.id, workflow
                ),
                Some(node.id.clone()),
            ));
        } else if registry.workflow(workflow).is_none() {
            errors.push(CompilerError::validate(
                "S001",
                format!(
                    "Sub-workflow node '{}' references unknown workflow '{}'",
                    node.id, workflow
                ),
                Some(node.id.clone()),
            ));
        }
    }

    errors
}
