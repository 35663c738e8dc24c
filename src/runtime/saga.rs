//! Compensation sweep ordering.
//!
//! The sweep walks forward completions in reverse. Only units that declared a
//! compensation and are still `SUCCEEDED` qualify; a unit that is already
//! compensated (or whose compensation failed) is never revisited.

use crate::emit::WorkflowDefinition;

use super::record::{ActionStatus, CompletionRef, RunRecord};

/// Remaining compensation units, next one first.
pub fn pending_compensations(def: &WorkflowDefinition, record: &RunRecord) -> Vec<CompletionRef> {
    record
        .completion_order
        .iter()
        .rev()
        .filter(|unit| {
            def.state_for_node(&unit.node_id)
                .is_some_and(|state| state.compensation.is_some())
                && unit_status(record, unit) == Some(ActionStatus::Succeeded)
        })
        .cloned()
        .collect()
}

/// Status of a node, or of one instance when the unit is a fan-out element.
pub fn unit_status(record: &RunRecord, unit: &CompletionRef) -> Option<ActionStatus> {
    let node = record.node(&unit.node_id)?;
    match unit.expansion_index {
        None => Some(node.status),
        Some(i) => node.instances.get(i).map(|inst| inst.status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{ActionCall, CompensationDef, Construct, ExecutionMeta, StateDef};
    use crate::registry::Runtime;
    use crate::runtime::record::NodeRecord;
    use serde_json::json;

    fn state(id: &str, compensable: bool) -> StateDef {
        let call = ActionCall {
            action: "noop".into(),
            params: Default::default(),
            input: vec![],
            outputs: vec![],
        };
        StateDef {
            name: id.into(),
            node_id: id.into(),
            label: id.into(),
            construct: Construct::Task { call: call.clone() },
            transitions: vec![],
            compensation: compensable.then(|| CompensationDef {
                call,
                timeout_ms: 1000,
            }),
            execution: ExecutionMeta {
                runtime: Runtime::Host,
                task_queue: "q".into(),
                timeout_ms: 1000,
            },
        }
    }

    #[test]
    fn reverse_completion_order_of_compensable_units() {
        let def = WorkflowDefinition {
            dsl: "test".into(),
            id: "wf".into(),
            name: "wf".into(),
            version: "1".into(),
            description: None,
            input_contract: vec![],
            output_contract: vec![],
            start_at: vec![],
            states: vec![state("a", true), state("b", false), state("c", true)],
            output: vec![],
        };
        let mut record = RunRecord::new("wf", "r", json!({}));
        for id in ["a", "b", "c"] {
            let mut node = NodeRecord::new();
            node.status = ActionStatus::Succeeded;
            record.nodes.insert(id.into(), node);
            record.completion_order.push(CompletionRef {
                node_id: id.into(),
                expansion_index: None,
            });
        }
        let order: Vec<String> = pending_compensations(&def, &record)
            .into_iter()
            .map(|u| u.node_id)
            .collect();
        assert_eq!(order, vec!["c", "a"]);

        record.nodes.get_mut("c").unwrap().status = ActionStatus::Compensated;
        let order: Vec<String> = pending_compensations(&def, &record)
            .into_iter()
            .map(|u| u.node_id)
            .collect();
        assert_eq!(order, vec!["a"]);
    }
}
