//! Integration tests for the emitted definition, metadata and plan text.

mod helpers;

use sagaflow::config::CompilerConfig;
use sagaflow::control;
use sagaflow::emit::{Construct, WorkflowDefinition};
use sagaflow::ir::types::ValueExpr;

fn plan(document: &str) -> control::Plan {
    control::plan(document, &helpers::registry(), &CompilerConfig::default()).expect("compiles")
}

#[test]
fn linear_plan_snapshot() {
    let plan = plan(helpers::LINEAR);
    insta::assert_snapshot!("linear_plan", plan.output.plan);
}

#[test]
fn emission_is_byte_identical_across_runs() {
    for document in [helpers::LINEAR, helpers::SAGA, helpers::FOREACH, helpers::CONDITION] {
        let first = plan(document);
        let second = plan(document);
        assert_eq!(first.output.document, second.output.document);
        assert_eq!(first.output.metadata_document, second.output.metadata_document);
        assert_eq!(first.output.plan, second.output.plan);
    }
}

#[test]
fn node_order_in_the_document_does_not_matter() {
    let reordered = helpers::edit(helpers::SAGA, |doc| {
        doc["nodes"].as_array_mut().unwrap().reverse();
        doc["controlEdges"].as_array_mut().unwrap().reverse();
    });
    assert_eq!(plan(helpers::SAGA).output.document, plan(&reordered).output.document);
}

#[test]
fn document_parses_back_to_the_definition() {
    let output = plan(helpers::SAGA).output;
    let parsed: WorkflowDefinition = serde_json::from_str(&output.document).unwrap();
    assert_eq!(parsed, output.definition);
}

#[test]
fn data_edge_path_becomes_a_binding() {
    let definition = helpers::definition(helpers::LINEAR);
    let state = definition.state_for_node("b").unwrap();
    let Construct::Task { call } = &state.construct else {
        panic!("b should be a task");
    };
    assert_eq!(call.input.len(), 1);
    assert_eq!(call.input[0].port, "x");
    assert_eq!(call.input[0].value, ValueExpr::binding("a", "result.value"));
}

#[test]
fn fan_out_separates_items_from_element_inputs() {
    let definition = helpers::definition(helpers::FOREACH);
    let state = definition.state_for_node("each").unwrap();
    let Construct::FanOut {
        items,
        max_concurrency,
        call,
        ..
    } = &state.construct
    else {
        panic!("each should fan out");
    };
    assert_eq!(items, &ValueExpr::input("values"));
    assert_eq!(*max_concurrency, Some(2));
    let ports: Vec<&str> = call.input.iter().map(|m| m.port.as_str()).collect();
    assert_eq!(ports, vec!["n"]);
}

#[test]
fn contracts_are_derived_for_the_workflow() {
    let definition = helpers::definition(helpers::CHILD);
    assert_eq!(definition.input_contract.len(), 1);
    assert_eq!(definition.output_contract.len(), 1);
    assert_eq!(definition.output_contract[0].name, "y");
}

#[test]
fn choice_transitions_carry_branch_labels() {
    let definition = helpers::definition(helpers::CONDITION);
    let gate = definition.state_for_node("gate").unwrap();
    let mut labels: Vec<(Option<bool>, &str)> = gate
        .transitions
        .iter()
        .map(|t| (t.when, t.to.as_str()))
        .collect();
    labels.sort();
    assert_eq!(
        labels,
        vec![(Some(false), "state_small"), (Some(true), "state_big")]
    );
    assert_eq!(gate.execution.task_queue, "orchestrator");
}

#[test]
fn metadata_keeps_source_ids_and_trace_defaults() {
    let config = CompilerConfig::from_json(r#"{"traceAttributes":{"team":"payments"}}"#).unwrap();
    let output = control::plan(helpers::LINEAR, &helpers::registry(), &config)
        .unwrap()
        .output;
    assert!(output.metadata_document.contains("\"team\": \"payments\""));
    assert!(output.metadata_document.contains("state_a"));
}
