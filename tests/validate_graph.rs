//! Integration tests for document validation against the registry.

mod helpers;

use sagaflow::config::CompilerConfig;
use sagaflow::control::{self, PlanError};

fn codes(document: &str) -> (Vec<String>, Vec<String>) {
    let report = control::validate(document, &helpers::registry(), &CompilerConfig::default());
    (
        report.errors.into_iter().map(|e| e.code).collect(),
        report.warnings.into_iter().map(|e| e.code).collect(),
    )
}

#[test]
fn fixtures_validate_cleanly() {
    for document in [
        helpers::LINEAR,
        helpers::SAGA,
        helpers::FOREACH,
        helpers::RETRY,
        helpers::CONDITION,
        helpers::CHILD,
    ] {
        let (errors, warnings) = codes(document);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }
}

#[test]
fn cycle_is_v004() {
    let document = helpers::edit(helpers::SAGA, |doc| {
        doc["controlEdges"]
            .as_array_mut()
            .unwrap()
            .push(serde_json::json!({ "source": "d", "target": "a" }));
    });
    let (errors, _) = codes(&document);
    assert!(errors.contains(&"V004".to_string()), "{:?}", errors);
}

#[test]
fn statement_block_is_rejected() {
    let document = helpers::edit(helpers::LINEAR, |doc| {
        doc["nodes"][0]["inputs"]["x"] = "{% for i in input.x %}{{i}}{% endfor %}".into();
    });
    let (errors, _) = codes(&document);
    assert!(errors.contains(&"T001".to_string()), "{:?}", errors);
}

#[test]
fn filter_and_call_are_rejected() {
    for template in ["{{input.x | upper}}", "{{len(input.x)}}", "{{x = 1}}"] {
        let document = helpers::edit(helpers::LINEAR, |doc| {
            doc["nodes"][0]["inputs"]["x"] = template.into();
        });
        let (errors, _) = codes(&document);
        assert!(errors.contains(&"T001".to_string()), "{}: {:?}", template, errors);
    }
}

#[test]
fn downstream_reference_is_out_of_scope() {
    let document = helpers::edit(helpers::LINEAR, |doc| {
        doc["nodes"][0]["inputs"]["x"] = "{{c.result.value}}".into();
    });
    let (errors, _) = codes(&document);
    assert!(errors.contains(&"T003".to_string()), "{:?}", errors);
}

#[test]
fn unbound_required_port_is_d005() {
    let document = helpers::edit(helpers::LINEAR, |doc| {
        doc["nodes"][2].as_object_mut().unwrap().remove("inputs");
    });
    let (errors, _) = codes(&document);
    assert_eq!(errors, vec!["D005"]);
}

#[test]
fn unbound_optional_port_is_only_a_warning() {
    let document = helpers::edit(helpers::LINEAR, |doc| {
        doc["nodes"].as_array_mut().unwrap().push(serde_json::json!({
            "id": "tell",
            "type": "action",
            "action": "note",
            "params": { "channel": "ops" }
        }));
        doc["controlEdges"]
            .as_array_mut()
            .unwrap()
            .push(serde_json::json!({ "source": "c", "target": "tell" }));
    });
    let (errors, warnings) = codes(&document);
    assert!(errors.is_empty(), "{:?}", errors);
    assert_eq!(warnings, vec!["W001"]);

    let plan = control::plan(&document, &helpers::registry(), &CompilerConfig::default())
        .expect("warnings do not block compilation");
    assert_eq!(plan.warnings.len(), 1);
}

#[test]
fn type_mismatch_on_data_edge_is_d002() {
    let document = helpers::edit(helpers::LINEAR, |doc| {
        doc["dataEdges"][0]["path"] = serde_json::Value::Null;
    });
    let (errors, _) = codes(&document);
    assert_eq!(errors, vec!["D002"]);
}

#[test]
fn unknown_action_kind_is_r001() {
    let document = helpers::edit(helpers::LINEAR, |doc| {
        doc["nodes"][1]["action"] = "teleport".into();
    });
    let (errors, _) = codes(&document);
    assert!(errors.contains(&"R001".to_string()), "{:?}", errors);
}

#[test]
fn condition_without_false_branch_is_v006() {
    let document = helpers::edit(helpers::CONDITION, |doc| {
        doc["controlEdges"].as_array_mut().unwrap().pop();
    });
    let (errors, _) = codes(&document);
    assert!(errors.contains(&"V006".to_string()), "{:?}", errors);
}

#[test]
fn missing_runtime_without_config_is_r005() {
    let registry = helpers::registry();
    let mut stripped = registry.clone();
    for contract in stripped.nodes.iter_mut() {
        contract.runtime = None;
    }
    let report = control::validate(helpers::LINEAR, &stripped, &CompilerConfig::default());
    assert!(report.errors.iter().any(|e| e.code == "R005"), "{:?}", report.errors);

    let config = CompilerConfig::from_json(r#"{"defaultRuntime":"host"}"#).unwrap();
    assert!(control::validate(helpers::LINEAR, &stripped, &config).is_ok());
}

#[test]
fn unknown_subworkflow_is_s001() {
    let (errors, _) = codes(helpers::PARENT);
    assert!(errors.contains(&"S001".to_string()), "{:?}", errors);
}

#[test]
fn plan_refuses_invalid_documents() {
    let document = helpers::edit(helpers::LINEAR, |doc| {
        doc["nodes"][2].as_object_mut().unwrap().remove("inputs");
    });
    match control::plan(&document, &helpers::registry(), &CompilerConfig::default()) {
        Err(PlanError::Compile(errors)) => assert_eq!(errors[0].code, "D005"),
        other => panic!("expected compile errors, got {:?}", other.map(|p| p.output.plan)),
    }
}

#[test]
fn malformed_json_is_p001() {
    let (errors, _) = codes("{ not json");
    assert_eq!(errors, vec!["P001"]);
}

#[test]
fn node_id_that_aliases_an_expanded_instance_is_v009() {
    let document = helpers::edit(helpers::FOREACH, |doc| {
        doc["nodes"].as_array_mut().unwrap().push(serde_json::json!({
            "id": "each#1",
            "type": "action",
            "action": "boom"
        }));
    });
    let (errors, _) = codes(&document);
    assert_eq!(errors, vec!["V009"]);

    let mut engine = sagaflow::control::Engine::new(helpers::registry(), Default::default());
    assert!(matches!(engine.deploy(&document), Err(PlanError::Compile(_))));
}

#[test]
fn reserved_root_as_node_id_is_v010() {
    let document = helpers::LINEAR.replace("\"id\": \"a\"", "\"id\": \"input\"");
    let (errors, _) = codes(&document);
    assert!(errors.contains(&"V010".to_string()), "{:?}", errors);
}
