//! End-to-end runs on the local substrate: forward execution, failure and
//! the compensation sweep.

mod helpers;

use helpers::CallLog;
use sagaflow::runtime::record::{CompensationStatus, FailureKind};
use sagaflow::runtime::{ActionContext, ActionStatus, HistoryStore, RunStatus};
use serde_json::{Value, json};

#[test]
fn linear_run_completes_in_order() {
    let log = CallLog::default();
    let mut engine = helpers::engine(helpers::actions(&log), &[helpers::LINEAR]);

    let record = engine.run("linear", "r1", json!({ "x": 1 })).unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.output, Some(json!({ "final": 4 })));
    let order: Vec<String> = log.calls().into_iter().map(|c| c.node_id).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
    assert_eq!(log.forward("b")[0].input, json!({ "x": 2 }));
    assert!(record.compensations.is_empty());
    assert!(record.failure.is_none());
}

#[test]
fn invalid_input_is_rejected_before_start() {
    let log = CallLog::default();
    let mut engine = helpers::engine(helpers::actions(&log), &[helpers::LINEAR]);

    let err = engine.run("linear", "r1", json!({ "x": "one" })).unwrap_err();
    assert!(matches!(err, sagaflow::runtime::RuntimeError::InvalidInput(_)), "{}", err);
    assert!(log.calls().is_empty());
    assert!(engine.history().load("r1").unwrap().is_none());
}

#[test]
fn failure_compensates_in_reverse_completion_order() {
    let log = CallLog::default();
    let mut engine = helpers::engine(helpers::actions(&log), &[helpers::SAGA]);

    let record = engine.run("saga", "r1", json!({ "x": 1 })).unwrap();

    assert_eq!(record.status, RunStatus::Compensated);
    assert_eq!(log.compensated(), vec!["c", "b", "a"]);
    assert_eq!(record.compensation_sequence(), vec!["c", "b", "a"]);
    assert!(
        record
            .compensations
            .iter()
            .all(|c| c.status == CompensationStatus::Succeeded)
    );
    for node in ["a", "b", "c"] {
        assert_eq!(record.node_status(node), Some(ActionStatus::Compensated));
    }

    let failure = record.failure.unwrap();
    assert_eq!(failure.node_id.as_deref(), Some("d"));
    assert_eq!(failure.kind, FailureKind::Action);
    assert_eq!(failure.cause, "boom");
}

#[test]
fn compensation_sees_the_unit_output() {
    let log = CallLog::default();
    let mut engine = helpers::engine(helpers::actions(&log), &[helpers::SAGA]);
    engine.run("saga", "r1", json!({ "x": 1 })).unwrap();

    let refs: Vec<Value> = log
        .calls()
        .into_iter()
        .filter(|c| c.action == "undo")
        .map(|c| c.input["ref"].clone())
        .collect();
    assert_eq!(refs, vec![json!(4), json!(3), json!(2)]);
}

#[test]
fn only_declared_compensations_run() {
    let document = helpers::edit(helpers::SAGA, |doc| {
        doc["nodes"][1].as_object_mut().unwrap().remove("compensation");
    });
    let log = CallLog::default();
    let mut engine = helpers::engine(helpers::actions(&log), &[&document]);

    let record = engine.run("saga", "r1", json!({ "x": 1 })).unwrap();

    assert_eq!(record.status, RunStatus::Compensated);
    assert_eq!(log.compensated(), vec!["c", "a"]);
    assert_eq!(record.node_status("b"), Some(ActionStatus::Succeeded));
}

#[test]
fn failure_without_compensations_is_failed() {
    let document = helpers::edit(helpers::SAGA, |doc| {
        for node in doc["nodes"].as_array_mut().unwrap() {
            node.as_object_mut().unwrap().remove("compensation");
        }
    });
    let log = CallLog::default();
    let mut engine = helpers::engine(helpers::actions(&log), &[&document]);

    let record = engine.run("saga", "r1", json!({ "x": 1 })).unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert!(log.compensated().is_empty());
}

#[test]
fn failed_compensation_degrades_to_failed_and_the_sweep_continues() {
    let log = CallLog::default();
    let undo_log = log.clone();
    let actions = helpers::actions(&log).with("undo", move |ctx: &ActionContext<'_>, input: &Value| {
        undo_log.record(ctx, input);
        if ctx.invocation.node_id == "b" {
            Err("refund rejected".to_string())
        } else {
            Ok(json!({}))
        }
    });
    let mut engine = helpers::engine(actions, &[helpers::SAGA]);

    let record = engine.run("saga", "r1", json!({ "x": 1 })).unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(log.compensated(), vec!["c", "b", "a"]);
    assert_eq!(record.compensation_failures.len(), 1);
    assert_eq!(record.compensation_failures[0].node_id.as_deref(), Some("b"));
    assert_eq!(record.compensation_failures[0].kind, FailureKind::Compensation);
    assert_eq!(record.node_status("b"), Some(ActionStatus::CompensationFailed));
    assert_eq!(record.node_status("a"), Some(ActionStatus::Compensated));
    // The triggering failure is kept.
    assert_eq!(record.failure.unwrap().node_id.as_deref(), Some("d"));
}

#[test]
fn each_compensation_runs_once() {
    let log = CallLog::default();
    let mut engine = helpers::engine(helpers::actions(&log), &[helpers::SAGA]);
    engine.run("saga", "r1", json!({ "x": 1 })).unwrap();

    let mut compensated = log.compensated();
    compensated.sort();
    compensated.dedup();
    assert_eq!(compensated.len(), log.compensated().len());
}

#[test]
fn completed_run_can_be_compensated_on_request() {
    let log = CallLog::default();
    let mut engine = helpers::engine(helpers::actions(&log), &[helpers::LINEAR]);
    engine.run("linear", "r1", json!({ "x": 1 })).unwrap();

    let record = engine.compensate("r1").unwrap();

    assert_eq!(record.status, RunStatus::Compensated);
    assert_eq!(log.compensated(), vec!["a"]);
    assert_eq!(record.output, Some(json!({ "final": 4 })));

    let again = engine.compensate("r1").unwrap_err();
    assert!(
        matches!(again, sagaflow::runtime::RuntimeError::InvalidState { .. }),
        "{}",
        again
    );
}

#[test]
fn output_contract_violation_fails_the_node() {
    let log = CallLog::default();
    let actions = helpers::actions(&log).with("step", |_: &ActionContext<'_>, _: &Value| {
        Ok(json!({ "result": "not an object" }))
    });
    let mut engine = helpers::engine(actions, &[helpers::LINEAR]);

    let record = engine.run("linear", "r1", json!({ "x": 1 })).unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    let failure = record.failure.unwrap();
    assert_eq!(failure.node_id.as_deref(), Some("a"));
    assert_eq!(failure.kind, FailureKind::Contract);
}

#[test]
fn overrunning_action_times_out_and_compensates() {
    for late_result in [Ok(()), Err("late error")] {
        let document = helpers::edit(helpers::LINEAR, |doc| {
            doc["nodes"][1]["timeoutMs"] = json!(10);
        });
        let log = CallLog::default();
        let step_log = log.clone();
        let actions = helpers::actions(&log).with("step", move |ctx: &ActionContext<'_>, input: &Value| {
            step_log.record(ctx, input);
            if ctx.invocation.node_id == "b" {
                std::thread::sleep(std::time::Duration::from_millis(40));
                late_result.map_err(str::to_string)?;
            }
            let x = input["x"].as_i64().ok_or("x must be an integer")?;
            Ok(json!({ "result": { "value": x + 1 } }))
        });
        let mut engine = helpers::engine(actions, &[&document]);

        let record = engine.run("linear", "r1", json!({ "x": 1 })).unwrap();

        assert_eq!(record.status, RunStatus::Compensated, "{:?}", late_result);
        let failure = record.failure.unwrap();
        assert_eq!(failure.node_id.as_deref(), Some("b"));
        assert_eq!(failure.kind, FailureKind::Timeout, "{:?}", late_result);
        assert_eq!(log.compensated(), vec!["a"]);
        assert!(log.forward("c").is_empty());
    }
}
