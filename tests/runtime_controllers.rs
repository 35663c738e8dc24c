//! Fan-out, retry, choice and child-workflow constructs at run time.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use helpers::CallLog;
use sagaflow::runtime::{ActionContext, ActionStatus, DispatchOrder, HistoryEvent, RunStatus};
use serde_json::{Value, json};

// =============================================================================
// Fan-out
// =============================================================================

#[test]
fn fan_out_results_keep_index_order_when_completion_order_differs() {
    let log = CallLog::default();
    let mut engine = helpers::engine(helpers::actions(&log), &[helpers::FOREACH])
        .with_dispatch_order(DispatchOrder::Lifo);

    let record = engine.run("fanout", "r1", json!({ "values": [1, 2, 3] })).unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    let invoked: Vec<Option<usize>> = log.calls().into_iter().map(|c| c.index).collect();
    assert_eq!(invoked, vec![Some(1), Some(2), Some(0)]);
    assert_eq!(
        record.output,
        Some(json!({ "squares": [{ "value": 1 }, { "value": 4 }, { "value": 9 }] }))
    );
}

#[test]
fn fan_out_respects_the_concurrency_bound() {
    let log = CallLog::default();
    let mut engine = helpers::engine(helpers::actions(&log), &[helpers::FOREACH]);
    engine.run("fanout", "r1", json!({ "values": [1, 2, 3, 4, 5] })).unwrap();

    // Every scheduling decision happens with at most two instances running.
    let trace = engine.trace("r1").unwrap();
    let mut running = 0usize;
    let mut peak = 0usize;
    for event in &trace.history {
        match event {
            HistoryEvent::CommandIssued { command } if command.id().starts_with("fwd:each") => {
                running += 1;
                peak = peak.max(running);
            }
            HistoryEvent::ActivityResolved { .. } => running -= 1,
            _ => {}
        }
    }
    assert_eq!(peak, 2);
    assert_eq!(log.calls().len(), 5);
}

#[test]
fn empty_fan_out_succeeds_with_no_results() {
    let log = CallLog::default();
    let mut engine = helpers::engine(helpers::actions(&log), &[helpers::FOREACH]);

    let record = engine.run("fanout", "r1", json!({ "values": [] })).unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.output, Some(json!({ "squares": [] })));
    assert!(log.calls().is_empty());
}

#[test]
fn at_least_policy_tolerates_failed_elements() {
    let document = helpers::edit(helpers::FOREACH, |doc| {
        doc["nodes"][0]["successPolicy"] = json!({ "mode": "atLeast", "minSuccesses": 2 });
    });
    let log = CallLog::default();
    let actions = helpers::actions(&log).with("square", |_: &ActionContext<'_>, input: &Value| {
        match input["n"].as_i64() {
            Some(2) => Err("two is unlucky".to_string()),
            Some(n) => Ok(json!({ "value": n * n })),
            None => Err("n must be an integer".to_string()),
        }
    });
    let mut engine = helpers::engine(actions, &[&document]);

    let record = engine.run("fanout", "r1", json!({ "values": [1, 2, 3] })).unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(
        record.output,
        Some(json!({ "squares": [{ "value": 1 }, null, { "value": 9 }] }))
    );
}

#[test]
fn failed_element_drains_in_flight_work_then_compensates_survivors() {
    let log = CallLog::default();
    let square_log = log.clone();
    let actions = helpers::actions(&log).with("square", move |ctx: &ActionContext<'_>, input: &Value| {
        square_log.record(ctx, input);
        match input["n"].as_i64() {
            Some(2) => Err("two is unlucky".to_string()),
            Some(n) => Ok(json!({ "value": n * n })),
            None => Err("n must be an integer".to_string()),
        }
    });
    let mut engine = helpers::engine(actions, &[helpers::FOREACH]);

    let record = engine.run("fanout", "r1", json!({ "values": [1, 2, 3] })).unwrap();

    assert_eq!(record.status, RunStatus::Compensated);
    let failure = record.failure.as_ref().unwrap();
    assert_eq!(failure.node_id.as_deref(), Some("each"));
    assert_eq!(failure.expansion_index, Some(1));

    // Element 2 was already running when element 1 failed; it still finishes
    // and is compensated along with element 0.
    let swept: Vec<Option<usize>> = record.compensations.iter().map(|c| c.expansion_index).collect();
    assert_eq!(swept, vec![Some(2), Some(0)]);
    let refs: Vec<Value> = log
        .calls()
        .into_iter()
        .filter(|c| c.action == "undo")
        .map(|c| c.input["ref"].clone())
        .collect();
    assert_eq!(refs, vec![json!(3), json!(1)]);
}

#[test]
fn fan_out_compensation_follows_reverse_completion_order() {
    let document = helpers::edit(helpers::FOREACH, |doc| {
        doc["nodes"]
            .as_array_mut()
            .unwrap()
            .push(json!({ "id": "after", "type": "action", "action": "boom" }));
        doc["controlEdges"] = json!([{ "source": "each", "target": "after" }]);
    });
    let log = CallLog::default();
    let mut engine = helpers::engine(helpers::actions(&log), &[&document])
        .with_dispatch_order(DispatchOrder::Lifo);

    let record = engine.run("fanout", "r1", json!({ "values": [5, 6, 7] })).unwrap();

    assert_eq!(record.status, RunStatus::Compensated);
    let mut expected: Vec<Option<usize>> = record
        .completion_order
        .iter()
        .filter(|c| c.node_id == "each")
        .map(|c| c.expansion_index)
        .collect();
    expected.reverse();
    let swept: Vec<Option<usize>> = record.compensations.iter().map(|c| c.expansion_index).collect();
    assert_eq!(swept, expected);
    assert_eq!(record.node_status("each"), Some(ActionStatus::Compensated));
}

// =============================================================================
// Retry
// =============================================================================

#[test]
fn retry_stops_after_max_attempts() {
    let log = CallLog::default();
    let flaky_log = log.clone();
    let actions = helpers::actions(&log).with("flaky", move |ctx: &ActionContext<'_>, input: &Value| {
        flaky_log.record(ctx, input);
        Err("still down".to_string())
    });
    let mut engine = helpers::engine(actions, &[helpers::RETRY]);

    let record = engine.run("retrying", "r1", json!({})).unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(log.forward("r").len(), 3);
    let attempts: Vec<u32> = record.attempts_of("r").iter().map(|a| a.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert_eq!(record.failure.unwrap().cause, "still down");

    let timers = engine
        .trace("r1")
        .unwrap()
        .history
        .iter()
        .filter(|e| matches!(e, HistoryEvent::TimerFired { .. }))
        .count();
    assert_eq!(timers, 2);
}

#[test]
fn retry_recovers_on_a_later_attempt() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let log = CallLog::default();
    let actions = helpers::actions(&log).with("flaky", move |_: &ActionContext<'_>, _: &Value| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err("warming up".to_string())
        } else {
            Ok(json!({ "ok": true }))
        }
    });
    let mut engine = helpers::engine(actions, &[helpers::RETRY]);

    let record = engine.run("retrying", "r1", json!({})).unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.output, Some(json!({ "ok": true })));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(record.attempts_of("r").len(), 2);
}

// =============================================================================
// Choice
// =============================================================================

#[test]
fn untaken_branch_is_skipped() {
    let log = CallLog::default();
    let mut engine = helpers::engine(helpers::actions(&log), &[helpers::CONDITION]);

    let record = engine.run("branching", "low", json!({ "x": 1 })).unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.node("gate").unwrap().branch, Some(false));
    assert_eq!(record.node_status("small"), Some(ActionStatus::Succeeded));
    assert_eq!(record.node_status("big"), Some(ActionStatus::Skipped));
    assert!(log.forward("big").is_empty());

    let record = engine.run("branching", "high", json!({ "x": 20 })).unwrap();
    assert_eq!(record.node("gate").unwrap().output, Some(json!({ "result": true })));
    assert_eq!(record.node_status("big"), Some(ActionStatus::Succeeded));
    assert_eq!(record.node_status("small"), Some(ActionStatus::Skipped));
}

// =============================================================================
// Child workflows
// =============================================================================

#[test]
fn child_workflow_output_becomes_node_output() {
    let log = CallLog::default();
    let mut engine = helpers::engine(helpers::actions(&log), &[helpers::CHILD, helpers::PARENT]);

    let record = engine.run("parent", "r1", json!({ "x": 1 })).unwrap();

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.output, Some(json!({ "y": 2 })));
    assert_eq!(record.children.len(), 1);
    assert_eq!(record.children[0].child_run_id, "r1/call");
    assert_eq!(record.children[0].status, RunStatus::Completed);
    assert_eq!(log.forward("inc")[0].input, json!({ "x": 1 }));
}

#[test]
fn failed_child_fails_the_parent_node() {
    let log = CallLog::default();
    let actions = helpers::actions(&log).with("step", |_: &ActionContext<'_>, _: &Value| {
        Err("inc broke".to_string())
    });
    let mut engine = helpers::engine(actions, &[helpers::CHILD, helpers::PARENT]);

    let record = engine.run("parent", "r1", json!({ "x": 1 })).unwrap();

    assert_eq!(record.status, RunStatus::Failed);
    let failure = record.failure.unwrap();
    assert_eq!(failure.node_id.as_deref(), Some("call"));
    assert!(
        failure.cause.starts_with("child run 'r1/call' ended FAILED"),
        "{}",
        failure.cause
    );
}
