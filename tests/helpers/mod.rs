#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use sagaflow::control::Engine;
use sagaflow::emit::WorkflowDefinition;
use sagaflow::registry::Registry;
use sagaflow::runtime::record::Purpose;
use sagaflow::runtime::{
    ActionContext, ActionInvocation, ActionRegistry, ActionResult, ChildRequest, HistoryEvent,
    RunStatus, Substrate, SubstrateError,
};
use serde_json::{Value, json};

// =============================================================================
// Fixtures
// =============================================================================

pub const REGISTRY: &str = include_str!("../fixtures/registry.json");
pub const LINEAR: &str = include_str!("../fixtures/linear.json");
pub const SAGA: &str = include_str!("../fixtures/saga.json");
pub const FOREACH: &str = include_str!("../fixtures/foreach.json");
pub const RETRY: &str = include_str!("../fixtures/retry.json");
pub const CONDITION: &str = include_str!("../fixtures/condition.json");
pub const CHILD: &str = include_str!("../fixtures/child.json");
pub const PARENT: &str = include_str!("../fixtures/parent.json");

pub fn registry() -> Registry {
    Registry::from_json(REGISTRY).expect("fixture registry parses")
}

/// Edit a fixture document before compiling it.
pub fn edit(document: &str, f: impl FnOnce(&mut Value)) -> String {
    let mut value: Value = serde_json::from_str(document).expect("fixture parses");
    f(&mut value);
    value.to_string()
}

/// Compile a fixture straight to its definition.
pub fn definition(document: &str) -> WorkflowDefinition {
    sagaflow::control::plan(document, &registry(), &Default::default())
        .expect("fixture compiles")
        .output
        .definition
}

/// Engine over the fixture registry with the given documents deployed.
pub fn engine(actions: ActionRegistry, documents: &[&str]) -> Engine {
    let mut engine = Engine::new(registry(), actions);
    for document in documents {
        engine.deploy(document).expect("fixture deploys");
    }
    engine
}

// =============================================================================
// Recorded handler calls
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub action: String,
    pub node_id: String,
    pub index: Option<usize>,
    pub purpose: Purpose,
    pub input: Value,
}

/// Shared log of every handler invocation, in invocation order.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn record(&self, ctx: &ActionContext<'_>, input: &Value) {
        self.0.lock().unwrap().push(Call {
            action: ctx.invocation.action.clone(),
            node_id: ctx.invocation.node_id.clone(),
            index: ctx.invocation.expansion_index,
            purpose: ctx.invocation.purpose,
            input: input.clone(),
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    /// Forward invocations of one node.
    pub fn forward(&self, node_id: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.node_id == node_id && c.purpose == Purpose::Forward)
            .collect()
    }

    /// Node ids whose compensation ran, in order.
    pub fn compensated(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.purpose == Purpose::Compensation)
            .map(|c| c.node_id)
            .collect()
    }
}

/// Handlers for every action kind in the fixture registry. `step` adds one,
/// `square` squares, `boom` always fails, `flaky` always succeeds.
pub fn actions(log: &CallLog) -> ActionRegistry {
    let (step, undo, boom, square, flaky, note) = (
        log.clone(),
        log.clone(),
        log.clone(),
        log.clone(),
        log.clone(),
        log.clone(),
    );
    ActionRegistry::new()
        .with("step", move |ctx: &ActionContext<'_>, input: &Value| {
            step.record(ctx, input);
            let x = input["x"].as_i64().ok_or("x must be an integer")?;
            Ok(json!({ "result": { "value": x + 1 } }))
        })
        .with("undo", move |ctx: &ActionContext<'_>, input: &Value| {
            undo.record(ctx, input);
            Ok(json!({}))
        })
        .with("boom", move |ctx: &ActionContext<'_>, input: &Value| {
            boom.record(ctx, input);
            Err("boom".to_string())
        })
        .with("square", move |ctx: &ActionContext<'_>, input: &Value| {
            square.record(ctx, input);
            let n = input["n"].as_i64().ok_or("n must be an integer")?;
            Ok(json!({ "value": n * n }))
        })
        .with("flaky", move |ctx: &ActionContext<'_>, input: &Value| {
            flaky.record(ctx, input);
            Ok(json!({ "ok": true }))
        })
        .with("note", move |ctx: &ActionContext<'_>, input: &Value| {
            note.record(ctx, input);
            Ok(json!({}))
        })
}

// =============================================================================
// Scripted substrate
// =============================================================================

/// Completes compensations and the forward work of allow-listed nodes;
/// everything else stays parked until it is cancelled.
pub struct ScriptedSubstrate {
    completes: HashSet<String>,
    seen: HashSet<String>,
    ready: VecDeque<HistoryEvent>,
    parked: Vec<ActionInvocation>,
}

impl ScriptedSubstrate {
    pub fn completing(nodes: &[&str]) -> Self {
        ScriptedSubstrate {
            completes: nodes.iter().map(|n| n.to_string()).collect(),
            seen: HashSet::new(),
            ready: VecDeque::new(),
            parked: Vec::new(),
        }
    }

    pub fn parked(&self) -> Vec<String> {
        self.parked.iter().map(|i| i.activity_id.clone()).collect()
    }
}

impl Substrate for ScriptedSubstrate {
    fn start_activity(&mut self, invocation: &ActionInvocation) -> Result<(), SubstrateError> {
        if !self.seen.insert(invocation.activity_id.clone()) {
            return Ok(());
        }
        if invocation.purpose == Purpose::Compensation {
            let result = ActionResult::succeeded(invocation, json!({}));
            self.ready.push_back(HistoryEvent::ActivityResolved { result });
        } else if self.completes.contains(&invocation.node_id) {
            let result = ActionResult::succeeded(invocation, json!({ "result": { "value": 1 } }));
            self.ready.push_back(HistoryEvent::ActivityResolved { result });
        } else {
            self.parked.push(invocation.clone());
        }
        Ok(())
    }

    fn start_timer(&mut self, timer_id: &str, _delay_ms: u64) -> Result<(), SubstrateError> {
        self.ready.push_back(HistoryEvent::TimerFired {
            timer_id: timer_id.to_string(),
        });
        Ok(())
    }

    fn start_child(&mut self, request: &ChildRequest) -> Result<(), SubstrateError> {
        self.ready.push_back(HistoryEvent::ChildResolved {
            child_run_id: request.child_run_id.clone(),
            status: RunStatus::Failed,
            output: None,
            error: Some("children are not scripted".into()),
        });
        Ok(())
    }

    fn request_cancel(&mut self, activity_id: &str) -> Result<(), SubstrateError> {
        if let Some(pos) = self.parked.iter().position(|i| i.activity_id == activity_id) {
            let invocation = self.parked.remove(pos);
            let result = ActionResult::cancelled(&invocation);
            self.ready.push_back(HistoryEvent::ActivityResolved { result });
        }
        Ok(())
    }

    fn cancel_child(&mut self, _child_run_id: &str) -> Result<(), SubstrateError> {
        Ok(())
    }

    fn next_event(&mut self) -> Result<Option<HistoryEvent>, SubstrateError> {
        Ok(self.ready.pop_front())
    }
}
