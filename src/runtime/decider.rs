//! Deterministic decider.
//!
//! `decide` folds a run's history into a [`RunRecord`] and derives the
//! commands the run needs next. It reads nothing but the definition and the
//! history: no clock, no randomness, no I/O. Replaying the same history
//! yields the same record and the same commands, and a command whose id is
//! already in history is never derived as new.
//!
//! Lifecycle of a run:
//!
//! ```text
//! Forward ──failure──▶ Draining ──nothing in flight──▶ Sweeping ──▶ Closed
//!    │                    ▲                                ▲
//!    ├──stop / manual─────┘                                │
//!    └──all nodes resolved──▶ Closed ──manual compensate───┘
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};

use serde_json::{Map, Value, json};

use crate::emit::{ActionCall, Construct, StateDef, WorkflowDefinition};
use crate::ir::types::RetryPolicy;
use crate::registry::ports::CONDITION_RESULT_PORT;

use super::binding::{BindingScope, check_ports, evaluate, evaluate_input};
use super::condition::evaluate_conditions;
use super::contract::{ActionInvocation, ActionResult, ChildRequest, ResultStatus};
use super::controller::{self, FanOutVerdict};
use super::error::RuntimeError;
use super::history::{self, Command, HistoryEvent};
use super::record::*;
use super::saga;

/// The outcome of folding one history.
#[derive(Debug, Clone)]
pub struct Decision {
    pub record: RunRecord,
    /// Commands derived from this history that it does not yet contain.
    pub commands: Vec<Command>,
    /// Commands already in history whose result has not arrived.
    pub outstanding: Vec<Command>,
}

pub fn decide(def: &WorkflowDefinition, history: &[HistoryEvent]) -> Result<Decision, RuntimeError> {
    let (run_id, input) = match history.first() {
        Some(HistoryEvent::RunStarted {
            workflow_id,
            run_id,
            input,
        }) => {
            if workflow_id != &def.id {
                return Err(corrupt(
                    run_id,
                    format!("history belongs to workflow '{}', not '{}'", workflow_id, def.id),
                ));
            }
            (run_id, input)
        }
        _ => return Err(corrupt("", "history does not begin with runStarted".into())),
    };

    let mut decider = Decider::new(def, RunRecord::new(&def.id, run_id, input.clone()));
    decider.advance();
    for event in &history[1..] {
        decider.apply(event).map_err(|reason| corrupt(run_id, reason))?;
        decider.advance();
    }
    Ok(decider.into_decision(history))
}

fn corrupt(run_id: &str, reason: String) -> RuntimeError {
    RuntimeError::CorruptHistory {
        run_id: run_id.to_string(),
        reason,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reason {
    Failure,
    Stop,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Forward,
    /// Waiting for in-flight forward work before the sweep.
    Draining(Reason),
    Sweeping(Reason),
    Closed,
}

enum Readiness {
    Wait,
    Run,
    Skip,
}

#[derive(Debug, Clone)]
struct ActivityRef {
    node_id: String,
    index: Option<usize>,
    purpose: Purpose,
}

struct Decider<'d> {
    def: &'d WorkflowDefinition,
    record: RunRecord,
    mode: Mode,
    derived: Vec<Command>,
    derived_ids: HashSet<String>,
    activities: HashMap<String, ActivityRef>,
    /// Pending retry timers: timer id → (node, attempt it starts).
    timers: HashMap<String, (String, u32)>,
    /// Child run id → node id.
    children: HashMap<String, String>,
    /// Activity, timer and child ids whose result has been folded.
    resolved: HashSet<String>,
    /// Forward activities and children awaiting a result.
    in_flight: BTreeSet<String>,
    /// The compensation activity currently running; the sweep is sequential.
    compensating: Option<String>,
}

impl<'d> Decider<'d> {
    fn new(def: &'d WorkflowDefinition, mut record: RunRecord) -> Self {
        record.status = RunStatus::Running;
        for state in &def.states {
            record.nodes.insert(state.node_id.clone(), NodeRecord::new());
        }
        Decider {
            def,
            record,
            mode: Mode::Forward,
            derived: Vec::new(),
            derived_ids: HashSet::new(),
            activities: HashMap::new(),
            timers: HashMap::new(),
            children: HashMap::new(),
            resolved: HashSet::new(),
            in_flight: BTreeSet::new(),
            compensating: None,
        }
    }

    fn into_decision(self, history: &[HistoryEvent]) -> Decision {
        let issued: Vec<&Command> = history
            .iter()
            .filter_map(|e| match e {
                HistoryEvent::CommandIssued { command } => Some(command),
                _ => None,
            })
            .collect();
        let issued_ids: HashSet<&str> = issued.iter().map(|c| c.id()).collect();

        let outstanding = issued
            .iter()
            .filter(|c| self.awaits_result(c))
            .map(|c| (*c).clone())
            .collect();
        let commands = self
            .derived
            .into_iter()
            .filter(|c| !issued_ids.contains(c.id()))
            .collect();

        Decision {
            record: self.record,
            commands,
            outstanding,
        }
    }

    fn awaits_result(&self, command: &Command) -> bool {
        let target = match command {
            Command::ScheduleActivity { invocation } => &invocation.activity_id,
            Command::StartTimer { timer_id, .. } => timer_id,
            Command::StartChild { request } => &request.child_run_id,
            Command::RequestCancel { activity_id, .. } => activity_id,
            Command::CancelChild { child_run_id, .. } => child_run_id,
            Command::CompleteRun { .. } => return false,
        };
        !self.resolved.contains(target)
    }

    fn issue(&mut self, command: Command) {
        if self.derived_ids.insert(command.id().to_string()) {
            self.derived.push(command);
        }
    }

    fn apply(&mut self, event: &HistoryEvent) -> Result<(), String> {
        match event {
            HistoryEvent::RunStarted { .. } => return Err("duplicate runStarted event".into()),
            HistoryEvent::CommandIssued { .. } => {}
            HistoryEvent::ActivityResolved { result } => self.on_activity(result),
            HistoryEvent::TimerFired { timer_id } => self.on_timer(timer_id),
            HistoryEvent::ChildResolved {
                child_run_id,
                status,
                output,
                error,
            } => self.on_child(child_run_id, *status, output.as_ref(), error.as_deref()),
            HistoryEvent::CancelRequested { .. } => self.on_cancel(),
            HistoryEvent::CompensationRequested => self.on_compensate(),
        }
        Ok(())
    }

    // =========================================================================
    // Progress
    // =========================================================================

    fn advance(&mut self) {
        loop {
            let progressed = match self.mode {
                Mode::Forward => self.advance_forward(),
                Mode::Draining(reason) => {
                    if self.in_flight.is_empty() {
                        self.mode = Mode::Sweeping(reason);
                        true
                    } else {
                        false
                    }
                }
                Mode::Sweeping(reason) => self.advance_sweep(reason),
                Mode::Closed => false,
            };
            if !progressed {
                break;
            }
        }
    }

    fn advance_forward(&mut self) -> bool {
        let def = self.def;
        let mut progressed = false;
        for state in &def.states {
            if self.mode != Mode::Forward {
                return true;
            }
            if self.status(&state.node_id) != ActionStatus::NotStarted {
                continue;
            }
            match self.readiness(state) {
                Readiness::Wait => {}
                Readiness::Skip => {
                    self.node_mut(&state.node_id).status = ActionStatus::Skipped;
                    progressed = true;
                }
                Readiness::Run => {
                    self.start_state(state);
                    progressed = true;
                }
            }
        }

        let all_done = self
            .record
            .nodes
            .values()
            .all(|n| matches!(n.status, ActionStatus::Succeeded | ActionStatus::Skipped));
        if self.mode == Mode::Forward && self.in_flight.is_empty() && all_done {
            self.complete();
            progressed = true;
        }
        progressed
    }

    /// A node runs once every predecessor is resolved and at least one
    /// incoming transition is active; with no active transition it is skipped.
    fn readiness(&self, state: &StateDef) -> Readiness {
        let incoming = self.def.incoming(&state.name);
        if incoming.is_empty() {
            return Readiness::Run;
        }
        let mut active = false;
        for (source, when) in incoming {
            let Some(node) = self
                .def
                .state(source)
                .and_then(|s| self.record.node(&s.node_id))
            else {
                continue;
            };
            match node.status {
                ActionStatus::Succeeded => {
                    if when.is_none() || when == node.branch {
                        active = true;
                    }
                }
                ActionStatus::Skipped => {}
                _ => return Readiness::Wait,
            }
        }
        if active { Readiness::Run } else { Readiness::Skip }
    }

    fn start_state(&mut self, state: &'d StateDef) {
        let node_id = state.node_id.as_str();
        match &state.construct {
            Construct::Task { call } | Construct::Retry { call, .. } => {
                match self.forward_input(node_id, call, None) {
                    Ok(input) => self.schedule_forward(state, call, None, 1, input),
                    Err(cause) => self.fail_node(node_id, None, FailureKind::Binding, cause),
                }
            }
            Construct::FanOut { items, .. } => {
                let items = {
                    let scope = self.scope();
                    evaluate(items, &scope)
                };
                match items {
                    Ok(Value::Array(items)) => {
                        let node = self.node_mut(node_id);
                        node.status = ActionStatus::Running;
                        node.instances = items
                            .into_iter()
                            .enumerate()
                            .map(|(index, item)| InstanceRecord {
                                index,
                                status: ActionStatus::NotStarted,
                                item,
                                output: None,
                                error: None,
                            })
                            .collect();
                        if node.instances.is_empty() {
                            node.status = ActionStatus::Succeeded;
                            node.output = Some(controller::aggregate(&[]));
                        } else {
                            self.pump_fan_out(state);
                        }
                    }
                    Ok(other) => self.fail_node(
                        node_id,
                        None,
                        FailureKind::Binding,
                        format!("fan-out items must be an array, got {}", other),
                    ),
                    Err(cause) => self.fail_node(node_id, None, FailureKind::Binding, cause),
                }
            }
            Construct::Choice {
                conditions,
                combine_with,
            } => {
                let branch = {
                    let scope = self.scope();
                    evaluate_conditions(conditions, *combine_with, &scope)
                };
                let node = self.node_mut(node_id);
                node.status = ActionStatus::Succeeded;
                node.branch = Some(branch);
                node.output = Some(json!({ CONDITION_RESULT_PORT: branch }));
            }
            Construct::ChildWorkflow {
                workflow_id,
                input,
                input_contract,
                output_contract,
            } => {
                let input = {
                    let scope = self.scope();
                    evaluate_input(input, &scope)
                };
                let input = match input {
                    Ok(input) => input,
                    Err(cause) => return self.fail_node(node_id, None, FailureKind::Binding, cause),
                };
                if let Err(e) = check_ports(input_contract, &input) {
                    return self.fail_node(
                        node_id,
                        None,
                        FailureKind::Contract,
                        format!("child input violates contract: {}", e),
                    );
                }

                let child_run_id = history::child_run_id(&self.record.run_id, node_id);
                self.record.children.push(SubworkflowInvocation {
                    node_id: node_id.to_string(),
                    child_run_id: child_run_id.clone(),
                    workflow_id: workflow_id.clone(),
                    input: input.clone(),
                    output_contract: output_contract.clone(),
                    status: RunStatus::Running,
                    output: None,
                    error: None,
                });
                self.children.insert(child_run_id.clone(), node_id.to_string());
                self.in_flight.insert(child_run_id.clone());
                self.node_mut(node_id).status = ActionStatus::Running;
                self.issue(Command::StartChild {
                    request: ChildRequest {
                        child_run_id,
                        parent_run_id: self.record.run_id.clone(),
                        node_id: node_id.to_string(),
                        workflow_id: workflow_id.clone(),
                        runtime: state.execution.runtime,
                        input,
                    },
                });
            }
        }
    }

    /// Start as many fan-out instances as the bound allows, then settle the
    /// node if its success policy is decided.
    fn pump_fan_out(&mut self, state: &'d StateDef) {
        let Construct::FanOut {
            max_concurrency,
            success_policy,
            call,
            ..
        } = &state.construct
        else {
            return;
        };
        let node_id = state.node_id.as_str();

        while self.mode == Mode::Forward {
            let Some(node) = self.record.node(node_id) else {
                return;
            };
            let verdict = controller::verdict(&node.instances, *success_policy);
            let next = controller::next_indices(&node.instances, *max_concurrency);
            match verdict {
                FanOutVerdict::Succeeded(output) => {
                    let node = self.node_mut(node_id);
                    node.status = ActionStatus::Succeeded;
                    node.output = Some(output);
                    return;
                }
                FanOutVerdict::Failed(index, cause) => {
                    return self.fail_node(node_id, index, FailureKind::Action, cause);
                }
                FanOutVerdict::Pending => {}
            }
            if next.is_empty() {
                return;
            }
            for index in next {
                match self.forward_input(node_id, call, Some(index)) {
                    Ok(input) => self.schedule_forward(state, call, Some(index), 1, input),
                    Err(cause) => {
                        if let Some(instance) = self.node_mut(node_id).instances.get_mut(index) {
                            instance.status = ActionStatus::Failed;
                            instance.error = Some(cause);
                        }
                    }
                }
            }
        }
    }

    /// Outside forward mode no new instance starts; once nothing is running
    /// the node takes its final status.
    fn settle_drained_fan_out(&mut self, node_id: &str) {
        let node = self.node_mut(node_id);
        if node.status != ActionStatus::Running
            || node.instances.iter().any(|i| i.status == ActionStatus::Running)
        {
            return;
        }
        for instance in node.instances.iter_mut() {
            if instance.status == ActionStatus::NotStarted {
                instance.status = ActionStatus::Cancelled;
            }
        }
        if node.instances.iter().any(|i| i.status == ActionStatus::Cancelled) {
            node.status = ActionStatus::Cancelled;
        } else if node.instances.iter().all(|i| i.status == ActionStatus::Succeeded) {
            node.status = ActionStatus::Succeeded;
            node.output = Some(controller::aggregate(&node.instances));
        } else {
            node.status = ActionStatus::Failed;
        }
    }

    fn complete(&mut self) {
        match self.evaluate_outputs() {
            Ok(output) => {
                self.record.output = Some(output.clone());
                self.record.status = RunStatus::Completed;
                self.mode = Mode::Closed;
                self.issue(Command::CompleteRun {
                    close_id: history::close_id(RunStatus::Completed),
                    status: RunStatus::Completed,
                    output: Some(output),
                });
            }
            Err(cause) => self.fail(Failure {
                node_id: None,
                expansion_index: None,
                kind: FailureKind::Binding,
                cause,
            }),
        }
    }

    fn evaluate_outputs(&self) -> Result<Value, String> {
        let scope = self.scope();
        let mut output = Map::new();
        for field in &self.def.output {
            let value = evaluate(&field.value, &scope)
                .map_err(|e| format!("output '{}': {}", field.name, e))?;
            output.insert(field.name.clone(), value);
        }
        Ok(Value::Object(output))
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    fn forward_input(&self, node_id: &str, call: &ActionCall, index: Option<usize>) -> Result<Value, String> {
        let scope = self.scope();
        match index {
            Some(i) => {
                let item = self
                    .record
                    .node(node_id)
                    .and_then(|n| n.instances.get(i))
                    .map(|inst| &inst.item)
                    .ok_or_else(|| format!("fan-out element {} does not exist", i))?;
                evaluate_input(&call.input, &scope.with_element(i, item))
            }
            None => evaluate_input(&call.input, &scope),
        }
    }

    fn schedule_forward(
        &mut self,
        state: &StateDef,
        call: &ActionCall,
        index: Option<usize>,
        attempt: u32,
        input: Value,
    ) {
        let node_id = &state.node_id;
        let activity_id = history::forward_activity_id(node_id, index, attempt);
        let invocation = ActionInvocation {
            activity_id: activity_id.clone(),
            workflow_id: self.record.workflow_id.clone(),
            run_id: self.record.run_id.clone(),
            node_id: node_id.clone(),
            expansion_index: index,
            attempt,
            purpose: Purpose::Forward,
            action: call.action.clone(),
            runtime: state.execution.runtime,
            task_queue: state.execution.task_queue.clone(),
            params: call.params.clone(),
            input,
            timeout_ms: state.execution.timeout_ms,
            retry_policy: state.retry_policy(),
        };

        self.track_activity(&invocation);
        self.in_flight.insert(activity_id);
        let node = self.node_mut(node_id);
        node.status = ActionStatus::Running;
        node.attempts += 1;
        if let Some(instance) = index.and_then(|i| node.instances.get_mut(i)) {
            instance.status = ActionStatus::Running;
        }
        self.issue(Command::ScheduleActivity { invocation });
    }

    fn track_activity(&mut self, invocation: &ActionInvocation) {
        self.record.attempts.push(ActionAttempt {
            node_id: invocation.node_id.clone(),
            expansion_index: invocation.expansion_index,
            attempt: invocation.attempt,
            activity_id: invocation.activity_id.clone(),
            purpose: invocation.purpose,
            status: AttemptStatus::Running,
            output: None,
            error: None,
        });
        self.activities.insert(
            invocation.activity_id.clone(),
            ActivityRef {
                node_id: invocation.node_id.clone(),
                index: invocation.expansion_index,
                purpose: invocation.purpose,
            },
        );
    }

    fn retry(&mut self, state: &StateDef, call: &ActionCall, policy: RetryPolicy) {
        let node_id = &state.node_id;
        let next = self.record.node(node_id).map(|n| n.attempts).unwrap_or(0) + 1;
        let delay = policy.delay_before(next);
        if delay == 0 {
            match self.forward_input(node_id, call, None) {
                Ok(input) => self.schedule_forward(state, call, None, next, input),
                Err(cause) => self.fail_node(node_id, None, FailureKind::Binding, cause),
            }
        } else {
            let timer = history::timer_id(node_id, next);
            self.timers.insert(timer.clone(), (node_id.clone(), next));
            self.issue(Command::StartTimer {
                timer_id: timer,
                node_id: node_id.clone(),
                delay_ms: delay,
            });
        }
    }

    // =========================================================================
    // Results
    // =========================================================================

    fn on_activity(&mut self, result: &ActionResult) {
        let id = &result.activity_id;
        if self.resolved.contains(id) {
            return;
        }
        let Some(activity) = self.activities.get(id).cloned() else {
            return;
        };
        self.resolved.insert(id.clone());
        self.in_flight.remove(id);

        if let Some(attempt) = self.record.attempts.iter_mut().find(|a| &a.activity_id == id) {
            attempt.status = match result.status {
                ResultStatus::Succeeded => AttemptStatus::Succeeded,
                ResultStatus::Failed => AttemptStatus::Failed,
                ResultStatus::TimedOut => AttemptStatus::TimedOut,
                ResultStatus::Cancelled => AttemptStatus::Cancelled,
            };
            attempt.output = result.output.clone();
            attempt.error = result.error.clone();
        }

        match activity.purpose {
            Purpose::Forward => self.on_forward_result(&activity, result),
            Purpose::Compensation => self.on_compensation_result(&activity, result),
        }
    }

    fn on_forward_result(&mut self, activity: &ActivityRef, result: &ActionResult) {
        let def = self.def;
        let Some(state) = def.state_for_node(&activity.node_id) else {
            return;
        };
        let Some(call) = state.construct.call() else {
            return;
        };

        let outcome = match result.status {
            ResultStatus::Succeeded => {
                let output = result.output.clone().unwrap_or(Value::Null);
                match check_ports(&call.outputs, &output) {
                    Ok(()) => Ok(output),
                    Err(e) => Err((FailureKind::Contract, format!("output violates contract: {}", e))),
                }
            }
            ResultStatus::Failed => Err((FailureKind::Action, error_text(result, "action failed"))),
            ResultStatus::TimedOut => Err((FailureKind::Timeout, error_text(result, "action timed out"))),
            ResultStatus::Cancelled => Err((FailureKind::Action, error_text(result, "action cancelled"))),
        };
        let stopping = self.record.cancel_requested;
        let node_id = activity.node_id.as_str();

        if let Some(index) = activity.index {
            let succeeded = outcome.is_ok();
            if let Some(instance) = self.node_mut(node_id).instances.get_mut(index) {
                match outcome {
                    Ok(output) => {
                        instance.status = ActionStatus::Succeeded;
                        instance.output = Some(output);
                    }
                    Err(_) if stopping => instance.status = ActionStatus::Cancelled,
                    Err((_, cause)) => {
                        instance.status = ActionStatus::Failed;
                        instance.error = Some(cause);
                    }
                }
            }
            if succeeded {
                self.record_completion(node_id, Some(index));
            }
            if self.mode == Mode::Forward {
                self.pump_fan_out(state);
            } else {
                self.settle_drained_fan_out(node_id);
            }
            return;
        }

        match outcome {
            Ok(output) => {
                let node = self.node_mut(node_id);
                node.status = ActionStatus::Succeeded;
                node.output = Some(output);
                self.record_completion(node_id, None);
            }
            Err(_) if stopping => self.node_mut(node_id).status = ActionStatus::Cancelled,
            Err((kind, cause)) => {
                if let Construct::Retry { policy, .. } = &state.construct {
                    let attempts = self.record.node(node_id).map(|n| n.attempts).unwrap_or(0);
                    if self.mode == Mode::Forward && attempts < policy.max_attempts {
                        self.node_mut(node_id).error = Some(cause);
                        return self.retry(state, call, *policy);
                    }
                }
                self.fail_node(node_id, None, kind, cause);
            }
        }
    }

    fn on_timer(&mut self, timer_id: &str) {
        if !self.resolved.insert(timer_id.to_string()) {
            return;
        }
        // Abandoned timers are no longer in the map; their firing is ignored.
        let Some((node_id, attempt)) = self.timers.remove(timer_id) else {
            return;
        };
        if self.mode != Mode::Forward {
            return;
        }
        let def = self.def;
        let Some(state) = def.state_for_node(&node_id) else {
            return;
        };
        let Some(call) = state.construct.call() else {
            return;
        };
        match self.forward_input(&node_id, call, None) {
            Ok(input) => self.schedule_forward(state, call, None, attempt, input),
            Err(cause) => self.fail_node(&node_id, None, FailureKind::Binding, cause),
        }
    }

    fn on_child(&mut self, child_run_id: &str, status: RunStatus, output: Option<&Value>, error: Option<&str>) {
        if self.resolved.contains(child_run_id) {
            return;
        }
        let Some(node_id) = self.children.get(child_run_id).cloned() else {
            return;
        };
        self.resolved.insert(child_run_id.to_string());
        self.in_flight.remove(child_run_id);

        if let Some(invocation) = self
            .record
            .children
            .iter_mut()
            .find(|c| c.child_run_id == child_run_id)
        {
            invocation.status = status;
            invocation.output = output.cloned();
            invocation.error = error.map(str::to_string);
        }

        let def = self.def;
        let Some(Construct::ChildWorkflow { output_contract, .. }) =
            def.state_for_node(&node_id).map(|s| &s.construct)
        else {
            return;
        };

        let outcome = if status == RunStatus::Completed {
            let output = output.cloned().unwrap_or(Value::Null);
            match check_ports(output_contract, &output) {
                Ok(()) => Ok(output),
                Err(e) => Err((
                    FailureKind::Contract,
                    format!("child output violates contract: {}", e),
                )),
            }
        } else {
            let detail = error.map(|e| format!(": {}", e)).unwrap_or_default();
            Err((
                FailureKind::Action,
                format!("child run '{}' ended {}{}", child_run_id, status, detail),
            ))
        };

        match outcome {
            Ok(output) => {
                let node = self.node_mut(&node_id);
                node.status = ActionStatus::Succeeded;
                node.output = Some(output);
                self.record_completion(&node_id, None);
            }
            Err(_) if self.record.cancel_requested => {
                self.node_mut(&node_id).status = ActionStatus::Cancelled;
            }
            Err((kind, cause)) => self.fail_node(&node_id, None, kind, cause),
        }
    }

    fn on_cancel(&mut self) {
        if self.record.status.is_terminal() {
            return;
        }
        self.record.cancel_requested = true;
        match self.mode {
            Mode::Forward | Mode::Draining(_) => {
                self.mode = Mode::Draining(Reason::Stop);
                self.record.status = RunStatus::Compensating;
                self.abandon_timers();
                let targets: Vec<String> = self.in_flight.iter().cloned().collect();
                for target in targets {
                    let cancel_id = history::cancel_id(&target);
                    if self.children.contains_key(&target) {
                        self.issue(Command::CancelChild {
                            cancel_id,
                            child_run_id: target,
                        });
                    } else {
                        self.issue(Command::RequestCancel {
                            cancel_id,
                            activity_id: target,
                        });
                    }
                }
            }
            Mode::Sweeping(_) => self.mode = Mode::Sweeping(Reason::Stop),
            Mode::Closed => {}
        }
    }

    fn on_compensate(&mut self) {
        match (self.mode, self.record.status) {
            (Mode::Forward, RunStatus::Running) => {
                self.mode = Mode::Draining(Reason::Manual);
                self.record.status = RunStatus::Compensating;
                self.abandon_timers();
            }
            (Mode::Closed, RunStatus::Completed) => {
                self.mode = Mode::Sweeping(Reason::Manual);
                self.record.status = RunStatus::Compensating;
            }
            _ => {}
        }
    }

    // =========================================================================
    // Failure and compensation
    // =========================================================================

    fn fail_node(&mut self, node_id: &str, index: Option<usize>, kind: FailureKind, cause: String) {
        let node = self.node_mut(node_id);
        node.status = ActionStatus::Failed;
        node.error = Some(cause.clone());
        self.fail(Failure {
            node_id: Some(node_id.to_string()),
            expansion_index: index,
            kind,
            cause,
        });
    }

    fn fail(&mut self, failure: Failure) {
        if self.record.failure.is_none() {
            self.record.failure = Some(failure);
        }
        if self.mode == Mode::Forward {
            self.mode = Mode::Draining(Reason::Failure);
            self.record.status = RunStatus::Compensating;
            self.abandon_timers();
        }
    }

    /// Drop pending retry timers; their nodes will not run again.
    fn abandon_timers(&mut self) {
        let nodes: Vec<String> = self.timers.drain().map(|(_, (node, _))| node).collect();
        for node_id in nodes {
            let node = self.node_mut(&node_id);
            if node.status == ActionStatus::Running {
                node.status = ActionStatus::Cancelled;
            }
        }
    }

    fn advance_sweep(&mut self, reason: Reason) -> bool {
        if self.compensating.is_some() {
            return false;
        }
        let def = self.def;
        let Some(unit) = saga::pending_compensations(def, &self.record).into_iter().next() else {
            self.close(reason);
            return true;
        };
        let Some((state, compensation)) = def
            .state_for_node(&unit.node_id)
            .and_then(|s| s.compensation.as_ref().map(|c| (s, c)))
        else {
            return false;
        };

        let activity_id = history::compensation_activity_id(&unit.node_id, unit.expansion_index);
        let sequence = self.record.compensations.len();
        let input = self.compensation_input(&unit, &compensation.call);

        match input {
            Ok(input) => {
                let invocation = ActionInvocation {
                    activity_id: activity_id.clone(),
                    workflow_id: self.record.workflow_id.clone(),
                    run_id: self.record.run_id.clone(),
                    node_id: unit.node_id.clone(),
                    expansion_index: unit.expansion_index,
                    attempt: 1,
                    purpose: Purpose::Compensation,
                    action: compensation.call.action.clone(),
                    runtime: state.execution.runtime,
                    task_queue: state.execution.task_queue.clone(),
                    params: compensation.call.params.clone(),
                    input,
                    timeout_ms: compensation.timeout_ms,
                    retry_policy: RetryPolicy::once(),
                };
                self.track_activity(&invocation);
                self.record.compensations.push(CompensationEntry {
                    node_id: unit.node_id.clone(),
                    expansion_index: unit.expansion_index,
                    sequence,
                    activity_id: activity_id.clone(),
                    status: CompensationStatus::Running,
                    error: None,
                });
                self.compensating = Some(activity_id);
                self.set_unit_status(&unit, ActionStatus::Compensating);
                self.issue(Command::ScheduleActivity { invocation });
            }
            Err(cause) => {
                self.record.compensations.push(CompensationEntry {
                    node_id: unit.node_id.clone(),
                    expansion_index: unit.expansion_index,
                    sequence,
                    activity_id,
                    status: CompensationStatus::Failed,
                    error: Some(cause.clone()),
                });
                self.set_unit_status(&unit, ActionStatus::CompensationFailed);
                self.record.compensation_failures.push(Failure {
                    node_id: Some(unit.node_id.clone()),
                    expansion_index: unit.expansion_index,
                    kind: FailureKind::Compensation,
                    cause,
                });
            }
        }
        true
    }

    /// Compensation input sees the unit's own output (and, for a fan-out
    /// instance, its element).
    fn compensation_input(&self, unit: &CompletionRef, call: &ActionCall) -> Result<Value, String> {
        let mut scope = self.scope();
        let node = self.record.node(&unit.node_id);
        match (unit.expansion_index, node) {
            (Some(i), Some(node)) => {
                if let Some(instance) = node.instances.get(i) {
                    scope = scope.with_element(i, &instance.item);
                    if let Some(output) = &instance.output {
                        scope = scope.with_own_output(&unit.node_id, output);
                    }
                }
            }
            (None, Some(node)) => {
                if let Some(output) = &node.output {
                    scope = scope.with_own_output(&unit.node_id, output);
                }
            }
            _ => {}
        }
        evaluate_input(&call.input, &scope)
    }

    fn on_compensation_result(&mut self, activity: &ActivityRef, result: &ActionResult) {
        if self.compensating.as_deref() == Some(result.activity_id.as_str()) {
            self.compensating = None;
        }
        let succeeded = result.status == ResultStatus::Succeeded;
        let error = (!succeeded).then(|| error_text(result, "compensation failed"));

        if let Some(entry) = self
            .record
            .compensations
            .iter_mut()
            .find(|c| c.activity_id == result.activity_id)
        {
            entry.status = if succeeded {
                CompensationStatus::Succeeded
            } else {
                CompensationStatus::Failed
            };
            entry.error = error.clone();
        }

        let unit = CompletionRef {
            node_id: activity.node_id.clone(),
            expansion_index: activity.index,
        };
        if succeeded {
            self.set_unit_status(&unit, ActionStatus::Compensated);
        } else {
            self.set_unit_status(&unit, ActionStatus::CompensationFailed);
            self.record.compensation_failures.push(Failure {
                node_id: Some(unit.node_id),
                expansion_index: unit.expansion_index,
                kind: FailureKind::Compensation,
                cause: error.unwrap_or_default(),
            });
        }
    }

    fn set_unit_status(&mut self, unit: &CompletionRef, status: ActionStatus) {
        let node = self.node_mut(&unit.node_id);
        let Some(index) = unit.expansion_index else {
            node.status = status;
            return;
        };
        if let Some(instance) = node.instances.get_mut(index) {
            instance.status = status;
        }
        // A failed or cancelled fan-out keeps that status; the instances
        // carry the compensation detail.
        if matches!(node.status, ActionStatus::Failed | ActionStatus::Cancelled) {
            return;
        }
        let any = |s: ActionStatus| node.instances.iter().any(|i| i.status == s);
        let aggregate = if any(ActionStatus::CompensationFailed) {
            ActionStatus::CompensationFailed
        } else if any(ActionStatus::Compensating) {
            ActionStatus::Compensating
        } else {
            ActionStatus::Compensated
        };
        node.status = aggregate;
    }

    fn close(&mut self, reason: Reason) {
        let status = match reason {
            Reason::Stop => RunStatus::Cancelled,
            _ if !self.record.compensation_failures.is_empty() => RunStatus::Failed,
            Reason::Failure if self.record.compensations.is_empty() => RunStatus::Failed,
            Reason::Failure | Reason::Manual => RunStatus::Compensated,
        };
        self.record.status = status;
        self.mode = Mode::Closed;
        self.issue(Command::CompleteRun {
            close_id: history::close_id(status),
            status,
            output: self.record.output.clone(),
        });
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn scope(&self) -> BindingScope<'_> {
        BindingScope::new(&self.record.input, &self.record.nodes)
    }

    fn status(&self, node_id: &str) -> ActionStatus {
        self.record
            .node_status(node_id)
            .unwrap_or(ActionStatus::NotStarted)
    }

    fn node_mut(&mut self, node_id: &str) -> &mut NodeRecord {
        self.record.nodes.entry(node_id.to_string()).or_default()
    }

    fn record_completion(&mut self, node_id: &str, index: Option<usize>) {
        self.record.completion_order.push(CompletionRef {
            node_id: node_id.to_string(),
            expansion_index: index,
        });
    }
}

fn error_text(result: &ActionResult, fallback: &str) -> String {
    result
        .error
        .clone()
        .unwrap_or_else(|| fallback.to_string())
}
