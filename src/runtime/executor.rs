//! Drives a run: fold history, dispatch commands, append results.
//!
//! The executor is the only place that performs effects. Every decision is
//! recomputed from the durable history, so a run resumed by a fresh executor
//! (after a crash, or from a serialized history) continues exactly where the
//! old one stopped without re-invoking completed work.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;
use crate::emit::WorkflowDefinition;

use super::binding::check_ports;
use super::decider::{Decision, decide};
use super::error::RuntimeError;
use super::history::{Command, HistoryEvent};
use super::record::{RunRecord, RunStatus};
use super::substrate::{HistoryStore, Substrate};
use super::telemetry;

/// Record plus the raw history it was derived from.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTrace {
    pub record: RunRecord,
    pub history: Vec<HistoryEvent>,
}

enum Step {
    Progressed,
    Finished(RunRecord),
}

pub struct Executor<'d, S: Substrate, H: HistoryStore> {
    definition: &'d WorkflowDefinition,
    substrate: S,
    history: H,
    config: ExecutorConfig,
    /// Command ids handed to the substrate by this executor.
    delivered: HashSet<String>,
}

impl<'d, S: Substrate, H: HistoryStore> Executor<'d, S, H> {
    pub fn new(definition: &'d WorkflowDefinition, substrate: S, history: H, config: ExecutorConfig) -> Self {
        Executor {
            definition,
            substrate,
            history,
            config,
            delivered: HashSet::new(),
        }
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    pub fn into_history(self) -> H {
        self.history
    }

    /// Start a run and dispatch its first commands without waiting on them.
    pub fn start(&mut self, run_id: &str, input: Value) -> Result<RunRecord, RuntimeError> {
        if self.history.load(run_id)?.is_some() {
            return Err(RuntimeError::RunExists(run_id.to_string()));
        }
        check_ports(&self.definition.input_contract, &input).map_err(RuntimeError::InvalidInput)?;

        let span = telemetry::run_span(&self.definition.id, run_id);
        let _guard = span.enter();
        info!("run started");

        self.history.append(
            run_id,
            HistoryEvent::RunStarted {
                workflow_id: self.definition.id.clone(),
                run_id: run_id.to_string(),
                input,
            },
        )?;
        Ok(self.sync(run_id)?.record)
    }

    /// Start a run and drive it to a terminal status.
    pub fn run(&mut self, run_id: &str, input: Value) -> Result<RunRecord, RuntimeError> {
        self.start(run_id, input)?;
        self.run_to_completion(run_id)
    }

    /// Drive an existing run until it reaches a terminal status.
    pub fn run_to_completion(&mut self, run_id: &str) -> Result<RunRecord, RuntimeError> {
        let span = telemetry::run_span(&self.definition.id, run_id);
        let _guard = span.enter();

        for _ in 0..self.config.max_steps {
            if let Step::Finished(record) = self.step(run_id)? {
                match &record.failure {
                    Some(failure) => warn!(status = %record.status, failure = %failure, "run finished"),
                    None => info!(status = %record.status, "run finished"),
                }
                return Ok(record);
            }
        }
        Err(RuntimeError::StepLimit(run_id.to_string(), self.config.max_steps))
    }

    /// Resume a run from its stored history.
    pub fn replay(&mut self, run_id: &str) -> Result<RunRecord, RuntimeError> {
        self.load(run_id)?;
        debug!(run_id, "replaying run");
        self.run_to_completion(run_id)
    }

    /// Cancel a running run; completed work is compensated, then the run
    /// ends `CANCELLED`.
    pub fn stop(&mut self, run_id: &str, reason: Option<String>) -> Result<RunRecord, RuntimeError> {
        let record = self.record(run_id)?;
        if record.status.is_terminal() {
            return Err(RuntimeError::InvalidState {
                run_id: run_id.to_string(),
                status: record.status,
                operation: "stop",
            });
        }
        self.history
            .append(run_id, HistoryEvent::CancelRequested { reason })?;
        self.run_to_completion(run_id)
    }

    /// Compensate a running or completed run.
    pub fn compensate(&mut self, run_id: &str) -> Result<RunRecord, RuntimeError> {
        let record = self.record(run_id)?;
        if !matches!(record.status, RunStatus::Running | RunStatus::Completed) {
            return Err(RuntimeError::InvalidState {
                run_id: run_id.to_string(),
                status: record.status,
                operation: "compensate",
            });
        }
        self.history
            .append(run_id, HistoryEvent::CompensationRequested)?;
        self.run_to_completion(run_id)
    }

    /// The current record, derived without dispatching anything.
    pub fn record(&self, run_id: &str) -> Result<RunRecord, RuntimeError> {
        let history = self.load(run_id)?;
        Ok(decide(self.definition, &history)?.record)
    }

    pub fn trace(&self, run_id: &str) -> Result<RunTrace, RuntimeError> {
        let history = self.load(run_id)?;
        let record = decide(self.definition, &history)?.record;
        Ok(RunTrace { record, history })
    }

    fn step(&mut self, run_id: &str) -> Result<Step, RuntimeError> {
        let decision = self.sync(run_id)?;
        if decision.record.status.is_terminal() {
            return Ok(Step::Finished(decision.record));
        }
        match self.substrate.next_event()? {
            Some(event) => {
                debug!(event = event.kind(), "event received");
                self.history.append(run_id, event)?;
                Ok(Step::Progressed)
            }
            None => Err(RuntimeError::Stalled(run_id.to_string())),
        }
    }

    /// Decide, redeliver commands this executor has not handed over yet, then
    /// record and dispatch new ones.
    fn sync(&mut self, run_id: &str) -> Result<Decision, RuntimeError> {
        let history = self.load(run_id)?;
        let decision = decide(self.definition, &history)?;

        for command in &decision.outstanding {
            if self.delivered.insert(command.id().to_string()) {
                debug!(command = command.id(), "redelivering command");
                self.dispatch(command)?;
            }
        }
        for command in &decision.commands {
            self.history.append(
                run_id,
                HistoryEvent::CommandIssued {
                    command: command.clone(),
                },
            )?;
            self.delivered.insert(command.id().to_string());
            self.dispatch(command)?;
        }
        Ok(decision)
    }

    fn dispatch(&mut self, command: &Command) -> Result<(), RuntimeError> {
        debug!(command = command.id(), "dispatching command");
        match command {
            Command::ScheduleActivity { invocation } => self.substrate.start_activity(invocation)?,
            Command::StartTimer {
                timer_id, delay_ms, ..
            } => self.substrate.start_timer(timer_id, *delay_ms)?,
            Command::StartChild { request } => self.substrate.start_child(request)?,
            Command::RequestCancel { activity_id, .. } => self.substrate.request_cancel(activity_id)?,
            Command::CancelChild { child_run_id, .. } => self.substrate.cancel_child(child_run_id)?,
            Command::CompleteRun { status, .. } => debug!(status = %status, "run closed"),
        }
        Ok(())
    }

    fn load(&self, run_id: &str) -> Result<Vec<HistoryEvent>, RuntimeError> {
        self.history
            .load(run_id)?
            .ok_or_else(|| RuntimeError::UnknownRun(run_id.to_string()))
    }
}
