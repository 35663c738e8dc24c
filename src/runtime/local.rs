//! In-process substrate.
//!
//! Activities are queued when started and executed one at a time, lazily,
//! when the executor asks for the next event. Dispatch order is configurable
//! so tests can force out-of-order completion. Timers are virtual: they fire
//! once no activity is queued. Child runs execute in a nested executor with
//! their own in-memory history.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;

use super::catalog::WorkflowCatalog;
use super::contract::{ActionInvocation, ActionResult, ChildRequest};
use super::error::SubstrateError;
use super::executor::Executor;
use super::history::HistoryEvent;
use super::record::RunStatus;
use super::substrate::{InMemoryHistory, Substrate};
use super::telemetry;

/// Maximum depth of nested child runs.
pub const MAX_CHILD_DEPTH: usize = 32;

/// What a handler sees besides its input.
pub struct ActionContext<'a> {
    pub invocation: &'a ActionInvocation,
    /// Cancelled when the run is stopped; handlers may poll it.
    pub cancel: &'a CancellationToken,
}

pub type ActionHandler = Arc<dyn Fn(&ActionContext<'_>, &Value) -> Result<Value, String> + Send + Sync>;

/// Handlers keyed by action kind.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, ActionHandler>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, action: impl Into<String>, handler: F)
    where
        F: Fn(&ActionContext<'_>, &Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.handlers.insert(action.into(), Arc::new(handler));
    }

    pub fn with<F>(mut self, action: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&ActionContext<'_>, &Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.register(action, handler);
        self
    }

    pub fn get(&self, action: &str) -> Option<&ActionHandler> {
        self.handlers.get(action)
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("ActionRegistry").field("actions", &names).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchOrder {
    /// Oldest queued work first.
    #[default]
    Fifo,
    /// Newest queued work first.
    Lifo,
}

enum Work {
    Activity(ActionInvocation),
    Child(ChildRequest),
}

pub struct LocalSubstrate<'a> {
    catalog: &'a WorkflowCatalog,
    actions: &'a ActionRegistry,
    config: ExecutorConfig,
    order: DispatchOrder,
    depth: usize,
    queue: VecDeque<Work>,
    timers: VecDeque<String>,
    tokens: HashMap<String, CancellationToken>,
    seen: HashSet<String>,
}

impl<'a> LocalSubstrate<'a> {
    pub fn new(catalog: &'a WorkflowCatalog, actions: &'a ActionRegistry) -> Self {
        LocalSubstrate {
            catalog,
            actions,
            config: ExecutorConfig::default(),
            order: DispatchOrder::default(),
            depth: 0,
            queue: VecDeque::new(),
            timers: VecDeque::new(),
            tokens: HashMap::new(),
            seen: HashSet::new(),
        }
    }

    pub fn with_order(mut self, order: DispatchOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Register work once per id; redelivered commands are dropped.
    fn enqueue(&mut self, id: &str, work: Work) {
        if self.seen.insert(id.to_string()) {
            self.tokens.insert(id.to_string(), CancellationToken::new());
            self.queue.push_back(work);
        }
    }

    fn token(&self, id: &str) -> CancellationToken {
        self.tokens.get(id).cloned().unwrap_or_default()
    }

    fn execute_activity(&self, invocation: &ActionInvocation) -> ActionResult {
        let span = telemetry::action_span(invocation);
        let _guard = span.enter();

        let cancel = self.token(&invocation.activity_id);
        if cancel.is_cancelled() {
            debug!("cancelled before dispatch");
            return ActionResult::cancelled(invocation);
        }
        let Some(handler) = self.actions.get(&invocation.action) else {
            warn!(action = %invocation.action, "no handler registered");
            return ActionResult::failed(
                invocation,
                format!("no handler registered for action '{}'", invocation.action),
            );
        };

        debug!(action = %invocation.action, "action started");
        let started = Instant::now();
        let context = ActionContext {
            invocation,
            cancel: &cancel,
        };
        let outcome = handler(&context, &invocation.input);
        let overran = started.elapsed() > Duration::from_millis(invocation.timeout_ms);
        let result = match outcome {
            Err(_) if cancel.is_cancelled() => ActionResult::cancelled(invocation),
            _ if overran => ActionResult::timed_out(invocation),
            Ok(output) => ActionResult::succeeded(invocation, output),
            Err(error) => ActionResult::failed(invocation, error),
        };
        match &result.error {
            None => info!(status = ?result.status, "action finished"),
            Some(error) => warn!(status = ?result.status, error = %error, "action finished"),
        }
        result
    }

    fn execute_child(&self, request: &ChildRequest) -> HistoryEvent {
        let span = telemetry::subworkflow_span(request);
        let _guard = span.enter();

        let resolved = |status: RunStatus, output: Option<Value>, error: Option<String>| {
            HistoryEvent::ChildResolved {
                child_run_id: request.child_run_id.clone(),
                status,
                output,
                error,
            }
        };

        if self.token(&request.child_run_id).is_cancelled() {
            debug!("child cancelled before start");
            return resolved(RunStatus::Cancelled, None, None);
        }
        if self.depth >= MAX_CHILD_DEPTH {
            warn!(depth = self.depth, "child nesting too deep");
            return resolved(
                RunStatus::Failed,
                None,
                Some(format!("subworkflow nesting exceeds {} levels", MAX_CHILD_DEPTH)),
            );
        }
        let Some(definition) = self.catalog.get(&request.workflow_id) else {
            let error = SubstrateError::UnknownWorkflow(request.workflow_id.clone());
            warn!(error = %error, "child not started");
            return resolved(RunStatus::Failed, None, Some(error.to_string()));
        };

        let mut substrate = LocalSubstrate::new(self.catalog, self.actions)
            .with_order(self.order)
            .with_config(self.config.clone());
        substrate.depth = self.depth + 1;
        let mut executor = Executor::new(definition, substrate, InMemoryHistory::new(), self.config.clone());

        match executor.run(&request.child_run_id, request.input.clone()) {
            Ok(record) => {
                let error = record.failure.as_ref().map(|f| f.to_string());
                resolved(record.status, record.output, error)
            }
            Err(e) => {
                warn!(error = %e, "child run aborted");
                resolved(RunStatus::Failed, None, Some(e.to_string()))
            }
        }
    }
}

impl Substrate for LocalSubstrate<'_> {
    fn start_activity(&mut self, invocation: &ActionInvocation) -> Result<(), SubstrateError> {
        self.enqueue(&invocation.activity_id, Work::Activity(invocation.clone()));
        Ok(())
    }

    fn start_timer(&mut self, timer_id: &str, _delay_ms: u64) -> Result<(), SubstrateError> {
        if self.seen.insert(timer_id.to_string()) {
            self.timers.push_back(timer_id.to_string());
        }
        Ok(())
    }

    fn start_child(&mut self, request: &ChildRequest) -> Result<(), SubstrateError> {
        self.enqueue(&request.child_run_id, Work::Child(request.clone()));
        Ok(())
    }

    fn request_cancel(&mut self, activity_id: &str) -> Result<(), SubstrateError> {
        if let Some(token) = self.tokens.get(activity_id) {
            token.cancel();
        }
        Ok(())
    }

    fn cancel_child(&mut self, child_run_id: &str) -> Result<(), SubstrateError> {
        self.request_cancel(child_run_id)
    }

    fn next_event(&mut self) -> Result<Option<HistoryEvent>, SubstrateError> {
        let work = match self.order {
            DispatchOrder::Fifo => self.queue.pop_front(),
            DispatchOrder::Lifo => self.queue.pop_back(),
        };
        let event = match work {
            Some(Work::Activity(invocation)) => HistoryEvent::ActivityResolved {
                result: self.execute_activity(&invocation),
            },
            Some(Work::Child(request)) => self.execute_child(&request),
            None => match self.timers.pop_front() {
                Some(timer_id) => HistoryEvent::TimerFired { timer_id },
                None => return Ok(None),
            },
        };
        Ok(Some(event))
    }
}
