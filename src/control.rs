//! Control surface: `validate`, `plan`, and an [`Engine`] that runs compiled
//! workflows in process (`run`, `trace`, `replay`, `compensate`, `stop`).

use serde_json::Value;

use crate::config::{CompilerConfig, ExecutorConfig};
use crate::emit::{CompilationInvariantViolation, EmitOutput, WorkflowDefinition, emit};
use crate::error::{CompilerError, partition};
use crate::lower::lower;
use crate::parse::parse_and_build;
use crate::registry::{Registry, WorkflowSignature};
use crate::runtime::{
    ActionRegistry, DispatchOrder, Executor, HistoryEvent, HistoryStore, InMemoryHistory,
    LocalSubstrate, RunRecord, RunTrace, RuntimeError, SubstrateError, WorkflowCatalog, decide,
};
use crate::validate::validate_graph;

/// Findings of a validation pass, split by severity.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ValidationReport {
    pub errors: Vec<CompilerError>,
    pub warnings: Vec<CompilerError>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parse and validate a graph document without lowering it.
pub fn validate(document_json: &str, registry: &Registry, config: &CompilerConfig) -> ValidationReport {
    let (doc, graph) = match parse_and_build(document_json) {
        Ok(parsed) => parsed,
        Err(errors) => {
            return ValidationReport {
                errors,
                warnings: Vec::new(),
            };
        }
    };
    let (errors, warnings) = partition(validate_graph(&doc, &graph, registry, config));
    ValidationReport { errors, warnings }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("compilation failed: {}", summarize(.0))]
    Compile(Vec<CompilerError>),
    #[error(transparent)]
    Invariant(#[from] CompilationInvariantViolation),
}

fn summarize(errors: &[CompilerError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A compiled workflow and the warnings its validation produced.
#[derive(Debug, Clone)]
pub struct Plan {
    pub output: EmitOutput,
    pub warnings: Vec<CompilerError>,
}

/// Full pipeline: parse → validate → lower → emit.
pub fn plan(document_json: &str, registry: &Registry, config: &CompilerConfig) -> Result<Plan, PlanError> {
    // 1. Parse + control graph
    let (doc, graph) = parse_and_build(document_json).map_err(PlanError::Compile)?;

    // 2. Graph validation
    let (errors, warnings) = partition(validate_graph(&doc, &graph, registry, config));
    if !errors.is_empty() {
        return Err(PlanError::Compile(errors));
    }

    // 3. Lower to IR
    let ir = lower(&doc, &graph, registry, config).map_err(PlanError::Compile)?;

    // 4. Emit (re-checks IR invariants)
    let output = emit(&ir, config)?;
    Ok(Plan { output, warnings })
}

/// Compiles workflows into a catalog and runs them on the local substrate.
#[derive(Debug)]
pub struct Engine {
    registry: Registry,
    compiler: CompilerConfig,
    executor: ExecutorConfig,
    order: DispatchOrder,
    catalog: WorkflowCatalog,
    actions: ActionRegistry,
    history: InMemoryHistory,
}

impl Engine {
    pub fn new(registry: Registry, actions: ActionRegistry) -> Self {
        Engine {
            registry,
            compiler: CompilerConfig::default(),
            executor: ExecutorConfig::default(),
            order: DispatchOrder::default(),
            catalog: WorkflowCatalog::new(),
            actions,
            history: InMemoryHistory::new(),
        }
    }

    pub fn with_compiler_config(mut self, config: CompilerConfig) -> Self {
        self.compiler = config;
        self
    }

    pub fn with_executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor = config;
        self
    }

    pub fn with_dispatch_order(mut self, order: DispatchOrder) -> Self {
        self.order = order;
        self
    }

    /// Replace the stored histories, e.g. with ones loaded from JSON.
    pub fn with_history(mut self, history: InMemoryHistory) -> Self {
        self.history = history;
        self
    }

    pub fn history(&self) -> &InMemoryHistory {
        &self.history
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    /// Validate against the engine's registry, which includes every workflow
    /// deployed so far.
    pub fn validate(&self, document_json: &str) -> ValidationReport {
        validate(document_json, &self.registry, &self.compiler)
    }

    /// Compile a document and add it to the catalog. Later documents may use
    /// it as a subworkflow.
    pub fn deploy(&mut self, document_json: &str) -> Result<Plan, PlanError> {
        let plan = plan(document_json, &self.registry, &self.compiler)?;
        self.register(plan.output.definition.clone());
        Ok(plan)
    }

    /// Add an already compiled definition.
    pub fn register(&mut self, definition: WorkflowDefinition) {
        self.registry.workflows.retain(|w| w.id != definition.id);
        self.registry.workflows.push(WorkflowSignature {
            id: definition.id.clone(),
            inputs: definition.input_contract.clone(),
            outputs: definition.output_contract.clone(),
        });
        self.catalog.register(definition);
    }

    pub fn run(&mut self, workflow_id: &str, run_id: &str, input: Value) -> Result<RunRecord, RuntimeError> {
        let definition = self
            .catalog
            .get(workflow_id)
            .ok_or_else(|| SubstrateError::UnknownWorkflow(workflow_id.to_string()))?;
        let substrate = local_substrate(&self.catalog, &self.actions, self.order, &self.executor);
        Executor::new(definition, substrate, &mut self.history, self.executor.clone()).run(run_id, input)
    }

    /// Start a run and dispatch its first commands without driving it. The
    /// run continues on `replay`, `stop` or `compensate`.
    pub fn start(&mut self, workflow_id: &str, run_id: &str, input: Value) -> Result<RunRecord, RuntimeError> {
        let definition = self
            .catalog
            .get(workflow_id)
            .ok_or_else(|| SubstrateError::UnknownWorkflow(workflow_id.to_string()))?;
        let substrate = local_substrate(&self.catalog, &self.actions, self.order, &self.executor);
        Executor::new(definition, substrate, &mut self.history, self.executor.clone()).start(run_id, input)
    }

    pub fn trace(&self, run_id: &str) -> Result<RunTrace, RuntimeError> {
        let definition = definition_for_run(&self.catalog, &self.history, run_id)?;
        let history = self
            .history
            .load(run_id)?
            .ok_or_else(|| RuntimeError::UnknownRun(run_id.to_string()))?;
        let record = decide(definition, &history)?.record;
        Ok(RunTrace { record, history })
    }

    /// Resume a run from stored history; recorded results are reused, only
    /// unresolved work is dispatched again.
    pub fn replay(&mut self, run_id: &str) -> Result<RunRecord, RuntimeError> {
        let definition = definition_for_run(&self.catalog, &self.history, run_id)?;
        let substrate = local_substrate(&self.catalog, &self.actions, self.order, &self.executor);
        Executor::new(definition, substrate, &mut self.history, self.executor.clone()).replay(run_id)
    }

    pub fn compensate(&mut self, run_id: &str) -> Result<RunRecord, RuntimeError> {
        let definition = definition_for_run(&self.catalog, &self.history, run_id)?;
        let substrate = local_substrate(&self.catalog, &self.actions, self.order, &self.executor);
        Executor::new(definition, substrate, &mut self.history, self.executor.clone()).compensate(run_id)
    }

    pub fn stop(&mut self, run_id: &str, reason: Option<String>) -> Result<RunRecord, RuntimeError> {
        let definition = definition_for_run(&self.catalog, &self.history, run_id)?;
        let substrate = local_substrate(&self.catalog, &self.actions, self.order, &self.executor);
        Executor::new(definition, substrate, &mut self.history, self.executor.clone()).stop(run_id, reason)
    }
}

fn local_substrate<'a>(
    catalog: &'a WorkflowCatalog,
    actions: &'a ActionRegistry,
    order: DispatchOrder,
    config: &ExecutorConfig,
) -> LocalSubstrate<'a> {
    LocalSubstrate::new(catalog, actions)
        .with_order(order)
        .with_config(config.clone())
}

/// The definition a stored run was started with.
fn definition_for_run<'c>(
    catalog: &'c WorkflowCatalog,
    history: &InMemoryHistory,
    run_id: &str,
) -> Result<&'c WorkflowDefinition, RuntimeError> {
    let events = history
        .load(run_id)?
        .ok_or_else(|| RuntimeError::UnknownRun(run_id.to_string()))?;
    let Some(HistoryEvent::RunStarted { workflow_id, .. }) = events.first() else {
        return Err(RuntimeError::CorruptHistory {
            run_id: run_id.to_string(),
            reason: "history does not begin with runStarted".into(),
        });
    };
    catalog
        .get(workflow_id)
        .ok_or_else(|| SubstrateError::UnknownWorkflow(workflow_id.clone()).into())
}
