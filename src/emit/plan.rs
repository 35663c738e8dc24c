//! Human-readable rendering of a workflow definition.

use crate::ir::types::{Backoff, ConditionIR, FanOutMode, SuccessPolicy};
use crate::registry::PortSchema;

use super::document::{ActionCall, Construct, StateDef, WorkflowDefinition};
use super::writer::PlanWriter;

pub fn render_plan(def: &WorkflowDefinition) -> String {
    let mut w = PlanWriter::new();

    w.line(&format!("workflow {} v{} ({})", def.id, def.version, def.name));
    w.line(&format!("inputs: {}", ports(&def.input_contract)));
    w.line(&format!("start: {}", def.start_at.join(", ")));
    w.blank();

    w.section("states:");
    for state in &def.states {
        render_state(&mut w, state);
    }
    w.dedent();

    if !def.output.is_empty() {
        w.blank();
        w.section("outputs:");
        for field in &def.output {
            w.line(&format!("{} <- {}", field.name, field.value.render()));
        }
        w.dedent();
    }

    w.finish()
}

fn render_state(w: &mut PlanWriter, state: &StateDef) {
    let exec = &state.execution;
    w.section(&format!(
        "{} [{}] runtime={} queue={} timeout={}ms",
        state.name,
        describe(&state.construct),
        exec.runtime,
        exec.task_queue,
        exec.timeout_ms
    ));

    match &state.construct {
        Construct::Task { call } | Construct::Retry { call, .. } => render_call(w, call),
        Construct::FanOut { items, call, .. } => {
            w.line(&format!("items <- {}", items.render()));
            render_call(w, call);
        }
        Construct::Choice { conditions, .. } => {
            for c in conditions {
                w.line(&format!("if {}", condition(c)));
            }
        }
        Construct::ChildWorkflow { input, .. } => {
            for m in input {
                w.line(&format!("in {} <- {}", m.port, m.value.render()));
            }
        }
    }

    if let Some(comp) = &state.compensation {
        w.line(&format!(
            "compensate: {} timeout={}ms",
            comp.call.action, comp.timeout_ms
        ));
    }
    for t in &state.transitions {
        match t.when {
            Some(branch) => w.line(&format!("when {} -> {}", branch, t.to)),
            None => w.line(&format!("-> {}", t.to)),
        }
    }
    w.dedent();
}

fn render_call(w: &mut PlanWriter, call: &ActionCall) {
    for m in &call.input {
        w.line(&format!("in {} <- {}", m.port, m.value.render()));
    }
}

fn describe(construct: &Construct) -> String {
    match construct {
        Construct::Task { call } => format!("task {}", call.action),
        Construct::FanOut {
            mode,
            max_concurrency,
            success_policy,
            call,
            ..
        } => {
            let mode = match mode {
                FanOutMode::Foreach => "foreach",
                FanOutMode::Map => "map",
            };
            let limit = max_concurrency
                .map(|n| format!(" max={}", n))
                .unwrap_or_default();
            let policy = match success_policy {
                SuccessPolicy::AllOrFail => "allOrFail".to_string(),
                SuccessPolicy::AtLeast { min_successes } => format!("atLeast {}", min_successes),
            };
            format!("{} {}{} {}", mode, call.action, limit, policy)
        }
        Construct::Retry { call, policy } => {
            let backoff = match policy.backoff {
                Backoff::None => "none".to_string(),
                Backoff::Fixed { delay_ms } => format!("fixed {}ms", delay_ms),
                Backoff::Exponential {
                    initial_ms,
                    factor,
                    max_ms,
                } => format!("exponential {}ms x{} max {}ms", initial_ms, factor, max_ms),
            };
            format!(
                "retry {} attempts={} backoff={}",
                call.action, policy.max_attempts, backoff
            )
        }
        Construct::Choice { combine_with, .. } => format!("choice {:?}", combine_with).to_lowercase(),
        Construct::ChildWorkflow { workflow_id, .. } => format!("child {}", workflow_id),
    }
}

fn condition(c: &ConditionIR) -> String {
    let op = serde_json::to_value(c.operator)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    match &c.value {
        Some(v) => format!("{} {} {}", c.field.render(), op, v.render()),
        None => format!("{} {}", c.field.render(), op),
    }
}

fn ports(ports: &[PortSchema]) -> String {
    if ports.is_empty() {
        return "-".into();
    }
    ports
        .iter()
        .map(|p| {
            let marker = if p.required { "" } else { "?" };
            format!("{}{}: {}", p.name, marker, p.value_type)
        })
        .collect::<Vec<_>>()
        .join(", ")
}
