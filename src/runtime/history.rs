//! Durable run history: commands the decider issued and results it received.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::contract::{ActionInvocation, ActionResult, ChildRequest};
use super::record::RunStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    ScheduleActivity {
        invocation: ActionInvocation,
    },
    StartTimer {
        timer_id: String,
        node_id: String,
        delay_ms: u64,
    },
    StartChild {
        request: ChildRequest,
    },
    /// Cooperative cancel of an in-flight forward activity.
    RequestCancel {
        cancel_id: String,
        activity_id: String,
    },
    CancelChild {
        cancel_id: String,
        child_run_id: String,
    },
    CompleteRun {
        close_id: String,
        status: RunStatus,
        #[serde(default)]
        output: Option<Value>,
    },
}

impl Command {
    /// Deterministic command id, unique within a run.
    pub fn id(&self) -> &str {
        match self {
            Command::ScheduleActivity { invocation } => &invocation.activity_id,
            Command::StartTimer { timer_id, .. } => timer_id,
            Command::StartChild { request } => &request.child_run_id,
            Command::RequestCancel { cancel_id, .. } | Command::CancelChild { cancel_id, .. } => {
                cancel_id
            }
            Command::CompleteRun { close_id, .. } => close_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HistoryEvent {
    RunStarted {
        workflow_id: String,
        run_id: String,
        input: Value,
    },
    CommandIssued {
        command: Command,
    },
    ActivityResolved {
        result: ActionResult,
    },
    TimerFired {
        timer_id: String,
    },
    ChildResolved {
        child_run_id: String,
        status: RunStatus,
        #[serde(default)]
        output: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    CancelRequested {
        #[serde(default)]
        reason: Option<String>,
    },
    CompensationRequested,
}

impl HistoryEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            HistoryEvent::RunStarted { .. } => "runStarted",
            HistoryEvent::CommandIssued { .. } => "commandIssued",
            HistoryEvent::ActivityResolved { .. } => "activityResolved",
            HistoryEvent::TimerFired { .. } => "timerFired",
            HistoryEvent::ChildResolved { .. } => "childResolved",
            HistoryEvent::CancelRequested { .. } => "cancelRequested",
            HistoryEvent::CompensationRequested => "compensationRequested",
        }
    }
}

// Derived ids. Every id is a function of node id, expansion index, attempt
// and purpose so a replayed decision reproduces it exactly.

pub fn forward_activity_id(node_id: &str, index: Option<usize>, attempt: u32) -> String {
    let mut id = format!("fwd:{}", node_id);
    if let Some(i) = index {
        id.push_str(&format!("#{}", i));
    }
    if attempt > 1 {
        id.push_str(&format!("@{}", attempt));
    }
    id
}

pub fn compensation_activity_id(node_id: &str, index: Option<usize>) -> String {
    match index {
        Some(i) => format!("cmp:{}#{}", node_id, i),
        None => format!("cmp:{}", node_id),
    }
}

pub fn timer_id(node_id: &str, attempt: u32) -> String {
    format!("timer:{}@{}", node_id, attempt)
}

pub fn child_run_id(run_id: &str, node_id: &str) -> String {
    format!("{}/{}", run_id, node_id)
}

pub fn cancel_id(target: &str) -> String {
    format!("cancel:{}", target)
}

pub fn close_id(status: RunStatus) -> String {
    format!("close:{}", status.to_string().to_lowercase())
}
