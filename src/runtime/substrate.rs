//! Seams between the decider and the outside world.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::contract::{ActionInvocation, ChildRequest};
use super::error::SubstrateError;
use super::history::HistoryEvent;

/// Executes what the decider asks for and reports results as history events.
///
/// Commands are fire-and-forget; results come back through `next_event`.
/// Redelivery of a command with an id the substrate has already seen must be
/// tolerated.
pub trait Substrate {
    fn start_activity(&mut self, invocation: &ActionInvocation) -> Result<(), SubstrateError>;

    fn start_timer(&mut self, timer_id: &str, delay_ms: u64) -> Result<(), SubstrateError>;

    fn start_child(&mut self, request: &ChildRequest) -> Result<(), SubstrateError>;

    /// Cooperative: the activity may still succeed.
    fn request_cancel(&mut self, activity_id: &str) -> Result<(), SubstrateError>;

    fn cancel_child(&mut self, child_run_id: &str) -> Result<(), SubstrateError>;

    /// Next result event, or `None` when nothing is pending.
    fn next_event(&mut self) -> Result<Option<HistoryEvent>, SubstrateError>;
}

/// Durable, append-only run histories.
pub trait HistoryStore {
    fn append(&mut self, run_id: &str, event: HistoryEvent) -> Result<(), SubstrateError>;

    /// `None` for an unknown run.
    fn load(&self, run_id: &str) -> Result<Option<Vec<HistoryEvent>>, SubstrateError>;

    fn runs(&self) -> Vec<String>;
}

impl<H: HistoryStore + ?Sized> HistoryStore for &mut H {
    fn append(&mut self, run_id: &str, event: HistoryEvent) -> Result<(), SubstrateError> {
        (**self).append(run_id, event)
    }

    fn load(&self, run_id: &str) -> Result<Option<Vec<HistoryEvent>>, SubstrateError> {
        (**self).load(run_id)
    }

    fn runs(&self) -> Vec<String> {
        (**self).runs()
    }
}

/// History kept in memory; serializes to JSON so a run can be persisted and
/// replayed elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InMemoryHistory {
    runs: BTreeMap<String, Vec<HistoryEvent>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, SubstrateError> {
        serde_json::from_str(json).map_err(|e| SubstrateError::Store(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, SubstrateError> {
        serde_json::to_string_pretty(self).map_err(|e| SubstrateError::Store(e.to_string()))
    }

    /// Drop everything after the first `len` events of a run.
    pub fn truncate(&mut self, run_id: &str, len: usize) {
        if let Some(events) = self.runs.get_mut(run_id) {
            events.truncate(len);
        }
    }
}

impl HistoryStore for InMemoryHistory {
    fn append(&mut self, run_id: &str, event: HistoryEvent) -> Result<(), SubstrateError> {
        self.runs.entry(run_id.to_string()).or_default().push(event);
        Ok(())
    }

    fn load(&self, run_id: &str) -> Result<Option<Vec<HistoryEvent>>, SubstrateError> {
        Ok(self.runs.get(run_id).cloned())
    }

    fn runs(&self) -> Vec<String> {
        self.runs.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn history_survives_json() {
        let mut history = InMemoryHistory::new();
        history
            .append(
                "r1",
                HistoryEvent::RunStarted {
                    workflow_id: "wf".into(),
                    run_id: "r1".into(),
                    input: json!({"x": 1}),
                },
            )
            .unwrap();
        history.append("r1", HistoryEvent::CompensationRequested).unwrap();

        let restored = InMemoryHistory::from_json(&history.to_json().unwrap()).unwrap();
        assert_eq!(restored, history);
        assert_eq!(restored.runs(), vec!["r1".to_string()]);
        assert_eq!(restored.load("r1").unwrap().unwrap().len(), 2);
        assert!(restored.load("nope").unwrap().is_none());
    }
}
