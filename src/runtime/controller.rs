//! Fan-out expansion: which instances to start next, and when the node as a
//! whole has succeeded or failed under its success policy.

use serde_json::{Value, json};

use crate::ir::types::SuccessPolicy;
use crate::registry::ports::RESULTS_PORT;

use super::record::{ActionStatus, InstanceRecord};

/// Lowest not-started indices that fit under the concurrency bound.
pub fn next_indices(instances: &[InstanceRecord], max_concurrency: Option<u32>) -> Vec<usize> {
    let running = instances
        .iter()
        .filter(|i| i.status == ActionStatus::Running)
        .count();
    let limit = max_concurrency.map(|m| m as usize).unwrap_or(usize::MAX);
    let free = limit.saturating_sub(running);
    instances
        .iter()
        .filter(|i| i.status == ActionStatus::NotStarted)
        .take(free)
        .map(|i| i.index)
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum FanOutVerdict {
    Pending,
    Succeeded(Value),
    /// First failed index and its cause.
    Failed(Option<usize>, String),
}

pub fn verdict(instances: &[InstanceRecord], policy: SuccessPolicy) -> FanOutVerdict {
    let total = instances.len();
    let succeeded = instances
        .iter()
        .filter(|i| i.status == ActionStatus::Succeeded)
        .count();
    let remaining = instances.iter().filter(|i| !i.status.is_resolved()).count();
    let first_failure = instances
        .iter()
        .find(|i| i.status.is_resolved() && i.status != ActionStatus::Succeeded);

    let failed = |required: usize| {
        let cause = match first_failure {
            Some(f) => format!(
                "{} of {} elements succeeded, {} required; element {} failed: {}",
                succeeded,
                total,
                required,
                f.index,
                f.error.as_deref().unwrap_or("failed")
            ),
            None => format!(
                "{} of {} elements succeeded, {} required",
                succeeded, total, required
            ),
        };
        FanOutVerdict::Failed(first_failure.map(|f| f.index), cause)
    };

    match policy {
        SuccessPolicy::AllOrFail if first_failure.is_some() => failed(total),
        SuccessPolicy::AtLeast { min_successes } if succeeded + remaining < min_successes as usize => {
            failed(min_successes as usize)
        }
        _ if remaining == 0 => FanOutVerdict::Succeeded(aggregate(instances)),
        _ => FanOutVerdict::Pending,
    }
}

/// Per-element outputs in index order; unsuccessful slots are `null`.
pub fn aggregate(instances: &[InstanceRecord]) -> Value {
    let results: Vec<Value> = instances
        .iter()
        .map(|i| match (i.status, &i.output) {
            (ActionStatus::Succeeded, Some(out)) => out.clone(),
            _ => Value::Null,
        })
        .collect();
    json!({ RESULTS_PORT: results })
}
