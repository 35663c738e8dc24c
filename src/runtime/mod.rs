//! Saga runtime: executes emitted workflow definitions.
//!
//! `decider` is pure: history in, record and commands out. `executor` owns
//! the effects and talks to a [`Substrate`] and a [`HistoryStore`].
//! `local` is an in-process substrate used by the engine and tests.

pub mod binding;
pub mod catalog;
pub mod condition;
pub mod contract;
pub mod controller;
pub mod decider;
pub mod error;
pub mod executor;
pub mod history;
pub mod local;
pub mod record;
pub mod saga;
pub mod substrate;
pub mod telemetry;

pub use catalog::WorkflowCatalog;
pub use contract::{ActionInvocation, ActionResult, ChildRequest, ResultStatus};
pub use decider::{Decision, decide};
pub use error::{RuntimeError, SubstrateError};
pub use executor::{Executor, RunTrace};
pub use history::{Command, HistoryEvent};
pub use local::{ActionContext, ActionHandler, ActionRegistry, DispatchOrder, LocalSubstrate};
pub use record::{ActionStatus, Failure, FailureKind, RunRecord, RunStatus};
pub use substrate::{HistoryStore, InMemoryHistory, Substrate};
