use super::record::RunStatus;

/// Failures of the execution layer itself. A workflow that fails (an action
/// error, a contract mismatch) is not an error here; it is a run status.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("unknown run '{0}'")]
    UnknownRun(String),

    #[error("run '{0}' already exists")]
    RunExists(String),

    #[error("invalid workflow input: {0}")]
    InvalidInput(String),

    #[error("cannot {operation} run '{run_id}' in status {status}")]
    InvalidState {
        run_id: String,
        status: RunStatus,
        operation: &'static str,
    },

    #[error("corrupt history for run '{run_id}': {reason}")]
    CorruptHistory { run_id: String, reason: String },

    #[error(transparent)]
    Substrate(#[from] SubstrateError),

    #[error("run '{0}' exceeded the step limit of {1}")]
    StepLimit(String, usize),

    #[error("run '{0}' is waiting on work the substrate will never deliver")]
    Stalled(String),
}

/// Failures raised by a substrate or history store.
#[derive(Debug, thiserror::Error)]
pub enum SubstrateError {
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),

    #[error("history store error: {0}")]
    Store(String),

    #[error("child run '{child_run_id}' could not start: {reason}")]
    Child { child_run_id: String, reason: String },
}
