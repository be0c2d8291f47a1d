//! Error types for the execution engine
//!
//! Most failure modes in this engine are soft: they resolve to "no state
//! change" plus a log entry, per the batch-friendly propagation policy.
//! The variants here are the hard failures only.

use stateflow_store::StoreError;
use stateflow_types::{WorkflowError, WorkflowTypeId};

/// Hard errors surfaced to the immediate caller
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The history/schedule store failed to write. Losing a state change
    /// silently is unacceptable, so this always propagates.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    /// Caller named a workflow type that was never registered
    #[error("unknown workflow type: {0}")]
    UnknownWorkflow(WorkflowTypeId),

    /// The entity adapter failed while writing the workflow field
    #[error("entity adapter failure: {0}")]
    Adapter(String),

    #[error(transparent)]
    Domain(#[from] WorkflowError),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
