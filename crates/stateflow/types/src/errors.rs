//! Error types for the workflow domain layer

use crate::{StateId, WorkflowTypeId};

/// Errors that can occur while building or mutating workflow domain objects
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow type not found: {0}")]
    UnknownWorkflow(WorkflowTypeId),

    #[error("State not found: {0}")]
    UnknownState(StateId),

    #[error("Duplicate state id: {0}")]
    DuplicateState(StateId),

    #[error("State '{state}' does not belong to workflow '{workflow}'")]
    ForeignState {
        state: StateId,
        workflow: WorkflowTypeId,
    },

    #[error("Workflow '{0}' has no states")]
    NoStates(WorkflowTypeId),

    #[error("Workflow '{0}' has no creation state")]
    NoCreationState(WorkflowTypeId),

    #[error("Workflow '{0}' has more than one creation state")]
    MultipleCreationStates(WorkflowTypeId),

    #[error("Transition already executed; its state fields are immutable")]
    AlreadyExecuted,

    #[error("Workflow validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for workflow domain operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
