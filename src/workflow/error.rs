use thiserror::Error;

use super::phase::Phase;

/// Errors raised by the workflow controller.
///
/// Tool failures, validation failures and clarification requests are not
/// errors here; they are absorbed into the controller state. Only caller
/// logic defects surface as `WorkflowError`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("Unknown phase: {0}")]
    UnknownPhase(String),
}
