//! Agent workflow controller
//!
//! A granular phase state machine that sequences requirement clarification,
//! tool planning, tool execution, result validation, error recovery with
//! bounded retries, and the hand-off to synthesis.
//!
//! # Architecture
//!
//! - **Phase**: the closed set of workflow phases plus the static
//!   progression and adjacency tables
//! - **Transition Log**: append-only audit trail of phase changes
//! - **Error Context**: the currently failing tool and its retry budget
//! - **Agent State**: the per-session aggregate and its transition rules
//! - **Workflow Controller**: the public operations surface
//!
//! The controller never performs I/O. Callers run tool collaborators and
//! feed outcomes back one at a time.

pub mod controller;
pub mod error;
pub mod error_context;
pub mod phase;
pub mod state;
pub mod transition;

pub use controller::{ErrorDetails, StateSummary, WorkflowController, LAST_CLARIFICATION_KEY};
pub use error::WorkflowError;
pub use error_context::{ErrorContext, ErrorKind, DEFAULT_MAX_RETRIES};
pub use phase::Phase;
pub use state::AgentState;
pub use transition::{Metadata, Transition, TransitionLog};
