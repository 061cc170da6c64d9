// Travel Concierge Library - workflow control for a tool-using travel agent
// This exposes the core components for testing and integration

pub mod collaborators;
pub mod config;
pub mod requirements;
pub mod session;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use collaborators::memory::{MemoryEntry, MemoryEvent, MemoryRole, ShortTermMemory};
pub use collaborators::{
    is_usable_result, MemoryStore, SynthesisError, Synthesizer, ToolCollaborator, ToolError,
    ToolKind, ToolRegistry, TripPlan,
};
pub use config::{
    config, init_config, ConciergeConfig, MemoryConfig, ObservabilityConfig, WorkflowConfig,
};
pub use requirements::{RequirementExtractor, TravelRequirements};
pub use session::{SessionError, SessionOutcome, WorkflowSession};
pub use telemetry::{create_session_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use workflow::{
    AgentState, ErrorContext, ErrorDetails, ErrorKind, Phase, StateSummary, Transition,
    WorkflowController, WorkflowError,
};
