use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::error::WorkflowError;
use super::error_context::ErrorContext;
use super::phase::Phase;
use super::state::AgentState;
use super::transition::{Metadata, Transition};
use crate::requirements::TravelRequirements;

/// Metadata key under which the last clarification answer is stored.
pub const LAST_CLARIFICATION_KEY: &str = "last_clarification";

/// Public entry point to the workflow.
///
/// Owns the `AgentState` of one session. All operations are synchronous and
/// perform no I/O; the caller runs the tool collaborators and reports their
/// outcomes back here one at a time. Not meant to be shared across tasks
/// without external synchronisation.
#[derive(Debug, Clone, Default)]
pub struct WorkflowController {
    state: AgentState,
}

/// Error detail block of a `StateSummary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetails {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub failed_tool: Option<String>,
    pub retry_count: u32,
    pub can_retry: bool,
}

impl From<&ErrorContext> for ErrorDetails {
    fn from(ctx: &ErrorContext) -> Self {
        Self {
            kind: ctx.kind.clone(),
            message: ctx.message.clone(),
            failed_tool: ctx.failed_tool.clone(),
            retry_count: ctx.retry_count,
            can_retry: ctx.can_retry(),
        }
    }
}

/// Read-only snapshot of the controller state.
#[derive(Debug, Clone, Serialize)]
pub struct StateSummary {
    pub current_phase: Phase,
    pub destination: Option<String>,
    pub dates: Option<String>,
    pub card: Option<String>,
    pub tools_called: Vec<String>,
    pub successful_tools: Vec<String>,
    pub failed_tools: Vec<String>,
    pub has_error: bool,
    pub error_details: Option<ErrorDetails>,
    pub needs_clarification: bool,
    pub clarification_question: Option<String>,
    pub validation_status: indexmap::IndexMap<String, bool>,
    pub transition_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_budget(retry_budget: u32) -> Self {
        Self {
            state: AgentState::with_retry_budget(retry_budget),
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn current_error(&self) -> Option<&ErrorContext> {
        self.state.current_error()
    }

    pub fn set_requirements(&mut self, requirements: &TravelRequirements) {
        debug!(
            destination = ?requirements.destination,
            dates = ?requirements.dates,
            card = ?requirements.card,
            "Recording travel requirements"
        );
        self.state.set_requirements(requirements);
    }

    /// Move to the phase chosen by the priority rule.
    ///
    /// Returns the phase entered, or `None` when the current phase has no
    /// successor (the call is then a no-op).
    pub fn advance(
        &mut self,
        reason: impl Into<String>,
        metadata: Metadata,
    ) -> Result<Option<Phase>, WorkflowError> {
        let Some(next) = self.state.resolve_next_phase() else {
            debug!(phase = %self.state.phase(), "No successor phase, advance is a no-op");
            return Ok(None);
        };

        self.state.transition_to(next, reason, metadata)?;
        Ok(Some(next))
    }

    pub fn advance_default(&mut self) -> Result<Option<Phase>, WorkflowError> {
        self.advance("Normal progression", Metadata::new())
    }

    /// Direct validated move, bypassing the priority rule.
    pub fn transition_to(
        &mut self,
        phase: Phase,
        reason: impl Into<String>,
        metadata: Metadata,
    ) -> Result<(), WorkflowError> {
        self.state.transition_to(phase, reason, metadata)
    }

    /// Record a planned tool without marking it successful.
    pub fn record_tool_called(&mut self, tool: &str) {
        if self.state.tools_called.insert(tool.to_string()) {
            self.state.touch();
        }
    }

    pub fn mark_tool_success(&mut self, tool: &str) {
        let called = self.state.tools_called.insert(tool.to_string());
        let succeeded = self.state.successful_tools.insert(tool.to_string());
        if called || succeeded {
            self.state.touch();
        }
        debug!(tool = %tool, "Tool succeeded");
    }

    /// Absorb a tool failure into the error context and enter `HandlingToolError`.
    ///
    /// A repeated failure of the tool already being tracked counts as a retry;
    /// any other tool starts a fresh context.
    pub fn handle_tool_error(
        &mut self,
        tool: &str,
        message: &str,
        kind: &str,
    ) -> Result<(), WorkflowError> {
        let same_tool = self
            .state
            .current_error
            .as_ref()
            .is_some_and(|ctx| ctx.targets(tool));

        if same_tool {
            if let Some(ctx) = self.state.current_error.as_mut() {
                ctx.record_retry();
                warn!(
                    tool = %tool,
                    retry_count = ctx.retry_count,
                    max_retries = ctx.max_retries,
                    error = %message,
                    "Tool failed again"
                );
            }
        } else {
            warn!(tool = %tool, error = %message, kind = %kind, "Tool failed");
            self.state.current_error = Some(
                ErrorContext::new(kind, message, Some(tool.to_string()))
                    .with_max_retries(self.state.retry_budget),
            );
        }

        self.state.failed_tools.insert(tool.to_string());

        let mut metadata = Metadata::new();
        metadata.insert("tool".to_string(), json!(tool));
        metadata.insert("error".to_string(), json!(message));
        self.state.transition_to(
            Phase::HandlingToolError,
            format!("Tool '{tool}' failed: {message}"),
            metadata,
        )
    }

    pub fn request_clarification(&mut self, question: &str) -> Result<(), WorkflowError> {
        info!(question = %question, "Requesting clarification from user");
        self.state.clarification_needed = Some(question.to_string());

        let mut metadata = Metadata::new();
        metadata.insert("question".to_string(), json!(question));
        self.state
            .transition_to(Phase::AwaitingUserClarification, "Need user clarification", metadata)
    }

    pub fn provide_clarification(&mut self, answer: &str) -> Result<(), WorkflowError> {
        self.state.check_transition(Phase::ClarifyRequirements)?;

        self.state
            .metadata
            .insert(LAST_CLARIFICATION_KEY.to_string(), json!(answer));
        self.state.clarification_needed = None;

        let mut metadata = Metadata::new();
        metadata.insert("response".to_string(), json!(answer));
        self.state
            .transition_to(Phase::ClarifyRequirements, "User provided clarification", metadata)
    }

    /// Gate entry into synthesis on a set of named checks.
    ///
    /// All true moves to `Synthesize` and returns `true`; otherwise the
    /// failing check names are recorded and the workflow moves to
    /// `RetryingTools`.
    pub fn validate_tool_results<I, K>(&mut self, checks: I) -> Result<bool, WorkflowError>
    where
        I: IntoIterator<Item = (K, bool)>,
        K: Into<String>,
    {
        let checks: indexmap::IndexMap<String, bool> =
            checks.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let failed: Vec<String> = checks
            .iter()
            .filter(|(_, passed)| !**passed)
            .map(|(name, _)| name.clone())
            .collect();

        let target = if failed.is_empty() {
            Phase::Synthesize
        } else {
            Phase::RetryingTools
        };
        self.state.check_transition(target)?;

        self.state.validation_results = checks.clone();

        if failed.is_empty() {
            let mut metadata = Metadata::new();
            metadata.insert("validations".to_string(), json!(checks));
            self.state
                .transition_to(Phase::Synthesize, "All validations passed", metadata)?;
            Ok(true)
        } else {
            warn!(failed_checks = ?failed, "Tool result validation failed");
            let reason = format!("Validation failed: {}", failed.join(", "));
            let mut metadata = Metadata::new();
            metadata.insert("failed_checks".to_string(), json!(failed));
            self.state
                .transition_to(Phase::RetryingTools, reason, metadata)?;
            Ok(false)
        }
    }

    /// Restore initial values, keeping the transition history.
    pub fn reset(&mut self) {
        let from = self.state.phase();
        self.state.clear_for_reset();
        self.state
            .transition_history
            .record(from, Phase::Init, "Manual reset", Metadata::new());
    }

    pub fn get_state_summary(&self) -> StateSummary {
        let state = &self.state;
        StateSummary {
            current_phase: state.phase(),
            destination: state.destination.clone(),
            dates: state.dates.clone(),
            card: state.card.clone(),
            tools_called: state.tools_called.iter().cloned().collect(),
            successful_tools: state.successful_tools.iter().cloned().collect(),
            failed_tools: state.failed_tools.iter().cloned().collect(),
            has_error: state.current_error.is_some(),
            error_details: state.current_error.as_ref().map(ErrorDetails::from),
            needs_clarification: state.clarification_needed.is_some(),
            clarification_question: state.clarification_needed.clone(),
            validation_status: state.validation_results.clone(),
            transition_count: state.transition_history.len(),
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }

    pub fn get_transition_history(&self) -> &[Transition] {
        self.state.transition_history()
    }

    pub fn is_in_error_state(&self) -> bool {
        self.state.phase().is_error_phase()
    }

    pub fn is_awaiting_user(&self) -> bool {
        self.state.phase() == Phase::AwaitingUserClarification
    }

    pub fn can_proceed(&self) -> bool {
        !self.state.phase().is_blocking()
    }

    pub fn last_clarification(&self) -> Option<&str> {
        self.state
            .metadata_value(LAST_CLARIFICATION_KEY)
            .and_then(Value::as_str)
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }
}
