use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use tracing::{debug, error};

use super::error::WorkflowError;
use super::error_context::{ErrorContext, DEFAULT_MAX_RETRIES};
use super::phase::Phase;
use super::transition::{Metadata, Transition, TransitionLog};
use crate::requirements::TravelRequirements;

/// Per-session workflow state.
///
/// Fields are only mutated through `WorkflowController`; outside the crate
/// the aggregate is read-only.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub(crate) phase: Phase,

    pub(crate) destination: Option<String>,
    pub(crate) dates: Option<String>,
    pub(crate) card: Option<String>,

    pub(crate) tools_called: IndexSet<String>,
    pub(crate) successful_tools: IndexSet<String>,
    pub(crate) failed_tools: IndexSet<String>,

    pub(crate) current_error: Option<ErrorContext>,
    pub(crate) clarification_needed: Option<String>,
    pub(crate) validation_results: IndexMap<String, bool>,
    pub(crate) metadata: Metadata,

    pub(crate) transition_history: TransitionLog,
    pub(crate) retry_budget: u32,

    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentState {
    pub fn new() -> Self {
        Self::with_retry_budget(DEFAULT_MAX_RETRIES)
    }

    /// Create a state whose error contexts allow `retry_budget` retries.
    pub fn with_retry_budget(retry_budget: u32) -> Self {
        let now = Utc::now();
        Self {
            phase: Phase::Init,
            destination: None,
            dates: None,
            card: None,
            tools_called: IndexSet::new(),
            successful_tools: IndexSet::new(),
            failed_tools: IndexSet::new(),
            current_error: None,
            clarification_needed: None,
            validation_results: IndexMap::new(),
            metadata: Metadata::new(),
            transition_history: TransitionLog::new(),
            retry_budget,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    pub fn dates(&self) -> Option<&str> {
        self.dates.as_deref()
    }

    pub fn card(&self) -> Option<&str> {
        self.card.as_deref()
    }

    pub fn tools_called(&self) -> &IndexSet<String> {
        &self.tools_called
    }

    pub fn successful_tools(&self) -> &IndexSet<String> {
        &self.successful_tools
    }

    pub fn failed_tools(&self) -> &IndexSet<String> {
        &self.failed_tools
    }

    pub fn current_error(&self) -> Option<&ErrorContext> {
        self.current_error.as_ref()
    }

    pub fn clarification_needed(&self) -> Option<&str> {
        self.clarification_needed.as_deref()
    }

    pub fn validation_results(&self) -> &IndexMap<String, bool> {
        &self.validation_results
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn transition_history(&self) -> &[Transition] {
        self.transition_history.as_slice()
    }

    pub fn retry_budget(&self) -> u32 {
        self.retry_budget
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub(crate) fn set_requirements(&mut self, requirements: &TravelRequirements) {
        self.destination = requirements.destination.clone();
        self.dates = requirements.dates.clone();
        self.card = requirements.card.clone();
        self.touch();
    }

    /// Next phase according to the priority rule: retryable error, exhausted
    /// error, pending clarification, then the normal progression table.
    pub fn resolve_next_phase(&self) -> Option<Phase> {
        match &self.current_error {
            Some(err) if err.can_retry() => return Some(Phase::RetryingTools),
            Some(_) => return Some(Phase::EscalatingError),
            None => {}
        }

        if self.clarification_needed.is_some() {
            return Some(Phase::AwaitingUserClarification);
        }

        self.phase.normal_successor()
    }

    pub fn can_transition_to(&self, new_phase: Phase) -> bool {
        self.phase.can_transition_to(new_phase)
    }

    /// `Err(InvalidTransition)` when `new_phase` is not reachable from here.
    pub(crate) fn check_transition(&self, new_phase: Phase) -> Result<(), WorkflowError> {
        if self.can_transition_to(new_phase) {
            return Ok(());
        }
        error!(
            from = %self.phase,
            to = %new_phase,
            "Rejected invalid workflow transition"
        );
        Err(WorkflowError::InvalidTransition {
            from: self.phase,
            to: new_phase,
        })
    }

    /// Validate and execute a phase change.
    ///
    /// On an invalid move nothing is mutated and nothing is logged.
    pub(crate) fn transition_to(
        &mut self,
        new_phase: Phase,
        reason: impl Into<String>,
        metadata: Metadata,
    ) -> Result<(), WorkflowError> {
        self.check_transition(new_phase)?;

        self.transition_history
            .record(self.phase, new_phase, reason, metadata);
        self.phase = new_phase;
        self.touch();
        self.apply_entry_effects(new_phase);

        Ok(())
    }

    fn apply_entry_effects(&mut self, entered: Phase) {
        match entered {
            Phase::ClarifyRequirements => {
                if self.clarification_needed.take().is_some() {
                    debug!("Cleared pending clarification on entering ClarifyRequirements");
                }
            }
            Phase::ExecuteTools => {
                if let Some(cleared) = self.current_error.take() {
                    debug!(
                        failed_tool = ?cleared.failed_tool,
                        retry_count = cleared.retry_count,
                        "Cleared error context on entering ExecuteTools"
                    );
                }
            }
            _ => {}
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Restore initial values. The transition history and retry budget survive.
    pub(crate) fn clear_for_reset(&mut self) {
        self.phase = Phase::Init;
        self.destination = None;
        self.dates = None;
        self.card = None;
        self.tools_called.clear();
        self.successful_tools.clear();
        self.failed_tools.clear();
        self.current_error = None;
        self.clarification_needed = None;
        self.validation_results.clear();
        self.metadata.clear();
        self.touch();
    }
}
