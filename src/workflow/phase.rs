use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::WorkflowError;

/// Granular phases of the trip-planning workflow.
///
/// Core path: `Init → ClarifyRequirements → PlanTools → ExecuteTools →
/// ValidatingResults → Synthesize → Done`. The remaining phases cover
/// clarification, tool failures and the optional availability, translation
/// and scheduling branches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    // Core workflow
    #[default]
    Init,
    ClarifyRequirements,
    PlanTools,
    ExecuteTools,
    Synthesize,
    Done,

    // Clarification and failure handling
    AwaitingUserClarification,
    HandlingToolError,
    ValidatingResults,
    RetryingTools,
    EscalatingError,

    // Optional branches
    CheckingAvailability,
    TranslatingContent,
    SchedulingEvent,
}

impl Phase {
    pub const ALL: [Phase; 14] = [
        Phase::Init,
        Phase::ClarifyRequirements,
        Phase::PlanTools,
        Phase::ExecuteTools,
        Phase::Synthesize,
        Phase::Done,
        Phase::AwaitingUserClarification,
        Phase::HandlingToolError,
        Phase::ValidatingResults,
        Phase::RetryingTools,
        Phase::EscalatingError,
        Phase::CheckingAvailability,
        Phase::TranslatingContent,
        Phase::SchedulingEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::ClarifyRequirements => "ClarifyRequirements",
            Self::PlanTools => "PlanTools",
            Self::ExecuteTools => "ExecuteTools",
            Self::Synthesize => "Synthesize",
            Self::Done => "Done",
            Self::AwaitingUserClarification => "AwaitingUserClarification",
            Self::HandlingToolError => "HandlingToolError",
            Self::ValidatingResults => "ValidatingResults",
            Self::RetryingTools => "RetryingTools",
            Self::EscalatingError => "EscalatingError",
            Self::CheckingAvailability => "CheckingAvailability",
            Self::TranslatingContent => "TranslatingContent",
            Self::SchedulingEvent => "SchedulingEvent",
        }
    }

    /// Successor used by `advance()` when no error or clarification is pending.
    ///
    /// `Done` has no automatic successor; returning to `Init` is only possible
    /// through an explicit reset. `EscalatingError` has none either, the
    /// caller moves it to `Done` directly.
    pub fn normal_successor(&self) -> Option<Phase> {
        match self {
            Self::Init => Some(Self::ClarifyRequirements),
            Self::ClarifyRequirements => Some(Self::PlanTools),
            Self::PlanTools => Some(Self::ExecuteTools),
            Self::ExecuteTools => Some(Self::ValidatingResults),
            Self::ValidatingResults => Some(Self::Synthesize),
            Self::Synthesize => Some(Self::Done),
            Self::RetryingTools => Some(Self::ExecuteTools),
            Self::AwaitingUserClarification => Some(Self::ClarifyRequirements),
            Self::CheckingAvailability => Some(Self::PlanTools),
            Self::TranslatingContent => Some(Self::Synthesize),
            Self::SchedulingEvent => Some(Self::Done),
            Self::HandlingToolError => Some(Self::RetryingTools),
            Self::Done | Self::EscalatingError => None,
        }
    }

    /// Explicit adjacency list for this phase.
    pub fn allowed_targets(&self) -> &'static [Phase] {
        use Phase::*;
        match self {
            Init => &[ClarifyRequirements],
            ClarifyRequirements => &[PlanTools, AwaitingUserClarification],
            PlanTools => &[ExecuteTools, CheckingAvailability],
            ExecuteTools => &[ValidatingResults, HandlingToolError, Synthesize],
            ValidatingResults => &[Synthesize, RetryingTools],
            Synthesize => &[Done, TranslatingContent],
            RetryingTools => &[ExecuteTools, EscalatingError],
            HandlingToolError => &[RetryingTools, EscalatingError],
            AwaitingUserClarification => &[ClarifyRequirements],
            CheckingAvailability => &[PlanTools, SchedulingEvent],
            TranslatingContent => &[Synthesize],
            SchedulingEvent => &[Done],
            EscalatingError => &[Done],
            Done => &[Init],
        }
    }

    /// Error and clarification phases are reachable from anywhere.
    pub fn is_escape_hatch(&self) -> bool {
        matches!(
            self,
            Self::HandlingToolError | Self::EscalatingError | Self::AwaitingUserClarification
        )
    }

    pub fn can_transition_to(&self, target: Phase) -> bool {
        if target.is_escape_hatch() {
            return true;
        }
        if *self == Self::Done && target == Self::Init {
            return true;
        }
        self.allowed_targets().contains(&target)
    }

    pub fn is_error_phase(&self) -> bool {
        matches!(
            self,
            Self::HandlingToolError | Self::RetryingTools | Self::EscalatingError
        )
    }

    /// Phases in which the workflow cannot make progress on its own.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            Self::AwaitingUserClarification | Self::EscalatingError | Self::Done
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .iter()
            .copied()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| WorkflowError::UnknownPhase(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_init() {
        assert_eq!(Phase::default(), Phase::Init);
    }

    #[test]
    fn test_string_identifiers_round_trip() {
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
            assert_eq!(phase.to_string(), phase.as_str());
        }
        assert!(matches!(
            "Finished".parse::<Phase>(),
            Err(WorkflowError::UnknownPhase(_))
        ));
    }

    #[test]
    fn test_serde_uses_exact_identifiers() {
        let json = serde_json::to_string(&Phase::AwaitingUserClarification).unwrap();
        assert_eq!(json, "\"AwaitingUserClarification\"");
        let back: Phase = serde_json::from_str("\"RetryingTools\"").unwrap();
        assert_eq!(back, Phase::RetryingTools);
    }

    #[test]
    fn test_normal_successor_is_always_an_allowed_move() {
        for phase in Phase::ALL {
            if let Some(next) = phase.normal_successor() {
                assert!(
                    phase.can_transition_to(next),
                    "{phase} -> {next} must be permitted"
                );
            }
        }
    }

    #[test]
    fn test_done_has_no_automatic_successor_but_allows_init() {
        assert_eq!(Phase::Done.normal_successor(), None);
        assert!(Phase::Done.can_transition_to(Phase::Init));
        assert!(!Phase::Synthesize.can_transition_to(Phase::Init));
    }

    #[test]
    fn test_escape_hatches_reachable_from_every_phase() {
        for phase in Phase::ALL {
            assert!(phase.can_transition_to(Phase::HandlingToolError));
            assert!(phase.can_transition_to(Phase::EscalatingError));
            assert!(phase.can_transition_to(Phase::AwaitingUserClarification));
        }
    }

    #[test]
    fn test_rejects_moves_outside_adjacency() {
        assert!(!Phase::Init.can_transition_to(Phase::Synthesize));
        assert!(!Phase::PlanTools.can_transition_to(Phase::Done));
        assert!(!Phase::RetryingTools.can_transition_to(Phase::RetryingTools));
        assert!(!Phase::TranslatingContent.can_transition_to(Phase::Done));
    }

    #[test]
    fn test_classification() {
        assert!(Phase::RetryingTools.is_error_phase());
        assert!(!Phase::AwaitingUserClarification.is_error_phase());
        assert!(Phase::Done.is_blocking());
        assert!(!Phase::HandlingToolError.is_blocking());
    }
}
