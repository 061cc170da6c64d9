use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use super::phase::Phase;

/// Free-form annotations attached to a transition or to the state.
pub type Metadata = Map<String, Value>;

/// Immutable record of one phase change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Append-only audit trail of phase changes for one session.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct TransitionLog {
    entries: Vec<Transition>,
}

impl TransitionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transition and return a reference to the stored entry.
    pub fn record(
        &mut self,
        from: Phase,
        to: Phase,
        reason: impl Into<String>,
        metadata: Metadata,
    ) -> &Transition {
        let record = Transition {
            from,
            to,
            timestamp: Utc::now(),
            reason: reason.into(),
            metadata,
        };

        info!(
            from = %record.from,
            to = %record.to,
            reason = %record.reason,
            sequence = self.entries.len(),
            "Workflow phase transition"
        );

        self.entries.push(record);
        &self.entries[self.entries.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&Transition> {
        self.entries.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[Transition] {
        &self.entries
    }
}
