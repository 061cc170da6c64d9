use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Retry attempts permitted per failing tool before escalation.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Well-known values for `ErrorContext::kind`.
pub struct ErrorKind;

impl ErrorKind {
    pub const TOOL_EXECUTION: &'static str = "ToolExecutionError";
    pub const VALIDATION: &'static str = "ValidationError";
    pub const TIMEOUT: &'static str = "TimeoutError";
}

/// The currently failing tool and its retry budget.
///
/// `retry_count` is scoped to `failed_tool`: a failure of a different tool
/// replaces the context instead of accumulating into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub kind: String,
    pub message: String,
    pub failed_tool: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    pub fn new(
        kind: impl Into<String>,
        message: impl Into<String>,
        failed_tool: Option<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            failed_tool,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            timestamp: Utc::now(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn remaining_retries(&self) -> u32 {
        self.max_retries.saturating_sub(self.retry_count)
    }

    /// Whether this context tracks failures of `tool`.
    pub fn targets(&self, tool: &str) -> bool {
        self.failed_tool.as_deref() == Some(tool)
    }

    /// Count another failure of the same tool.
    ///
    /// Kind, message and timestamp stay those of the first failure.
    pub(crate) fn record_retry(&mut self) {
        self.retry_count += 1;
    }
}
