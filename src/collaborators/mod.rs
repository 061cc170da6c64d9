//! Contracts for the external components the workflow coordinates.
//!
//! Tool collaborators (weather, currency, search, card, knowledge, calendar,
//! translation), the synthesizer and the conversation memory are implemented
//! outside this crate. The session driver only sees them through these traits.

pub mod memory;
pub mod offline;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::requirements::TravelRequirements;
use crate::workflow::ErrorKind;
use memory::MemoryEntry;

/// The seven tool collaborators known to the concierge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Weather,
    Fx,
    Search,
    Card,
    Knowledge,
    Calendar,
    Translation,
}

impl ToolKind {
    pub const ALL: [ToolKind; 7] = [
        ToolKind::Weather,
        ToolKind::Fx,
        ToolKind::Search,
        ToolKind::Card,
        ToolKind::Knowledge,
        ToolKind::Calendar,
        ToolKind::Translation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weather => "weather",
            Self::Fx => "fx",
            Self::Search => "search",
            Self::Card => "card",
            Self::Knowledge => "knowledge",
            Self::Calendar => "calendar",
            Self::Translation => "translation",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("Tool '{tool}' timed out")]
    Timeout { tool: String },

    #[error("Tool '{tool}' is not available")]
    Unavailable { tool: String },

    #[error("Tool '{tool}' returned an invalid response: {reason}")]
    InvalidResponse { tool: String, reason: String },

    #[error("Tool '{tool}' failed: {message}")]
    Failed { tool: String, message: String },
}

impl ToolError {
    /// Value recorded as `ErrorContext::kind` for this failure.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => ErrorKind::TIMEOUT,
            Self::InvalidResponse { .. } => ErrorKind::VALIDATION,
            Self::Unavailable { .. } | Self::Failed { .. } => ErrorKind::TOOL_EXECUTION,
        }
    }
}

/// An external tool invoked during `ExecuteTools`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ToolCollaborator: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, params: Value) -> Result<Value, ToolError>;
}

/// Tool collaborators keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolCollaborator>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn ToolCollaborator>) -> &mut Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn with(mut self, tool: Arc<dyn ToolCollaborator>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolCollaborator>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Final artifact produced once the workflow reaches `Synthesize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripPlan {
    pub destination: Option<String>,
    pub dates: Option<String>,
    pub card: Option<String>,
    #[serde(default)]
    pub sections: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("Nothing to synthesize: no tool produced a result")]
    NoResults,

    #[error("Synthesis failed: {0}")]
    Failed(String),
}

/// Turns validated tool outputs into a `TripPlan`.
pub trait Synthesizer: Send + Sync {
    fn synthesize(
        &self,
        results: &IndexMap<String, Value>,
        requirements: &TravelRequirements,
    ) -> Result<TripPlan, SynthesisError>;
}

/// Conversation memory the session reports requests, tool calls and phase
/// changes into.
#[cfg_attr(test, automock)]
pub trait MemoryStore: Send + Sync {
    fn record(&mut self, entry: MemoryEntry);

    /// Retained entries, oldest first.
    fn entries(&self) -> Vec<MemoryEntry>;

    fn clear(&mut self);
}

/// Whether a tool output counts as usable.
///
/// Collaborators report soft failures as an object with an `"error"` key.
pub fn is_usable_result(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Object(map) => !map.contains_key("error"),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_kind_names() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("flights"), None);
        assert_eq!(serde_json::to_value(ToolKind::Fx).unwrap(), json!("fx"));
    }

    #[test]
    fn test_tool_error_kinds() {
        let timeout = ToolError::Timeout { tool: "search".into() };
        assert_eq!(timeout.kind(), "TimeoutError");
        assert_eq!(timeout.to_string(), "Tool 'search' timed out");

        let failed = ToolError::Failed { tool: "fx".into(), message: "503".into() };
        assert_eq!(failed.kind(), "ToolExecutionError");
    }

    #[test]
    fn test_usable_result() {
        assert!(is_usable_result(&json!({"temperature_c": 21.5})));
        assert!(is_usable_result(&json!([{"title": "Cafe"}])));
        assert!(!is_usable_result(&json!({"error": "quota exceeded"})));
        assert!(!is_usable_result(&Value::Null));
    }

    #[tokio::test]
    async fn test_registry_dispatches_by_name() {
        let mut mock = MockToolCollaborator::new();
        mock.expect_name().return_const("weather".to_string());
        mock.expect_invoke()
            .times(1)
            .returning(|_| Ok(json!({"temperature_c": 18.0})));

        let registry = ToolRegistry::new().with(Arc::new(mock));
        assert!(registry.contains("weather"));
        assert_eq!(registry.names(), vec!["weather".to_string()]);

        let tool = registry.get("weather").unwrap();
        let result = tool.invoke(json!({})).await.unwrap();
        assert_eq!(result["temperature_c"], json!(18.0));
        assert!(registry.get("fx").is_none());
    }
}
