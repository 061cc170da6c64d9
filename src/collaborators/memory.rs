//! Short-term conversation memory
//!
//! Holds the user and assistant turns, tool calls and workflow events of one
//! session in a sliding window bounded by item count and estimated tokens.
//! Oldest entries are evicted first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use uuid::Uuid;

use super::MemoryStore;

pub const DEFAULT_MAX_ITEMS: usize = 10;
pub const DEFAULT_MAX_TOKENS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryRole {
    User,
    Assistant,
    System,
}

impl MemoryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for MemoryRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a memory entry records beyond its text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemoryEvent {
    Conversation,
    ToolCall {
        tool_name: String,
        input: Value,
        output: Value,
        success: bool,
    },
    SystemEvent {
        data: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub role: MemoryRole,
    pub content: String,
    pub tokens: usize,
    pub timestamp: DateTime<Utc>,
    pub event: MemoryEvent,
}

impl MemoryEntry {
    fn new(role: MemoryRole, content: String, event: MemoryEvent) -> Self {
        Self {
            role,
            tokens: estimate_tokens(&content),
            content,
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn conversation(role: MemoryRole, content: impl Into<String>) -> Self {
        Self::new(role, content.into(), MemoryEvent::Conversation)
    }

    pub fn tool_call(tool: &str, input: Value, output: Value, success: bool) -> Self {
        Self::new(
            MemoryRole::Assistant,
            format!("Tool call: {tool}"),
            MemoryEvent::ToolCall {
                tool_name: tool.to_string(),
                input,
                output,
                success,
            },
        )
    }

    pub fn system_event(event: impl Into<String>, data: Value) -> Self {
        Self::new(MemoryRole::System, event.into(), MemoryEvent::SystemEvent { data })
    }

    pub fn tool_name(&self) -> Option<&str> {
        match &self.event {
            MemoryEvent::ToolCall { tool_name, .. } => Some(tool_name),
            _ => None,
        }
    }
}

/// Roughly four characters per token; any non-empty text costs at least one.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        0
    } else {
        (text.chars().count() / 4).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemorySummary {
    pub session_id: String,
    pub total_items: usize,
    pub total_tokens: usize,
    pub max_items: usize,
    pub max_tokens: usize,
    pub memory_usage_percent: f64,
    pub oldest_item: Option<DateTime<Utc>>,
    pub newest_item: Option<DateTime<Utc>>,
}

/// Sliding-window memory for a single session.
#[derive(Debug, Clone)]
pub struct ShortTermMemory {
    session_id: String,
    max_items: usize,
    max_tokens: usize,
    items: VecDeque<MemoryEntry>,
    total_tokens: usize,
}

impl Default for ShortTermMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITEMS, DEFAULT_MAX_TOKENS)
    }
}

impl ShortTermMemory {
    pub fn new(max_items: usize, max_tokens: usize) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            max_items,
            max_tokens,
            items: VecDeque::new(),
            total_tokens: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.items.iter()
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<MemoryEntry> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }

    /// Case-insensitive match on content, or an exact tool name match.
    pub fn search(&self, query: &str, role: Option<MemoryRole>) -> Vec<MemoryEntry> {
        let query = query.to_lowercase();
        self.items
            .iter()
            .filter(|entry| role.is_none_or(|role| entry.role == role))
            .filter(|entry| {
                entry.content.to_lowercase().contains(&query)
                    || entry
                        .tool_name()
                        .is_some_and(|tool| tool.to_lowercase() == query)
            })
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> MemorySummary {
        let memory_usage_percent = if self.max_items > 0 {
            self.items.len() as f64 / self.max_items as f64 * 100.0
        } else {
            0.0
        };
        MemorySummary {
            session_id: self.session_id.clone(),
            total_items: self.items.len(),
            total_tokens: self.total_tokens,
            max_items: self.max_items,
            max_tokens: self.max_tokens,
            memory_usage_percent,
            oldest_item: self.items.front().map(|e| e.timestamp),
            newest_item: self.items.back().map(|e| e.timestamp),
        }
    }

    /// Entries rendered as `ROLE: content` lines, oldest first, stopping
    /// before the token budget would be exceeded.
    pub fn context_window(&self, max_tokens: Option<usize>) -> String {
        let budget = max_tokens.unwrap_or(self.max_tokens);
        let mut used = 0;
        let mut lines = Vec::new();
        for entry in &self.items {
            if used + entry.tokens > budget {
                break;
            }
            lines.push(format!("{}: {}", entry.role.as_str().to_uppercase(), entry.content));
            used += entry.tokens;
        }

        if lines.is_empty() {
            "No conversation history.".to_string()
        } else {
            lines.join("\n")
        }
    }

    fn evict(&mut self) {
        while self.items.len() > self.max_items {
            self.pop_oldest();
        }
        while self.total_tokens > self.max_tokens && !self.items.is_empty() {
            self.pop_oldest();
        }
    }

    fn pop_oldest(&mut self) {
        if let Some(removed) = self.items.pop_front() {
            self.total_tokens = self.total_tokens.saturating_sub(removed.tokens);
        }
    }
}

impl MemoryStore for ShortTermMemory {
    fn record(&mut self, entry: MemoryEntry) {
        self.total_tokens += entry.tokens;
        self.items.push_back(entry);
        self.evict();
    }

    fn entries(&self) -> Vec<MemoryEntry> {
        self.items.iter().cloned().collect()
    }

    fn clear(&mut self) {
        self.items.clear();
        self.total_tokens = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_estimate() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("hi"), 1);
        assert_eq!(estimate_tokens("sixteen chars!!!"), 4);
    }

    #[test]
    fn test_evicts_oldest_beyond_item_limit() {
        let mut memory = ShortTermMemory::new(3, 1000);
        for i in 0..5 {
            memory.record(MemoryEntry::conversation(MemoryRole::User, format!("message {i}")));
        }

        let contents: Vec<String> = memory.iter().map(|e| e.content.clone()).collect();
        assert_eq!(contents, ["message 2", "message 3", "message 4"]);
        assert_eq!(memory.total_tokens(), 6);
    }

    #[test]
    fn test_evicts_oldest_beyond_token_limit() {
        let mut memory = ShortTermMemory::new(10, 5);
        memory.record(MemoryEntry::conversation(MemoryRole::User, "a".repeat(12)));
        memory.record(MemoryEntry::conversation(MemoryRole::Assistant, "b".repeat(12)));
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.iter().next().unwrap().role, MemoryRole::Assistant);
        assert_eq!(memory.total_tokens(), 3);

        memory.record(MemoryEntry::conversation(MemoryRole::User, "c".repeat(40)));
        assert!(memory.is_empty());
        assert_eq!(memory.total_tokens(), 0);
    }

    #[test]
    fn test_search_matches_content_and_tool_name() {
        let mut memory = ShortTermMemory::default();
        memory.record(MemoryEntry::conversation(MemoryRole::User, "Weekend in Paris"));
        memory.record(MemoryEntry::tool_call("fx", json!({}), json!({"rate": 0.92}), true));
        memory.record(MemoryEntry::system_event("Entered PlanTools", json!({})));

        assert_eq!(memory.search("paris", None).len(), 1);
        assert_eq!(memory.search("FX", None).len(), 1);
        assert_eq!(memory.search("paris", Some(MemoryRole::System)).len(), 0);
        assert_eq!(memory.search("plantools", Some(MemoryRole::System)).len(), 1);
    }

    #[test]
    fn test_recent_and_context_window() {
        let mut memory = ShortTermMemory::default();
        assert_eq!(memory.context_window(None), "No conversation history.");

        memory.record(MemoryEntry::conversation(MemoryRole::User, "Trip to Rome"));
        memory.record(MemoryEntry::conversation(MemoryRole::Assistant, "Planning it now"));
        memory.record(MemoryEntry::conversation(MemoryRole::User, "Thanks"));

        let recent = memory.recent(2);
        assert_eq!(recent[0].content, "Planning it now");
        assert_eq!(recent[1].content, "Thanks");
        assert_eq!(memory.recent(10).len(), 3);

        assert_eq!(
            memory.context_window(Some(6)),
            "USER: Trip to Rome\nASSISTANT: Planning it now"
        );
    }

    #[test]
    fn test_summary_and_clear() {
        let mut memory = ShortTermMemory::new(4, 100);
        memory.record(MemoryEntry::conversation(MemoryRole::User, "Trip to Oslo"));

        let summary = memory.summary();
        assert_eq!(summary.total_items, 1);
        assert_eq!(summary.memory_usage_percent, 25.0);
        assert!(summary.oldest_item.is_some());

        memory.clear();
        assert!(memory.entries().is_empty());
        assert_eq!(memory.summary().total_tokens, 0);
        assert_eq!(memory.summary().newest_item, None);
    }

    #[test]
    fn test_tool_call_entry_serializes_event_type() {
        let entry = MemoryEntry::tool_call("weather", json!({"city": "Paris"}), json!(null), false);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["role"], json!("assistant"));
        assert_eq!(value["content"], json!("Tool call: weather"));
        assert_eq!(value["event"]["type"], json!("tool_call"));
        assert_eq!(value["event"]["success"], json!(false));
    }
}
