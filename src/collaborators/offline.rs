// Offline collaborators - canned responses, no network

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::{
    is_usable_result, SynthesisError, Synthesizer, ToolCollaborator, ToolError, ToolKind,
    ToolRegistry, TripPlan,
};
use crate::requirements::TravelRequirements;

/// Returns the same response on every call.
#[derive(Debug, Clone)]
pub struct StaticTool {
    name: String,
    response: Value,
}

impl StaticTool {
    pub fn new(name: impl Into<String>, response: Value) -> Self {
        Self {
            name: name.into(),
            response,
        }
    }
}

#[async_trait]
impl ToolCollaborator for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _params: Value) -> Result<Value, ToolError> {
        Ok(self.response.clone())
    }
}

/// Fails the first `failures` calls, then delegates to the inner tool.
#[derive(Debug)]
pub struct FlakyTool<T> {
    inner: T,
    failures: u32,
    calls: AtomicU32,
}

impl<T: ToolCollaborator> FlakyTool<T> {
    pub fn new(inner: T, failures: u32) -> Self {
        Self {
            inner,
            failures,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: ToolCollaborator> ToolCollaborator for FlakyTool<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, params: Value) -> Result<Value, ToolError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(ToolError::Timeout {
                tool: self.inner.name().to_string(),
            });
        }
        self.inner.invoke(params).await
    }
}

/// Canned response for each tool kind.
pub fn canned_response(kind: ToolKind) -> Value {
    match kind {
        ToolKind::Weather => json!({
            "temperature_c": 21.5,
            "conditions": "Partly cloudy",
            "recommendation": "Great weather for sightseeing!"
        }),
        ToolKind::Fx => json!({"from": "USD", "to": "EUR", "amount": 100.0, "converted": 92.4}),
        ToolKind::Search => json!([
            {"title": "Le Comptoir", "snippet": "Classic bistro", "url": "https://example.com/comptoir"},
            {"title": "Chez Janou", "snippet": "Provencal cooking", "url": "https://example.com/janou"}
        ]),
        ToolKind::Card => json!({"card": "BankGold", "benefit": "3x points on dining", "fx_fee": 0.0}),
        ToolKind::Knowledge => json!({"tips": ["Museums are closed on Mondays"]}),
        ToolKind::Calendar => json!({"available": true, "conflicts": []}),
        ToolKind::Translation => json!({"language": "fr", "text": "Bon voyage !"}),
    }
}

/// Registry with every tool answering from `canned_response`.
///
/// Tools listed in `flaky` fail the given number of times before answering.
pub fn offline_registry(flaky: &[(ToolKind, u32)]) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for kind in ToolKind::ALL {
        let tool = StaticTool::new(kind.as_str(), canned_response(kind));
        match flaky.iter().find(|(k, _)| *k == kind) {
            Some((_, failures)) => registry.register(Arc::new(FlakyTool::new(tool, *failures))),
            None => registry.register(Arc::new(tool)),
        };
    }
    registry
}

/// Builds a `TripPlan` from whichever usable results exist.
#[derive(Debug, Clone, Default)]
pub struct AssemblingSynthesizer;

impl Synthesizer for AssemblingSynthesizer {
    fn synthesize(
        &self,
        results: &IndexMap<String, Value>,
        requirements: &TravelRequirements,
    ) -> Result<TripPlan, SynthesisError> {
        let mut plan = TripPlan {
            destination: requirements.destination.clone(),
            dates: requirements.dates.clone(),
            card: requirements.card.clone(),
            ..Default::default()
        };

        for (tool, value) in results {
            if is_usable_result(value) {
                plan.sections.insert(tool.clone(), value.clone());
            } else {
                plan.warnings.push(format!("No usable result from {tool}"));
            }
        }

        if plan.sections.is_empty() {
            return Err(SynthesisError::NoResults);
        }
        Ok(plan)
    }
}
