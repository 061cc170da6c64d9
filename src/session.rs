//! Session driver
//!
//! Runs one travel request through the workflow controller: clarification,
//! tool planning, concurrent tool execution, bounded recovery of failed
//! tools, validation and synthesis. All tool I/O happens here; outcomes are
//! fed back into the controller one at a time, in plan order. The request,
//! every tool call and every phase change are also written to the session's
//! conversation memory.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use crate::collaborators::memory::{MemoryEntry, MemoryRole, ShortTermMemory};
use crate::collaborators::{
    is_usable_result, MemoryStore, SynthesisError, Synthesizer, ToolError, ToolKind,
    ToolRegistry, TripPlan,
};
use crate::config::WorkflowConfig;
use crate::requirements::TravelRequirements;
use crate::telemetry::{create_session_span, generate_correlation_id};
use crate::workflow::{ErrorDetails, ErrorKind, Metadata, Phase, WorkflowController, WorkflowError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("Session already started (current phase: {phase})")]
    AlreadyStarted { phase: Phase },

    #[error("Session is not waiting for clarification (current phase: {phase})")]
    NotAwaitingUser { phase: Phase },

    #[error("Escalated without an active error context")]
    MissingErrorContext,
}

/// Where a session stopped.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The workflow reached `Done` with a plan.
    Completed { plan: TripPlan },
    /// The workflow is parked in `AwaitingUserClarification`.
    NeedsClarification { question: String },
    /// A tool exhausted its retry budget; the workflow is `Done` without a plan.
    Escalated { error: ErrorDetails },
}

/// Drives a `WorkflowController` for a single travel request.
pub struct WorkflowSession {
    controller: WorkflowController,
    tools: ToolRegistry,
    synthesizer: Arc<dyn Synthesizer>,
    config: WorkflowConfig,
    requirements: TravelRequirements,
    results: IndexMap<String, Value>,
    warnings: Vec<String>,
    memory: Box<dyn MemoryStore>,
    remembered_transitions: usize,
    correlation_id: String,
}

impl std::fmt::Debug for WorkflowSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowSession")
            .field("controller", &self.controller)
            .field("tools", &self.tools)
            .field("config", &self.config)
            .field("requirements", &self.requirements)
            .field("results", &self.results.keys().collect::<Vec<_>>())
            .field("memory_entries", &self.memory.entries().len())
            .field("correlation_id", &self.correlation_id)
            .finish()
    }
}

impl WorkflowSession {
    pub fn new(
        tools: ToolRegistry,
        synthesizer: Arc<dyn Synthesizer>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            controller: WorkflowController::with_retry_budget(config.max_retries),
            tools,
            synthesizer,
            config,
            requirements: TravelRequirements::default(),
            results: IndexMap::new(),
            warnings: Vec::new(),
            memory: Box::new(ShortTermMemory::default()),
            remembered_transitions: 0,
            correlation_id: generate_correlation_id(),
        }
    }

    /// Replace the default short-term memory.
    pub fn with_memory(mut self, memory: Box<dyn MemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    pub fn memory(&self) -> &dyn MemoryStore {
        self.memory.as_ref()
    }

    pub fn controller(&self) -> &WorkflowController {
        &self.controller
    }

    pub fn requirements(&self) -> &TravelRequirements {
        &self.requirements
    }

    pub fn results(&self) -> &IndexMap<String, Value> {
        &self.results
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Start the workflow for `requirements`.
    pub async fn run(
        &mut self,
        requirements: TravelRequirements,
    ) -> Result<SessionOutcome, SessionError> {
        let span = create_session_span(
            "run",
            requirements.destination.as_deref(),
            &self.correlation_id,
        );
        let outcome = self.start(requirements).instrument(span).await;
        self.remember_phase_changes();
        outcome
    }

    /// Continue a session parked on a clarification question.
    ///
    /// The answer is taken as the destination.
    pub async fn resume_with_clarification(
        &mut self,
        answer: &str,
    ) -> Result<SessionOutcome, SessionError> {
        let span = create_session_span("resume", Some(answer), &self.correlation_id);
        let outcome = self.resume(answer).instrument(span).await;
        self.remember_phase_changes();
        outcome
    }

    /// Record `entry` after any phase changes not yet in memory.
    fn remember(&mut self, entry: MemoryEntry) {
        self.remember_phase_changes();
        self.memory.record(entry);
    }

    fn remember_phase_changes(&mut self) {
        let history = self.controller.get_transition_history();
        let events: Vec<MemoryEntry> = history
            .iter()
            .skip(self.remembered_transitions)
            .map(|t| {
                MemoryEntry::system_event(
                    format!("Phase {} → {}: {}", t.from, t.to, t.reason),
                    json!({"from": t.from, "to": t.to}),
                )
            })
            .collect();
        self.remembered_transitions = history.len();
        for event in events {
            self.memory.record(event);
        }
    }

    fn remember_tool_call(
        &mut self,
        tool: &str,
        input: Value,
        outcome: &Result<Value, ToolError>,
    ) {
        let entry = match outcome {
            Ok(value) => MemoryEntry::tool_call(tool, input, value.clone(), true),
            Err(err) => {
                MemoryEntry::tool_call(tool, input, json!({"error": err.to_string()}), false)
            }
        };
        self.remember(entry);
    }

    async fn start(
        &mut self,
        requirements: TravelRequirements,
    ) -> Result<SessionOutcome, SessionError> {
        let phase = self.controller.phase();
        if phase != Phase::Init {
            return Err(SessionError::AlreadyStarted { phase });
        }

        info!(destination = ?requirements.destination, "Processing travel request");
        self.remember(MemoryEntry::conversation(
            MemoryRole::User,
            format!("Travel request: {requirements}"),
        ));
        self.requirements = requirements;
        self.controller.set_requirements(&self.requirements);
        self.controller.advance_default()?;

        self.proceed_from_requirements().await
    }

    async fn resume(&mut self, answer: &str) -> Result<SessionOutcome, SessionError> {
        if !self.controller.is_awaiting_user() {
            return Err(SessionError::NotAwaitingUser {
                phase: self.controller.phase(),
            });
        }

        self.remember(MemoryEntry::conversation(MemoryRole::User, answer));
        self.controller.provide_clarification(answer)?;
        self.requirements = self.requirements.clone().with_destination(answer);
        self.controller.set_requirements(&self.requirements);

        self.proceed_from_requirements().await
    }

    /// Continue from `ClarifyRequirements`.
    async fn proceed_from_requirements(&mut self) -> Result<SessionOutcome, SessionError> {
        if let Some(question) = self.requirements.clarification_question() {
            self.controller.request_clarification(&question)?;
            self.remember(MemoryEntry::conversation(MemoryRole::Assistant, question.as_str()));
            return Ok(SessionOutcome::NeedsClarification { question });
        }

        self.controller.advance_default()?; // PlanTools

        if self.should_check_availability() {
            self.check_availability().await?;
        }

        let plan = self.plan_tools();
        for tool in &plan {
            self.controller.record_tool_called(tool);
        }
        let mut metadata = Metadata::new();
        metadata.insert("tools".to_string(), json!(plan));
        self.controller.advance("Tools planned", metadata)?; // ExecuteTools

        info!(tools = ?plan, "Executing tools");
        let outcomes = self.execute_round(&plan).await;

        let mut failures = Vec::new();
        for (tool, outcome) in outcomes {
            let params = self.tool_params(&tool);
            self.remember_tool_call(&tool, params, &outcome);
            match outcome {
                Ok(value) => {
                    self.controller.mark_tool_success(&tool);
                    self.results.insert(tool, value);
                }
                Err(err) => failures.push((tool, err)),
            }
        }

        if !failures.is_empty() {
            let mut recovered = Vec::new();
            for (tool, err) in failures {
                if !self.recover_tool(&tool, err.kind(), &err.to_string()).await? {
                    return self.escalate();
                }
                recovered.push(tool);
            }
            let mut metadata = Metadata::new();
            metadata.insert("recovered".to_string(), json!(recovered));
            self.controller
                .transition_to(Phase::ExecuteTools, "Failed tools recovered", metadata)?;
        }

        self.controller.advance("Tool execution completed", Metadata::new())?; // ValidatingResults

        loop {
            let checks: Vec<(String, bool)> = plan
                .iter()
                .map(|tool| {
                    let usable = self.results.get(tool).is_some_and(is_usable_result);
                    (tool.clone(), usable)
                })
                .collect();
            let failed: Vec<String> = checks
                .iter()
                .filter(|(_, ok)| !ok)
                .map(|(tool, _)| tool.clone())
                .collect();

            if self.controller.validate_tool_results(checks)? {
                break;
            }

            for tool in &failed {
                if !self
                    .recover_tool(tool, ErrorKind::VALIDATION, "Result failed validation")
                    .await?
                {
                    return self.escalate();
                }
            }
            let mut metadata = Metadata::new();
            metadata.insert("recovered".to_string(), json!(failed));
            self.controller
                .transition_to(Phase::ExecuteTools, "Re-executing after validation", metadata)?;
            self.controller
                .advance("Tool execution completed", Metadata::new())?;
        }

        self.finish().await
    }

    fn should_check_availability(&self) -> bool {
        self.config.check_availability
            && self.requirements.dates.is_some()
            && self.tools.contains(ToolKind::Calendar.as_str())
    }

    /// Run the calendar check via `CheckingAvailability` and return to `PlanTools`.
    ///
    /// Availability is advisory: a calendar failure becomes a plan warning.
    async fn check_availability(&mut self) -> Result<(), SessionError> {
        let tool = ToolKind::Calendar.as_str();
        self.controller.transition_to(
            Phase::CheckingAvailability,
            "Dates provided, checking availability",
            Metadata::new(),
        )?;

        let outcome = self.invoke_one(tool).await;
        let params = self.tool_params(tool);
        self.remember_tool_call(tool, params, &outcome);
        match outcome {
            Ok(value) if is_usable_result(&value) => {
                self.controller.mark_tool_success(tool);
                self.results.insert(tool.to_string(), value);
            }
            Ok(_) => self
                .warnings
                .push("Availability check returned no usable result".to_string()),
            Err(err) => {
                warn!(error = %err, "Availability check failed");
                self.warnings.push(format!("Availability check failed: {err}"));
            }
        }

        self.controller
            .advance("Availability checked", Metadata::new())?; // PlanTools
        Ok(())
    }

    /// Tools to execute for the current requirements, in plan order.
    fn plan_tools(&mut self) -> Vec<String> {
        let mut wanted = Vec::new();
        if self.requirements.is_destination_known() {
            wanted.extend([ToolKind::Weather, ToolKind::Fx, ToolKind::Search, ToolKind::Card]);
            if self.tools.contains(ToolKind::Knowledge.as_str()) {
                wanted.push(ToolKind::Knowledge);
            }
        }

        let mut plan = Vec::new();
        for kind in wanted {
            if self.tools.contains(kind.as_str()) {
                plan.push(kind.as_str().to_string());
            } else {
                warn!(tool = %kind, "Tool not registered, skipping");
                self.warnings.push(format!("Tool {kind} is not available"));
            }
        }
        plan
    }

    fn tool_params(&self, tool: &str) -> Value {
        json!({
            "tool": tool,
            "destination": self.requirements.destination,
            "dates": self.requirements.dates,
            "card": self.requirements.card,
        })
    }

    async fn invoke_one(&self, tool: &str) -> Result<Value, ToolError> {
        match self.tools.get(tool) {
            Some(collaborator) => collaborator.invoke(self.tool_params(tool)).await,
            None => Err(ToolError::Unavailable {
                tool: tool.to_string(),
            }),
        }
    }

    /// Invoke `tools` concurrently; outcomes come back in plan order.
    async fn execute_round(&self, tools: &[String]) -> Vec<(String, Result<Value, ToolError>)> {
        let mut set = JoinSet::new();
        for (index, name) in tools.iter().enumerate() {
            let collaborator = self.tools.get(name);
            let params = self.tool_params(name);
            let name = name.clone();
            set.spawn(async move {
                let outcome = match collaborator {
                    Some(collaborator) => collaborator.invoke(params).await,
                    None => Err(ToolError::Unavailable { tool: name }),
                };
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<Result<Value, ToolError>>> = vec![None; tools.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(err) => error!(error = %err, "Tool task did not complete"),
            }
        }

        tools
            .iter()
            .cloned()
            .zip(slots)
            .map(|(name, slot)| {
                let outcome = slot.unwrap_or_else(|| {
                    Err(ToolError::Failed {
                        tool: name.clone(),
                        message: "tool task aborted".to_string(),
                    })
                });
                (name, outcome)
            })
            .collect()
    }

    /// Report a failure of `tool` and retry it until it yields a usable
    /// result or its retry budget runs out.
    ///
    /// Retries run while the controller sits in `RetryingTools`, so repeated
    /// failures of the same tool count against one error context. Returns
    /// `false` when the controller escalated.
    async fn recover_tool(
        &mut self,
        tool: &str,
        kind: &str,
        message: &str,
    ) -> Result<bool, SessionError> {
        self.controller.handle_tool_error(tool, message, kind)?;

        loop {
            let mut metadata = Metadata::new();
            metadata.insert("tool".to_string(), json!(tool));
            self.controller.advance("Recovering failed tool", metadata)?;

            if self.controller.phase() == Phase::EscalatingError {
                error!(tool = %tool, "Retry budget exhausted");
                return Ok(false);
            }

            debug!(
                tool = %tool,
                retry = self.controller.current_error().map(|e| e.retry_count),
                "Retrying tool"
            );
            let outcome = self.invoke_one(tool).await;
            let params = self.tool_params(tool);
        self.remember_tool_call(tool, params, &outcome);
            match outcome {
                Ok(value) if is_usable_result(&value) => {
                    info!(tool = %tool, "Tool recovered");
                    self.controller.mark_tool_success(tool);
                    self.results.insert(tool.to_string(), value);
                    return Ok(true);
                }
                Ok(value) => {
                    self.results.insert(tool.to_string(), value);
                    self.controller.handle_tool_error(
                        tool,
                        "Tool returned an unusable result",
                        ErrorKind::VALIDATION,
                    )?;
                }
                Err(err) => {
                    self.controller
                        .handle_tool_error(tool, &err.to_string(), err.kind())?;
                }
            }
        }
    }

    /// Close an escalated workflow: `EscalatingError → Done`.
    fn escalate(&mut self) -> Result<SessionOutcome, SessionError> {
        let error = self
            .controller
            .get_state_summary()
            .error_details
            .ok_or(SessionError::MissingErrorContext)?;

        let mut metadata = Metadata::new();
        metadata.insert("failed_tool".to_string(), json!(error.failed_tool));
        self.controller
            .transition_to(Phase::Done, "Retry budget exhausted", metadata)?;

        Ok(SessionOutcome::Escalated { error })
    }

    /// Synthesize the plan from `Synthesize`, translating it when configured.
    async fn finish(&mut self) -> Result<SessionOutcome, SessionError> {
        let mut plan = self
            .synthesizer
            .synthesize(&self.results, &self.requirements)?;
        plan.warnings.append(&mut self.warnings);

        if let Some(language) = self.config.translate_to.clone() {
            self.translate(&mut plan, &language).await?;
        }

        self.controller
            .advance("Trip plan synthesized", Metadata::new())?; // Done
        info!(sections = plan.sections.len(), "Travel plan completed");

        Ok(SessionOutcome::Completed { plan })
    }

    /// `Synthesize → TranslatingContent → Synthesize`.
    async fn translate(&mut self, plan: &mut TripPlan, language: &str) -> Result<(), SessionError> {
        let tool = ToolKind::Translation.as_str();
        if !self.tools.contains(tool) {
            warn!(language = %language, "Translation requested but no translation tool registered");
            plan.warnings
                .push(format!("Translation to {language} unavailable"));
            return Ok(());
        }

        let content = match serde_json::to_value(&*plan) {
            Ok(content) => content,
            Err(err) => {
                warn!(error = %err, "Could not serialize plan for translation");
                plan.warnings
                    .push(format!("Translation to {language} failed: {err}"));
                return Ok(());
            }
        };

        let mut metadata = Metadata::new();
        metadata.insert("language".to_string(), json!(language));
        self.controller.transition_to(
            Phase::TranslatingContent,
            format!("Translating plan to {language}"),
            metadata,
        )?;

        let params = json!({
            "tool": tool,
            "target_language": language,
            "content": content,
        });
        let outcome = match self.tools.get(tool) {
            Some(collaborator) => collaborator.invoke(params.clone()).await,
            None => Err(ToolError::Unavailable { tool: tool.to_string() }),
        };
        self.remember_tool_call(tool, params, &outcome);
        match outcome {
            Ok(value) if is_usable_result(&value) => {
                self.controller.mark_tool_success(tool);
                plan.translation = Some(value);
            }
            Ok(_) => plan
                .warnings
                .push(format!("Translation to {language} returned no usable result")),
            Err(err) => {
                warn!(error = %err, "Translation failed");
                plan.warnings.push(format!("Translation to {language} failed: {err}"));
            }
        }

        self.controller
            .advance("Translation finished", Metadata::new())?; // Synthesize
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::memory::MemoryEvent;
    use crate::collaborators::offline::{offline_registry, AssemblingSynthesizer};
    use crate::collaborators::{MockMemoryStore, MockToolCollaborator};

    fn session(registry: ToolRegistry, config: WorkflowConfig) -> WorkflowSession {
        WorkflowSession::new(registry, Arc::new(AssemblingSynthesizer), config)
    }

    #[test]
    fn test_plan_skips_unregistered_tools() {
        let registry = offline_registry(&[]);
        let mut limited = ToolRegistry::new();
        for name in ["weather", "fx"] {
            limited.register(registry.get(name).unwrap());
        }

        let mut session = session(limited, WorkflowConfig::default());
        session.requirements = TravelRequirements::new(Some("Paris"), None, None);

        assert_eq!(session.plan_tools(), vec!["weather".to_string(), "fx".to_string()]);
        assert_eq!(session.warnings.len(), 2);
    }

    #[test]
    fn test_no_destination_plans_nothing() {
        let mut session = session(offline_registry(&[]), WorkflowConfig::default());
        assert!(session.plan_tools().is_empty());
    }

    #[test]
    fn test_second_run_is_rejected() {
        tokio_test::block_on(async {
            let mut session = session(offline_registry(&[]), WorkflowConfig::default());
            session
                .run(TravelRequirements::new(Some("Paris"), None, None))
                .await
                .unwrap();

            let err = session
                .run(TravelRequirements::new(Some("Rome"), None, None))
                .await
                .unwrap_err();
            assert!(matches!(err, SessionError::AlreadyStarted { phase: Phase::Done }));
        });
    }

    #[test]
    fn test_resume_requires_pending_question() {
        tokio_test::block_on(async {
            let mut session = session(offline_registry(&[]), WorkflowConfig::default());
            let err = session.resume_with_clarification("Paris").await.unwrap_err();
            assert!(matches!(err, SessionError::NotAwaitingUser { phase: Phase::Init }));
        });
    }

    #[test]
    fn test_memory_records_request_tool_calls_and_phases() {
        tokio_test::block_on(async {
            let registry = offline_registry(&[(ToolKind::Weather, 1)]);
            let mut session = session(registry, WorkflowConfig::default())
                .with_memory(Box::new(ShortTermMemory::new(200, 100_000)));
            session
                .run(TravelRequirements::new(Some("Paris"), None, None))
                .await
                .unwrap();

            let entries = session.memory().entries();
            assert_eq!(entries[0].role, MemoryRole::User);
            assert_eq!(
                entries[0].content,
                "Travel request: destination=Paris, dates=Not specified, card=Not specified"
            );

            for tool in ["weather", "fx", "search", "card", "knowledge"] {
                assert!(
                    entries.iter().any(|e| e.tool_name() == Some(tool)),
                    "{tool} call should be remembered"
                );
            }

            let weather: Vec<bool> = entries
                .iter()
                .filter_map(|e| match &e.event {
                    MemoryEvent::ToolCall { tool_name, success, .. } if tool_name == "weather" => {
                        Some(*success)
                    }
                    _ => None,
                })
                .collect();
            assert_eq!(weather, vec![false, true]);

            let phase_events: Vec<&str> = entries
                .iter()
                .filter(|e| e.role == MemoryRole::System)
                .map(|e| e.content.as_str())
                .collect();
            assert_eq!(
                phase_events.len(),
                session.controller().get_transition_history().len()
            );
            assert_eq!(
                phase_events.last().copied(),
                Some("Phase Synthesize → Done: Trip plan synthesized")
            );
        });
    }

    #[test]
    fn test_memory_records_clarification_exchange() {
        tokio_test::block_on(async {
            let mut session = session(offline_registry(&[]), WorkflowConfig::default())
                .with_memory(Box::new(ShortTermMemory::new(200, 100_000)));
            session.run(TravelRequirements::default()).await.unwrap();
            session.resume_with_clarification("Rome").await.unwrap();

            let conversation: Vec<(MemoryRole, String)> = session
                .memory()
                .entries()
                .into_iter()
                .filter(|e| e.event == MemoryEvent::Conversation)
                .map(|e| (e.role, e.content))
                .collect();
            assert_eq!(conversation.len(), 3);
            assert_eq!(
                conversation[1],
                (MemoryRole::Assistant, "What is your destination?".to_string())
            );
            assert_eq!(conversation[2], (MemoryRole::User, "Rome".to_string()));
        });
    }

    #[test]
    fn test_default_memory_keeps_latest_entries() {
        tokio_test::block_on(async {
            let mut session = session(offline_registry(&[]), WorkflowConfig::default());
            session
                .run(TravelRequirements::new(Some("Paris"), Some("June 3-10"), None))
                .await
                .unwrap();

            let entries = session.memory().entries();
            assert_eq!(entries.len(), 10);
            assert!(entries.iter().all(|e| !e.content.starts_with("Travel request")));
            assert_eq!(
                entries.last().map(|e| e.content.as_str()),
                Some("Phase Synthesize → Done: Trip plan synthesized")
            );
        });
    }

    #[test]
    fn test_translation_receives_serialized_plan() {
        tokio_test::block_on(async {
            let mut translator = MockToolCollaborator::new();
            translator.expect_name().return_const("translation".to_string());
            translator
                .expect_invoke()
                .withf(|params| {
                    params["content"]["destination"] == json!("Paris")
                        && params["target_language"] == json!("fr")
                })
                .times(1)
                .returning(|_| Ok(json!({"text": "Bonjour"})));

            let registry = offline_registry(&[]).with(Arc::new(translator));
            let config = WorkflowConfig {
                translate_to: Some("fr".to_string()),
                ..WorkflowConfig::default()
            };
            let mut session = session(registry, config);
            let outcome = session
                .run(TravelRequirements::new(Some("Paris"), None, None))
                .await
                .unwrap();

            match outcome {
                SessionOutcome::Completed { plan } => {
                    assert_eq!(plan.translation, Some(json!({"text": "Bonjour"})));
                    assert!(plan.warnings.is_empty());
                }
                other => panic!("expected completed plan, got {other:?}"),
            }
        });
    }

    #[test]
    fn test_clarification_request_reports_into_injected_store() {
        tokio_test::block_on(async {
            let mut store = MockMemoryStore::new();
            store
                .expect_record()
                .withf(|entry| {
                    entry.role != MemoryRole::Assistant
                        || entry.content == "What is your destination?"
                })
                .times(4)
                .return_const(());

            let mut session = session(offline_registry(&[]), WorkflowConfig::default())
                .with_memory(Box::new(store));
            let outcome = session.run(TravelRequirements::default()).await.unwrap();
            assert!(matches!(outcome, SessionOutcome::NeedsClarification { .. }));
        });
    }
}
