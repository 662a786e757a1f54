//! The agent loop: a bounded, turn-based exchange with the reasoning service.
//!
//! Each turn sends the system prompt, the action schemas and the full
//! history, then handles the response:
//!
//! 1. **Truncated output**: none of the requested actions ran. Each gets a
//!    synthetic error result and the model is told to retry shorter.
//! 2. **No actions**: the model stopped without submitting. It is told to
//!    continue and call its terminal action.
//! 3. **Actions**: every call is dispatched and answered. An accepted
//!    terminal action ends the run with its artifact; a rejected one feeds
//!    the validation errors back for another attempt.
//!
//! The run ends with an [`Artifact`] or one of the [`LoopError`] fatal
//! outcomes. It never returns a partial artifact.

use std::sync::Arc;
use std::time::Duration;

use buildloop_core::{
    ActionCall, ActionName, ActionOutcome, ActionResult, Artifact, CancellationToken,
    ConversationHistory, Message, Provider, ProviderError, ProviderRequest, SystemPrompt,
    UsageTotals,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::dispatch::ActionDispatcher;
use crate::observer::{ActionSummary, TurnObserver, TurnReport};

/// Default turn ceiling when none is configured.
pub const DEFAULT_MAX_ITERATIONS: usize = 25;

/// Default bound on a single reasoning-service call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

const TRUNCATION_CORRECTION: &str = "Your previous response hit the output limit and was cut off, \
    so none of its actions ran. Retry with shorter, complete output.";

/// Fatal outcomes of one loop run.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("no accepted artifact after {iterations} turns (ceiling {ceiling})")]
    Exhausted { ceiling: usize, iterations: usize },

    #[error("reasoning service failed on turn {iteration}: {source}")]
    Provider {
        iteration: usize,
        #[source]
        source: ProviderError,
    },

    #[error("interrupted after {iterations} turns")]
    Interrupted { iterations: usize },

    #[error("{corrections} consecutive turns without any action ({iterations} turns taken)")]
    Stalled { corrections: usize, iterations: usize },
}

impl LoopError {
    /// Whether the failure means the whole pipeline should stop, rather
    /// than just the unit of work this loop was serving.
    pub fn aborts_pipeline(&self) -> bool {
        matches!(self, Self::Interrupted { .. } | Self::Provider { .. })
    }

    /// Turns taken before the run failed.
    pub fn iterations(&self) -> usize {
        match self {
            Self::Exhausted { iterations, .. }
            | Self::Interrupted { iterations }
            | Self::Stalled { iterations, .. } => *iterations,
            Self::Provider { iteration, .. } => *iteration,
        }
    }
}

/// A successful run.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub artifact: Artifact,
    pub usage: UsageTotals,
    /// Turns taken, including the one that submitted the artifact.
    pub iterations: usize,
    pub history: ConversationHistory,
}

/// Drives one role's exchange with the reasoning service.
pub struct AgentLoop {
    /// The reasoning service
    provider: Arc<dyn Provider>,

    model: String,
    temperature: f32,
    max_tokens: Option<u32>,

    /// Segmented system instructions
    system: SystemPrompt,

    /// Actions this role may request
    dispatcher: ActionDispatcher,

    /// Hard turn ceiling
    max_iterations: usize,

    /// Fail fast after this many consecutive corrective turns
    max_consecutive_corrections: Option<usize>,

    request_timeout: Duration,
    observer: Option<Arc<dyn TurnObserver>>,
    cancel: CancellationToken,

    /// Role name used in logs and turn reports
    role: String,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        system: SystemPrompt,
        dispatcher: ActionDispatcher,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.2,
            max_tokens: None,
            system,
            dispatcher,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_consecutive_corrections: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            observer: None,
            cancel: CancellationToken::new(),
            role: "agent".into(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the max tokens per response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set the turn ceiling. Clamped to at least one turn.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    /// Fail with [`LoopError::Stalled`] after `max` consecutive corrective
    /// turns. Unset, only the turn ceiling bounds them.
    pub fn with_max_consecutive_corrections(mut self, max: Option<usize>) -> Self {
        self.max_consecutive_corrections = max;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TurnObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Share a cancellation token, polled before every turn.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Run the loop from a single initial instruction.
    pub async fn run(&self, instruction: impl Into<String>) -> Result<LoopOutcome, LoopError> {
        let mut history = ConversationHistory::new(instruction);
        let mut usage = UsageTotals::default();
        let mut corrections = 0usize;
        let actions = self.dispatcher.definitions();
        let terminal = self.dispatcher.terminal_action();

        info!(
            role = %self.role,
            model = %self.model,
            ceiling = self.max_iterations,
            actions = actions.len(),
            "Starting agent loop"
        );

        for iteration in 1..=self.max_iterations {
            if self.cancel.is_cancelled() {
                warn!(role = %self.role, iteration, "Cancellation observed, stopping loop");
                return Err(LoopError::Interrupted {
                    iterations: iteration - 1,
                });
            }

            let request = ProviderRequest {
                model: self.model.clone(),
                system: self.system.clone(),
                messages: history.messages().to_vec(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                actions: actions.clone(),
            };

            debug!(role = %self.role, iteration, messages = history.len(), "Calling reasoning service");
            let response = match tokio::time::timeout(self.request_timeout, self.provider.complete(request)).await {
                Ok(Ok(response)) => response,
                Ok(Err(source)) => return Err(LoopError::Provider { iteration, source }),
                Err(_) => {
                    return Err(LoopError::Provider {
                        iteration,
                        source: ProviderError::Timeout(self.request_timeout.as_secs()),
                    });
                }
            };

            usage.accumulate(&response.usage);
            let stop_reason = response.stop_reason.clone();
            let narration = response.message.content.clone();
            let calls = response.message.action_calls.clone();
            history.push(response.message);

            let mut summaries = Vec::with_capacity(calls.len());
            let mut accepted = None;

            if stop_reason.is_truncated() {
                warn!(role = %self.role, iteration, pending = calls.len(), "Response truncated, requesting retry");
                corrections += 1;
                if calls.is_empty() {
                    history.push(Message::user(TRUNCATION_CORRECTION));
                } else {
                    let results = calls
                        .iter()
                        .map(|call| {
                            summaries.push(ActionSummary { name: call.name.clone(), is_error: true });
                            ActionResult::error(&call.id, "response truncated before this action could run")
                        })
                        .collect();
                    history.push(Message::action_results(results, Some(TRUNCATION_CORRECTION.into())));
                }
            } else if calls.is_empty() {
                warn!(role = %self.role, iteration, %stop_reason, "Turn ended without an action");
                corrections += 1;
                history.push(Message::user(missing_terminal_correction(terminal)));
            } else {
                corrections = 0;
                let mut results = Vec::with_capacity(calls.len());
                for call in &calls {
                    let (result, artifact) = self.answer(call, accepted.is_some()).await;
                    summaries.push(ActionSummary {
                        name: call.name.clone(),
                        is_error: result.is_error,
                    });
                    results.push(result);
                    if accepted.is_none() {
                        accepted = artifact;
                    }
                }
                history.push(Message::action_results(results, None));
            }

            if let Some(observer) = &self.observer {
                observer.on_turn(&TurnReport {
                    role: self.role.clone(),
                    iteration,
                    stop_reason,
                    output_tokens: response.usage.output_tokens,
                    cache_hit: response.usage.cache_read_tokens > 0,
                    actions: summaries,
                    narration,
                });
            }

            if let Some(artifact) = accepted {
                info!(
                    role = %self.role,
                    iterations = iteration,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "Artifact accepted, loop complete"
                );
                return Ok(LoopOutcome {
                    artifact,
                    usage,
                    iterations: iteration,
                    history,
                });
            }

            if let Some(max) = self.max_consecutive_corrections
                && corrections >= max
            {
                warn!(role = %self.role, corrections, "Too many consecutive corrections");
                return Err(LoopError::Stalled {
                    corrections,
                    iterations: iteration,
                });
            }
        }

        warn!(role = %self.role, ceiling = self.max_iterations, "Turn ceiling reached without an artifact");
        Err(LoopError::Exhausted {
            ceiling: self.max_iterations,
            iterations: self.max_iterations,
        })
    }

    /// Dispatch one call and build its result. A second terminal call in a
    /// turn whose artifact was already accepted is refused, not run.
    async fn answer(&self, call: &ActionCall, already_accepted: bool) -> (ActionResult, Option<Artifact>) {
        let is_terminal = call
            .name
            .parse::<ActionName>()
            .is_ok_and(ActionName::is_terminal);
        if already_accepted && is_terminal {
            return (ActionResult::error(&call.id, "artifact already accepted this turn"), None);
        }

        match self.dispatcher.dispatch(&call.name, call.input.clone()).await {
            ActionOutcome::Output(value) => (ActionResult::from_value(&call.id, &value, false), None),
            ActionOutcome::Failed(value) => (ActionResult::from_value(&call.id, &value, true), None),
            ActionOutcome::Completed(artifact) => {
                let value = json!({ "status": "accepted", "key": artifact.key() });
                (ActionResult::from_value(&call.id, &value, false), Some(artifact))
            }
            ActionOutcome::Rejected(errors) => {
                debug!(role = %self.role, action = %call.name, errors = errors.len(), "Terminal action rejected");
                let value = json!({ "status": "rejected", "errors": errors });
                (ActionResult::from_value(&call.id, &value, true), None)
            }
        }
    }
}

fn missing_terminal_correction(terminal: Option<ActionName>) -> String {
    match terminal {
        Some(action) => format!(
            "You ended your turn without calling `{action}`. Your task is complete only once \
             `{action}` accepts your output. Continue and call it."
        ),
        None => "You ended your turn without requesting an action. Continue the task.".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{NoteAction, SubmitArtifactAction};
    use crate::test_helpers::*;
    use buildloop_core::{ArtifactKind, Role, StopReason};
    use buildloop_store::InMemoryStore;
    use std::sync::Mutex;

    fn valid_file() -> serde_json::Value {
        json!({"path": "src/lib.rs", "content": "pub fn answer() -> u32 { 42 }"})
    }

    fn dispatcher() -> ActionDispatcher {
        ActionDispatcher::new().with(NoteAction).with(
            SubmitArtifactAction::new(
                ArtifactKind::GeneratedFile,
                Arc::new(InMemoryStore::new()),
                "b1--src__lib.rs--generate",
            )
            .with_model("mock-model"),
        )
    }

    fn agent(provider: Arc<ScriptedProvider>) -> AgentLoop {
        AgentLoop::new(
            provider,
            "mock-model",
            SystemPrompt::new().cached("You write files.").dynamic("file: src/lib.rs"),
            dispatcher(),
        )
        .with_role("builder")
    }

    #[tokio::test]
    async fn terminal_action_on_first_turn_succeeds() {
        let provider = Arc::new(ScriptedProvider::new(vec![call_response("submit_file", valid_file())]));
        let outcome = agent(provider.clone()).run("Write src/lib.rs").await.unwrap();

        assert_eq!(outcome.iterations, 1);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(outcome.artifact.kind(), ArtifactKind::GeneratedFile);
        assert_eq!(outcome.artifact.document()["content"], "pub fn answer() -> u32 { 42 }");
        // instruction, assistant, results
        assert_eq!(outcome.history.len(), 3);
    }

    #[tokio::test]
    async fn exhaustion_happens_at_exactly_the_ceiling() {
        let provider = Arc::new(ScriptedProvider::repeating(call_response(
            "note",
            json!({"text": "still thinking"}),
        )));
        let err = agent(provider.clone())
            .with_max_iterations(4)
            .run("Write src/lib.rs")
            .await
            .unwrap_err();

        assert!(matches!(err, LoopError::Exhausted { ceiling: 4, iterations: 4 }));
        assert_eq!(provider.call_count(), 4);
        assert!(!err.aborts_pipeline());
    }

    #[tokio::test]
    async fn truncated_turn_gets_synthetic_errors_and_a_correction() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            truncated_response(vec![call("submit_file", json!({"path": "src/lib.rs"}))]),
            call_response("submit_file", valid_file()),
        ]));
        let outcome = agent(provider.clone()).run("Write src/lib.rs").await.unwrap();
        assert_eq!(outcome.iterations, 2);

        let second = &provider.requests()[1];
        let last = second.messages.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.action_results.len(), 1);
        assert_eq!(last.action_results[0].call_id, "call_submit_file");
        assert!(last.action_results[0].is_error);
        assert_eq!(last.content, TRUNCATION_CORRECTION);
    }

    #[tokio::test]
    async fn truncated_turn_without_calls_gets_a_correction() {
        let mut cut = text_response("partial");
        cut.stop_reason = StopReason::MaxTokens;
        let provider = Arc::new(ScriptedProvider::new(vec![cut, call_response("submit_file", valid_file())]));
        agent(provider.clone()).run("Write src/lib.rs").await.unwrap();

        let last = provider.requests()[1].messages.last().cloned().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, TRUNCATION_CORRECTION);
    }

    #[tokio::test]
    async fn cancellation_before_second_turn_interrupts() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let provider = Arc::new(ScriptedProvider::new(vec![
            call_response("note", json!({"text": "first"})),
            call_response("submit_file", valid_file()),
        ]));
        let observer = move |_: &TurnReport| trigger.cancel();

        let err = agent(provider.clone())
            .with_cancellation(cancel)
            .with_observer(Arc::new(observer))
            .run("Write src/lib.rs")
            .await
            .unwrap_err();

        assert!(matches!(err, LoopError::Interrupted { iterations: 1 }));
        assert_eq!(provider.call_count(), 1);
        assert!(err.aborts_pipeline());
    }

    #[tokio::test]
    async fn ending_without_terminal_action_is_corrected() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            text_response("I think the file is done."),
            call_response("submit_file", valid_file()),
        ]));
        let outcome = agent(provider.clone()).run("Write src/lib.rs").await.unwrap();
        assert_eq!(outcome.iterations, 2);

        let last = provider.requests()[1].messages.last().cloned().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.content.contains("`submit_file`"));
    }

    #[tokio::test]
    async fn consecutive_corrections_stall_when_bounded() {
        let provider = Arc::new(ScriptedProvider::repeating(text_response("done")));
        let err = agent(provider.clone())
            .with_max_consecutive_corrections(Some(3))
            .run("Write src/lib.rs")
            .await
            .unwrap_err();
        assert!(matches!(err, LoopError::Stalled { corrections: 3, iterations: 3 }));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn an_action_resets_the_correction_count() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            text_response("done"),
            call_response("note", json!({"text": "oh, not yet"})),
            text_response("done"),
            call_response("submit_file", valid_file()),
        ]));
        let outcome = agent(provider)
            .with_max_consecutive_corrections(Some(2))
            .run("Write src/lib.rs")
            .await
            .unwrap();
        assert_eq!(outcome.iterations, 4);
    }

    #[tokio::test]
    async fn rejected_submission_feeds_errors_back() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            call_response("submit_file", json!({"path": "src/lib.rs"})),
            call_response("submit_file", valid_file()),
        ]));
        let outcome = agent(provider.clone()).run("Write src/lib.rs").await.unwrap();
        assert_eq!(outcome.iterations, 2);

        let requests = provider.requests();
        let result = &requests[1].messages.last().unwrap().action_results[0];
        assert!(result.is_error);
        let value: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(value["status"], "rejected");
        assert_eq!(value["errors"], json!(["content: field required"]));
    }

    #[tokio::test]
    async fn unknown_action_is_answered_not_fatal() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            call_response("submit_flie", valid_file()),
            call_response("submit_file", valid_file()),
        ]));
        let outcome = agent(provider.clone()).run("Write src/lib.rs").await.unwrap();
        assert_eq!(outcome.iterations, 2);
        let requests = provider.requests();
        let result = &requests[1].messages.last().unwrap().action_results[0];
        assert!(result.content.contains("unknown action"));
    }

    #[tokio::test]
    async fn second_terminal_call_in_a_turn_is_refused() {
        let provider = Arc::new(ScriptedProvider::new(vec![calls_response(vec![
            call("submit_file", valid_file()),
            ActionCall {
                id: "call_again".into(),
                name: "submit_file".into(),
                input: valid_file(),
            },
        ])]));
        let outcome = agent(provider).run("Write src/lib.rs").await.unwrap();
        let results = &outcome.history.last().unwrap().action_results;
        assert!(!results[0].is_error);
        assert!(results[1].is_error);
        assert!(results[1].content.contains("already accepted"));
    }

    #[tokio::test]
    async fn usage_accumulates_across_all_turns() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            text_response("hmm"),
            call_response("submit_file", json!({})),
            call_response("submit_file", valid_file()),
        ]));
        let outcome = agent(provider).run("Write src/lib.rs").await.unwrap();
        assert_eq!(outcome.usage.input_tokens, 300);
        assert_eq!(outcome.usage.output_tokens, 60);
        assert_eq!(outcome.usage.cache_read_tokens, 240);
    }

    #[tokio::test]
    async fn provider_failure_is_fatal_and_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![call_response("note", json!({"text": "a"}))]));
        let err = agent(provider.clone()).run("Write src/lib.rs").await.unwrap_err();
        assert!(matches!(err, LoopError::Provider { iteration: 2, .. }));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out() {
        struct Hung;

        #[async_trait::async_trait]
        impl Provider for Hung {
            fn name(&self) -> &str {
                "hung"
            }

            async fn complete(&self, _: ProviderRequest) -> Result<buildloop_core::ProviderResponse, ProviderError> {
                std::future::pending().await
            }
        }

        let err = AgentLoop::new(Arc::new(Hung), "m", SystemPrompt::new(), dispatcher())
            .with_request_timeout(Duration::from_secs(30))
            .run("go")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LoopError::Provider { iteration: 1, source: ProviderError::Timeout(30) }
        ));
    }

    #[tokio::test]
    async fn observer_sees_every_turn() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let provider = Arc::new(ScriptedProvider::new(vec![
            call_response("note", json!({"text": "plan"})),
            call_response("submit_file", valid_file()),
        ]));
        agent(provider)
            .with_observer(Arc::new(move |report: &TurnReport| {
                sink.lock().unwrap().push((report.iteration, report.actions.clone(), report.cache_hit));
            }))
            .run("Write src/lib.rs")
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].1, vec![ActionSummary { name: "note".into(), is_error: false }]);
        assert_eq!(seen[1].0, 2);
        assert!(seen[1].2);
    }

    #[tokio::test]
    async fn requests_carry_system_prompt_and_schemas() {
        let provider = Arc::new(ScriptedProvider::new(vec![call_response("submit_file", valid_file())]));
        agent(provider.clone()).with_max_tokens(8000).run("Write src/lib.rs").await.unwrap();

        let request = provider.last_request().unwrap();
        assert_eq!(request.max_tokens, Some(8000));
        assert!(request.system.segments[0].cache_boundary);
        let names: Vec<_> = request.actions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["note", "submit_file"]);
    }
}
