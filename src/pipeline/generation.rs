use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::schema::{parse_validated, StageSchema};
use super::TerminalFailure;
use crate::config::GenerationConfig;

/// Which configured model a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelName {
    Primary,
    Fallback,
}

/// Failure modes of the external model-calling capability.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("model endpoint returned status {0}")]
    Transport(u16),

    #[error("{0}")]
    Other(String),
}

/// External capability: send a prompt to a named model, get raw text back.
///
/// Implementations are task-safe black boxes; the client never inspects
/// anything beyond the returned text and the error variant.
#[async_trait]
pub trait ModelCaller: Send + Sync {
    async fn call(&self, model: &str, prompt: &str) -> Result<String, CallError>;
}

/// One call attempt, fully specified. Created per attempt; immutable.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub prompt: &'a str,
    pub target_schema: &'static str,
    pub model: ModelName,
    pub attempt_number: u32,
}

/// What happened on one attempt, for the caller's execution log.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// Concrete model name the attempt went to.
    pub model: String,
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    /// `None` on success; the validation or call failure otherwise.
    pub error: Option<String>,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a `generate` call: the validated value or a terminal failure,
/// plus one record per attempt actually made.
#[derive(Debug)]
pub struct GenerationOutcome<T> {
    pub result: Result<T, TerminalFailure>,
    pub attempts: Vec<AttemptRecord>,
}

/// States of the call-retry-fallback machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    CallingPrimary,
    RetryingPrimary,
    CallingFallback,
    RetryingFallback,
    Succeeded,
    Failed,
}

impl CallState {
    /// The in-flight state for a given model and attempt counter.
    pub fn in_flight(model: ModelName, attempt_number: u32) -> Self {
        match (model, attempt_number) {
            (ModelName::Primary, 0) => Self::CallingPrimary,
            (ModelName::Primary, _) => Self::RetryingPrimary,
            (ModelName::Fallback, 0) => Self::CallingFallback,
            (ModelName::Fallback, _) => Self::RetryingFallback,
        }
    }
}

/// What to do after a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Call the same model again.
    Retry,
    /// Switch to the fallback model with a fresh attempt budget.
    Escalate,
    /// No recovery path remains.
    Fail,
}

/// The recovery decision, as a pure function of where we are.
///
/// Escalation happens at most once: only from Primary, only when fallback
/// is enabled. The fallback then gets its own full retry budget, so the
/// worst case is `2 * (1 + max_retries)` upstream calls.
pub fn next_recovery(model: ModelName, attempt_number: u32, config: &GenerationConfig) -> Recovery {
    if attempt_number < config.max_retries {
        Recovery::Retry
    } else if model == ModelName::Primary && config.enable_fallback {
        Recovery::Escalate
    } else {
        Recovery::Fail
    }
}

/// Structured generation client: calls a model, validates the response
/// against a stage schema, and recovers from validation failures by
/// retrying and escalating per [`next_recovery`].
///
/// Timeouts and transport errors are terminal immediately: a model that
/// is down or overloaded will not get better by being asked again.
pub struct GenerationClient {
    caller: Arc<dyn ModelCaller>,
    config: GenerationConfig,
}

impl GenerationClient {
    pub fn new(caller: Arc<dyn ModelCaller>, config: GenerationConfig) -> Self {
        Self { caller, config }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Resolve a model selector to its configured concrete name.
    pub fn model_name(&self, model: ModelName) -> &str {
        match model {
            ModelName::Primary => &self.config.primary_model,
            ModelName::Fallback => &self.config.fallback_model,
        }
    }

    /// Generate a validated `T` from a prompt, starting on `model`.
    pub async fn generate<T: StageSchema>(
        &self,
        prompt: &str,
        model: ModelName,
    ) -> GenerationOutcome<T> {
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut current = model;
        let mut attempt_number: u32 = 0;

        loop {
            let request = GenerationRequest {
                prompt,
                target_schema: T::NAME,
                model: current,
                attempt_number,
            };
            let model_name = self.model_name(current).to_string();
            let state = CallState::in_flight(current, attempt_number);
            let started_at = Utc::now();

            tracing::info!(
                model = %model_name,
                schema = request.target_schema,
                prompt_length = prompt.len(),
                attempt = attempt_number,
                state = ?state,
                "model call started"
            );

            let call_result = self.caller.call(&model_name, prompt).await;
            let finished_at = Utc::now();
            let duration_ms = (finished_at - started_at).num_milliseconds();

            let raw = match call_result {
                Ok(raw) => raw,
                Err(err) => {
                    // Timeouts and transport failures never retry (and any
                    // other call error is equally unrecoverable here).
                    tracing::error!(
                        model = %model_name,
                        attempt = attempt_number,
                        duration_ms,
                        error = %err,
                        "model call failed terminally"
                    );
                    attempts.push(AttemptRecord {
                        model: model_name,
                        attempt_number,
                        started_at,
                        finished_at,
                        duration_ms,
                        error: Some(err.to_string()),
                    });
                    let failure = match err {
                        CallError::Timeout(secs) => TerminalFailure::new(format!(
                            "Decision analysis timed out after {secs} seconds."
                        )),
                        CallError::Transport(status) => {
                            TerminalFailure::new(format!("Model API error: status {status}"))
                        }
                        CallError::Other(message) => TerminalFailure::new(format!(
                            "Unexpected error during decision analysis: {message}"
                        )),
                    };
                    return GenerationOutcome {
                        result: Err(failure),
                        attempts,
                    };
                }
            };

            match parse_validated::<T>(&raw) {
                Ok(value) => {
                    tracing::info!(
                        model = %model_name,
                        schema = request.target_schema,
                        response_length = raw.len(),
                        duration_ms,
                        attempt = attempt_number,
                        "model response validated"
                    );
                    attempts.push(AttemptRecord {
                        model: model_name,
                        attempt_number,
                        started_at,
                        finished_at,
                        duration_ms,
                        error: None,
                    });
                    return GenerationOutcome {
                        result: Ok(value),
                        attempts,
                    };
                }
                Err(violation) => {
                    tracing::warn!(
                        model = %model_name,
                        schema = request.target_schema,
                        response_length = raw.len(),
                        duration_ms,
                        attempt = attempt_number,
                        error = %violation,
                        "model response failed schema validation"
                    );
                    attempts.push(AttemptRecord {
                        model: model_name.clone(),
                        attempt_number,
                        started_at,
                        finished_at,
                        duration_ms,
                        error: Some(violation.to_string()),
                    });

                    match next_recovery(current, attempt_number, &self.config) {
                        Recovery::Retry => {
                            attempt_number += 1;
                            tracing::info!(
                                model = %model_name,
                                attempt = attempt_number,
                                "retrying with same model"
                            );
                        }
                        Recovery::Escalate => {
                            tracing::warn!(
                                from_model = %model_name,
                                to_model = %self.config.fallback_model,
                                "fallback triggered after exhausting primary retries"
                            );
                            current = ModelName::Fallback;
                            attempt_number = 0;
                        }
                        Recovery::Fail => {
                            tracing::error!(
                                model = %model_name,
                                schema = request.target_schema,
                                attempts = attempts.len(),
                                "all generation attempts failed validation"
                            );
                            return GenerationOutcome {
                                result: Err(TerminalFailure::new(
                                    "Decision analysis could not be completed reliably. \
                                     All models failed validation.",
                                )),
                                attempts,
                            };
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::schema::SchemaViolation;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Minimal schema for exercising the state machine.
    #[derive(Debug, Deserialize)]
    struct Verdict {
        #[allow(dead_code)]
        answer: String,
        score: f64,
    }

    impl StageSchema for Verdict {
        const NAME: &'static str = "verdict";

        fn validate(&self) -> Result<(), SchemaViolation> {
            if !(0.0..=1.0).contains(&self.score) {
                return Err(SchemaViolation::Constraint(
                    "score must be between 0.0 and 1.0".to_string(),
                ));
            }
            Ok(())
        }
    }

    const VALID: &str = r#"{"answer": "accept", "score": 0.8}"#;
    const INVALID_RANGE: &str = r#"{"answer": "accept", "score": 7.0}"#;

    /// Scripted caller: plays back responses in order and records which
    /// model each call went to.
    struct ScriptedCaller {
        script: Vec<Result<String, CallError>>,
        cursor: AtomicUsize,
        models_called: Mutex<Vec<String>>,
    }

    impl ScriptedCaller {
        fn new(script: Vec<Result<String, CallError>>) -> Self {
            Self {
                script,
                cursor: AtomicUsize::new(0),
                models_called: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.cursor.load(Ordering::SeqCst)
        }

        fn models(&self) -> Vec<String> {
            self.models_called.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelCaller for ScriptedCaller {
        async fn call(&self, model: &str, _prompt: &str) -> Result<String, CallError> {
            self.models_called.lock().unwrap().push(model.to_string());
            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            self.script
                .get(index)
                .cloned()
                .unwrap_or_else(|| Ok(VALID.to_string()))
        }
    }

    fn test_config() -> GenerationConfig {
        GenerationConfig {
            primary_model: "primary-model".to_string(),
            fallback_model: "fallback-model".to_string(),
            ..GenerationConfig::default()
        }
    }

    fn client(caller: Arc<ScriptedCaller>) -> GenerationClient {
        GenerationClient::new(caller, test_config())
    }

    #[tokio::test]
    async fn valid_response_returns_after_one_call() {
        let caller = Arc::new(ScriptedCaller::new(vec![Ok(VALID.to_string())]));
        let outcome = client(Arc::clone(&caller))
            .generate::<Verdict>("prompt", ModelName::Primary)
            .await;

        let value = outcome.result.unwrap();
        assert!((value.score - 0.8).abs() < f64::EPSILON);
        assert_eq!(caller.calls(), 1);
        assert_eq!(outcome.attempts.len(), 1);
        assert!(outcome.attempts[0].succeeded());
        assert_eq!(outcome.attempts[0].model, "primary-model");
    }

    #[tokio::test]
    async fn invalid_then_valid_retries_same_model() {
        let caller = Arc::new(ScriptedCaller::new(vec![
            Ok(INVALID_RANGE.to_string()),
            Ok(VALID.to_string()),
        ]));
        let outcome = client(Arc::clone(&caller))
            .generate::<Verdict>("prompt", ModelName::Primary)
            .await;

        assert!(outcome.result.is_ok());
        assert_eq!(caller.calls(), 2);
        assert_eq!(caller.models(), vec!["primary-model", "primary-model"]);
        assert_eq!(outcome.attempts.len(), 2);
        assert!(!outcome.attempts[0].succeeded());
        assert!(outcome.attempts[1].succeeded());
        assert_eq!(outcome.attempts[1].attempt_number, 1);
    }

    #[tokio::test]
    async fn exhausted_primary_escalates_once_with_fresh_budget() {
        // max_retries = 1, so primary gets 2 attempts before escalation.
        let caller = Arc::new(ScriptedCaller::new(vec![
            Ok(INVALID_RANGE.to_string()),
            Ok(INVALID_RANGE.to_string()),
            Ok(VALID.to_string()),
        ]));
        let outcome = client(Arc::clone(&caller))
            .generate::<Verdict>("prompt", ModelName::Primary)
            .await;

        assert!(outcome.result.is_ok());
        assert_eq!(caller.calls(), 3);
        assert_eq!(
            caller.models(),
            vec!["primary-model", "primary-model", "fallback-model"]
        );
        // Attempt counter resets on escalation.
        assert_eq!(outcome.attempts[2].attempt_number, 0);
        assert_eq!(outcome.attempts[2].model, "fallback-model");
    }

    #[tokio::test]
    async fn fallback_budget_reset_doubles_total_attempts() {
        // Intentional: the fallback gets its own full retry budget, so with
        // max_retries = 1 the worst case is 2 * (1 + 1) = 4 upstream calls.
        let caller = Arc::new(ScriptedCaller::new(vec![
            Ok(INVALID_RANGE.to_string());
            4
        ]));
        let outcome = client(Arc::clone(&caller))
            .generate::<Verdict>("prompt", ModelName::Primary)
            .await;

        let failure = outcome.result.unwrap_err();
        assert!(failure.message.contains("All models failed validation"));
        assert_eq!(caller.calls(), 4);
        assert_eq!(outcome.attempts.len(), 4);
        assert_eq!(
            caller.models(),
            vec![
                "primary-model",
                "primary-model",
                "fallback-model",
                "fallback-model"
            ]
        );
    }

    #[tokio::test]
    async fn fallback_disabled_fails_after_primary_budget() {
        let caller = Arc::new(ScriptedCaller::new(vec![
            Ok(INVALID_RANGE.to_string());
            4
        ]));
        let config = GenerationConfig {
            enable_fallback: false,
            ..test_config()
        };
        let outcome = GenerationClient::new(Arc::clone(&caller) as Arc<dyn ModelCaller>, config)
            .generate::<Verdict>("prompt", ModelName::Primary)
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(caller.calls(), 2);
        assert_eq!(caller.models(), vec!["primary-model", "primary-model"]);
    }

    #[tokio::test]
    async fn timeout_is_terminal_with_no_further_calls() {
        let caller = Arc::new(ScriptedCaller::new(vec![Err(CallError::Timeout(60))]));
        let outcome = client(Arc::clone(&caller))
            .generate::<Verdict>("prompt", ModelName::Primary)
            .await;

        let failure = outcome.result.unwrap_err();
        assert!(failure.message.contains("timed out after 60 seconds"));
        assert_eq!(caller.calls(), 1);
        assert_eq!(outcome.attempts.len(), 1);
    }

    #[tokio::test]
    async fn transport_error_is_terminal_with_no_further_calls() {
        let caller = Arc::new(ScriptedCaller::new(vec![Err(CallError::Transport(502))]));
        let outcome = client(Arc::clone(&caller))
            .generate::<Verdict>("prompt", ModelName::Primary)
            .await;

        let failure = outcome.result.unwrap_err();
        assert!(failure.message.contains("status 502"));
        assert_eq!(caller.calls(), 1);
    }

    #[tokio::test]
    async fn unexpected_error_preserves_message() {
        let caller = Arc::new(ScriptedCaller::new(vec![Err(CallError::Other(
            "connection reset by peer".to_string(),
        ))]));
        let outcome = client(Arc::clone(&caller))
            .generate::<Verdict>("prompt", ModelName::Primary)
            .await;

        let failure = outcome.result.unwrap_err();
        assert!(failure.message.contains("connection reset by peer"));
    }

    #[tokio::test]
    async fn fenced_response_validates() {
        let fenced = format!("```json\n{VALID}\n```");
        let caller = Arc::new(ScriptedCaller::new(vec![Ok(fenced)]));
        let outcome = client(Arc::clone(&caller))
            .generate::<Verdict>("prompt", ModelName::Primary)
            .await;
        assert!(outcome.result.is_ok());
        assert_eq!(caller.calls(), 1);
    }

    #[tokio::test]
    async fn starting_on_fallback_never_escalates() {
        let caller = Arc::new(ScriptedCaller::new(vec![
            Ok(INVALID_RANGE.to_string());
            4
        ]));
        let outcome = client(Arc::clone(&caller))
            .generate::<Verdict>("prompt", ModelName::Fallback)
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(caller.calls(), 2);
        assert_eq!(caller.models(), vec!["fallback-model", "fallback-model"]);
    }

    #[test]
    fn recovery_transitions_are_pure() {
        let config = test_config();
        assert_eq!(
            next_recovery(ModelName::Primary, 0, &config),
            Recovery::Retry
        );
        assert_eq!(
            next_recovery(ModelName::Primary, 1, &config),
            Recovery::Escalate
        );
        assert_eq!(
            next_recovery(ModelName::Fallback, 0, &config),
            Recovery::Retry
        );
        assert_eq!(
            next_recovery(ModelName::Fallback, 1, &config),
            Recovery::Fail
        );

        let no_fallback = GenerationConfig {
            enable_fallback: false,
            ..test_config()
        };
        assert_eq!(
            next_recovery(ModelName::Primary, 1, &no_fallback),
            Recovery::Fail
        );
    }

    #[test]
    fn call_states_track_model_and_attempt() {
        assert_eq!(
            CallState::in_flight(ModelName::Primary, 0),
            CallState::CallingPrimary
        );
        assert_eq!(
            CallState::in_flight(ModelName::Primary, 2),
            CallState::RetryingPrimary
        );
        assert_eq!(
            CallState::in_flight(ModelName::Fallback, 0),
            CallState::CallingFallback
        );
        assert_eq!(
            CallState::in_flight(ModelName::Fallback, 1),
            CallState::RetryingFallback
        );
    }
}
