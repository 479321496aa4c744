use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::generation::{AttemptRecord, GenerationClient, ModelName};
use super::prompt::{
    build_bias_detection_prompt, build_outcome_simulation_prompt, build_reflection_prompt,
    build_structuring_prompt,
};
use super::schema::{
    BiasReport, OutcomeSimulation, ReflectionInsight, StageSchema, StructuredDecision,
};
use super::TerminalFailure;
use crate::models::{
    DecisionInput, DecisionRecord, DecisionSummary, EntryStatus, ExecutionLogEntry, NewDecision,
    ReflectionContext, ReflectionUpdate,
};

/// Stage names as they appear in the execution log.
pub const STAGE_STRUCTURING: &str = "structuring";
pub const STAGE_BIAS_DETECTION: &str = "bias_detection";
pub const STAGE_OUTCOME_SIMULATION: &str = "outcome_simulation";
pub const STAGE_REFLECTION: &str = "reflection";

/// Log marker appended when a pipeline run aborts.
const PIPELINE_FAILED: &str = "pipeline_failed";

/// Opaque persistence failure, as seen from the pipeline.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

/// External persistence collaborator. Implementations are expected to be
/// task-safe and to commit or roll back each operation as a unit.
pub trait DecisionStore: Send + Sync {
    /// Persist a fully assembled decision; returns the stored record with
    /// its generated id and timestamps.
    fn save(&self, decision: &NewDecision) -> Result<DecisionRecord, StoreError>;

    fn find_by_id(&self, id: &Uuid) -> Result<Option<DecisionRecord>, StoreError>;

    /// Apply reflection fields to an existing decision.
    fn update_reflection(
        &self,
        id: &Uuid,
        update: &ReflectionUpdate,
    ) -> Result<DecisionRecord, StoreError>;

    /// Summaries of all decisions, newest first.
    fn list(&self) -> Result<Vec<DecisionSummary>, StoreError>;
}

/// Validated stage outputs accumulated across one pipeline run. Each field
/// is produced exactly once, in stage order, and never mutated afterward.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub structured_decision: StructuredDecision,
    pub bias_report: BiasReport,
    pub outcome_simulation: OutcomeSimulation,
}

/// Orchestrates the analysis pipeline:
/// structuring → bias detection → outcome simulation, plus deferred
/// reflection once an actual outcome arrives.
///
/// Stages run strictly in order; each prompt is built from the previous
/// stages' validated outputs. Every attempt the generation client makes
/// becomes one execution-log entry; a run that fails appends a final
/// `pipeline_failed` marker and persists nothing.
pub struct DecisionPipeline {
    client: GenerationClient,
    store: Arc<dyn DecisionStore>,
}

impl DecisionPipeline {
    pub fn new(client: GenerationClient, store: Arc<dyn DecisionStore>) -> Self {
        Self { client, store }
    }

    /// Run the full creation pipeline and persist the assembled result.
    ///
    /// All-or-nothing: if any stage fails, nothing is handed to the store
    /// and the terminal failure propagates to the caller.
    pub async fn process_decision(
        &self,
        input: DecisionInput,
    ) -> Result<DecisionRecord, TerminalFailure> {
        let pipeline_started = Utc::now();
        let mut log: Vec<ExecutionLogEntry> = Vec::new();

        tracing::info!(title = %input.title, "pipeline started");

        let context = match self.run_stages(&input, &mut log).await {
            Ok(context) => context,
            Err(failure) => {
                let marker = pipeline_failed_entry(pipeline_started, &failure);
                tracing::error!(
                    error = %failure,
                    duration_ms = marker.duration_ms,
                    "pipeline failed"
                );
                log.push(marker);
                return Err(failure);
            }
        };

        let elapsed_ms = (Utc::now() - pipeline_started).num_milliseconds();
        tracing::info!(duration_ms = elapsed_ms, "pipeline completed");

        let assembled = NewDecision {
            input,
            structured_decision: context.structured_decision,
            bias_report: context.bias_report,
            outcome_simulation: context.outcome_simulation,
            execution_log: log,
        };

        let record = self
            .store
            .save(&assembled)
            .map_err(|e| TerminalFailure::new(format!("Failed to save decision: {e}")))?;

        tracing::info!(decision_id = %record.id, title = %record.title, "decision saved");
        Ok(record)
    }

    /// The three creation stages, in order. Appends log entries for every
    /// attempt made; returns the accumulated context only if all validate.
    async fn run_stages(
        &self,
        input: &DecisionInput,
        log: &mut Vec<ExecutionLogEntry>,
    ) -> Result<PipelineContext, TerminalFailure> {
        let prompt = build_structuring_prompt(input);
        let structured_decision: StructuredDecision =
            self.run_stage(STAGE_STRUCTURING, &prompt, log).await?;

        let prompt = build_bias_detection_prompt(&structured_decision);
        let bias_report: BiasReport = self.run_stage(STAGE_BIAS_DETECTION, &prompt, log).await?;

        let prompt = build_outcome_simulation_prompt(&structured_decision, &bias_report);
        let outcome_simulation: OutcomeSimulation = self
            .run_stage(STAGE_OUTCOME_SIMULATION, &prompt, log)
            .await?;

        Ok(PipelineContext {
            structured_decision,
            bias_report,
            outcome_simulation,
        })
    }

    /// Run the deferred reflection stage against a persisted decision.
    ///
    /// Unknown ids fail with a "not found" message before any model call.
    /// A failed reflection leaves the stored decision untouched; a
    /// successful one extends the existing execution log rather than
    /// replacing it.
    pub async fn add_reflection(
        &self,
        decision_id: Uuid,
        actual_outcome: &str,
    ) -> Result<DecisionRecord, TerminalFailure> {
        let record = self
            .store
            .find_by_id(&decision_id)
            .map_err(|e| TerminalFailure::new(format!("Failed to load decision: {e}")))?
            .ok_or_else(|| TerminalFailure::not_found(&decision_id))?;

        tracing::info!(decision_id = %decision_id, "reflection started");

        let reflection = ReflectionContext::from_record(&record, actual_outcome);
        let prompt = build_reflection_prompt(&reflection);

        let mut new_entries: Vec<ExecutionLogEntry> = Vec::new();
        let insight: ReflectionInsight = self
            .run_stage(STAGE_REFLECTION, &prompt, &mut new_entries)
            .await?;

        let mut execution_log = record.execution_log;
        execution_log.extend(new_entries);

        let update = ReflectionUpdate {
            reflection_insight: insight,
            actual_outcome: actual_outcome.to_string(),
            actual_outcome_date: Utc::now(),
            execution_log,
        };

        let updated = self
            .store
            .update_reflection(&decision_id, &update)
            .map_err(|e| TerminalFailure::new(format!("Failed to add reflection: {e}")))?;

        tracing::info!(decision_id = %decision_id, "reflection completed");
        Ok(updated)
    }

    /// One generation stage: call the client, convert every attempt into a
    /// log entry, surface the validated value or the terminal failure.
    async fn run_stage<T: StageSchema>(
        &self,
        stage: &str,
        prompt: &str,
        log: &mut Vec<ExecutionLogEntry>,
    ) -> Result<T, TerminalFailure> {
        tracing::info!(stage, "stage started");
        let outcome = self.client.generate::<T>(prompt, ModelName::Primary).await;
        log.extend(
            outcome
                .attempts
                .iter()
                .map(|attempt| entry_from_attempt(stage, attempt)),
        );

        match &outcome.result {
            Ok(_) => tracing::info!(stage, attempts = outcome.attempts.len(), "stage succeeded"),
            Err(failure) => tracing::error!(
                stage,
                attempts = outcome.attempts.len(),
                error = %failure,
                "stage failed"
            ),
        }
        outcome.result
    }
}

fn entry_from_attempt(stage: &str, attempt: &AttemptRecord) -> ExecutionLogEntry {
    ExecutionLogEntry {
        stage: stage.to_string(),
        status: if attempt.succeeded() {
            EntryStatus::Success
        } else {
            EntryStatus::Failed
        },
        started_at: attempt.started_at,
        finished_at: attempt.finished_at,
        duration_ms: attempt.duration_ms,
        model_used: Some(attempt.model.clone()),
        error: attempt.error.clone(),
    }
}

fn pipeline_failed_entry(
    pipeline_started: DateTime<Utc>,
    failure: &TerminalFailure,
) -> ExecutionLogEntry {
    let finished_at = Utc::now();
    ExecutionLogEntry {
        stage: PIPELINE_FAILED.to_string(),
        status: EntryStatus::Failed,
        started_at: pipeline_started,
        finished_at,
        duration_ms: (finished_at - pipeline_started).num_milliseconds(),
        model_used: None,
        error: Some(failure.message.clone()),
    }
}
