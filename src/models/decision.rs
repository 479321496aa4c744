use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::pipeline::schema::{BiasReport, OutcomeSimulation, ReflectionInsight, StructuredDecision};

/// Title length bounds, in characters.
const TITLE_MIN: usize = 5;
const TITLE_MAX: usize = 500;

/// Context length bounds, in characters.
const CONTEXT_MIN: usize = 10;
const CONTEXT_MAX: usize = 5000;

/// Minimum actual-outcome length, in characters.
const ACTUAL_OUTCOME_MIN: usize = 20;

/// Rejected boundary input, with a caller-facing reason.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct InvalidInput(pub String);

/// A decision problem as submitted by the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionInput {
    pub title: String,
    pub context: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

impl DecisionInput {
    /// Enforce the length bounds of the input contract.
    pub fn validate(&self) -> Result<(), InvalidInput> {
        let title_len = self.title.chars().count();
        if !(TITLE_MIN..=TITLE_MAX).contains(&title_len) {
            return Err(InvalidInput(format!(
                "title must be between {TITLE_MIN} and {TITLE_MAX} characters, got {title_len}"
            )));
        }
        let context_len = self.context.chars().count();
        if !(CONTEXT_MIN..=CONTEXT_MAX).contains(&context_len) {
            return Err(InvalidInput(format!(
                "context must be between {CONTEXT_MIN} and {CONTEXT_MAX} characters, got {context_len}"
            )));
        }
        Ok(())
    }
}

/// A reflection request: what actually happened after the decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionInput {
    pub actual_outcome: String,
}

impl ReflectionInput {
    pub fn validate(&self) -> Result<(), InvalidInput> {
        let len = self.actual_outcome.chars().count();
        if len < ACTUAL_OUTCOME_MIN {
            return Err(InvalidInput(format!(
                "actual_outcome must be at least {ACTUAL_OUTCOME_MIN} characters, got {len}"
            )));
        }
        Ok(())
    }
}

/// Outcome of one stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Success,
    Failed,
}

/// One row of the audit trail: a single call attempt within a pipeline run.
///
/// Entries are appended in chronological order, one per attempt actually
/// made (a stage that retries contributes several), and are never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub stage: String,
    pub status: EntryStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    /// Concrete model name; absent on entries that made no model call
    /// (e.g. the pipeline_failed marker).
    pub model_used: Option<String>,
    pub error: Option<String>,
}

/// A fully analyzed decision, assembled by the orchestrator and not yet
/// persisted. All stage outputs are present; creation is all-or-nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDecision {
    pub input: DecisionInput,
    pub structured_decision: StructuredDecision,
    pub bias_report: BiasReport,
    pub outcome_simulation: OutcomeSimulation,
    pub execution_log: Vec<ExecutionLogEntry>,
}

/// A persisted decision with all analysis results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub context: String,
    pub constraints: Vec<String>,
    pub options: Vec<String>,
    pub structured_decision: StructuredDecision,
    pub bias_report: BiasReport,
    pub outcome_simulation: OutcomeSimulation,
    pub reflection_insight: Option<ReflectionInsight>,
    pub actual_outcome: Option<String>,
    pub actual_outcome_date: Option<DateTime<Utc>>,
    pub execution_log: Vec<ExecutionLogEntry>,
}

impl DecisionRecord {
    pub fn has_reflection(&self) -> bool {
        self.reflection_insight.is_some()
    }
}

/// Listing row: enough to render an index without loading stage outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSummary {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub has_reflection: bool,
}

/// Everything the reflection stage needs: the persisted decision's fields
/// plus the user-supplied actual outcome. Built per reflection request; does
/// not share lifecycle with a pipeline run.
#[derive(Debug, Clone)]
pub struct ReflectionContext {
    pub title: String,
    pub context: String,
    pub structured_decision: StructuredDecision,
    pub bias_report: BiasReport,
    pub outcome_simulation: OutcomeSimulation,
    pub actual_outcome: String,
}

impl ReflectionContext {
    pub fn from_record(record: &DecisionRecord, actual_outcome: &str) -> Self {
        Self {
            title: record.title.clone(),
            context: record.context.clone(),
            structured_decision: record.structured_decision.clone(),
            bias_report: record.bias_report.clone(),
            outcome_simulation: record.outcome_simulation.clone(),
            actual_outcome: actual_outcome.to_string(),
        }
    }
}

/// Fields written back when a reflection completes. The execution log is
/// the full extended log (existing entries plus the reflection attempts).
#[derive(Debug, Clone)]
pub struct ReflectionUpdate {
    pub reflection_insight: ReflectionInsight,
    pub actual_outcome: String,
    pub actual_outcome_date: DateTime<Utc>,
    pub execution_log: Vec<ExecutionLogEntry>,
}
