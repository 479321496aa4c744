use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a raw model response failed to become a validated stage output.
#[derive(Debug, Clone, Error)]
pub enum SchemaViolation {
    #[error("response is not valid JSON: {0}")]
    Json(String),

    #[error("{0}")]
    Constraint(String),
}

/// A stage output schema: a deserializable shape plus the semantic
/// constraints serde cannot express. Implementors are pure data; the
/// validator does no I/O.
pub trait StageSchema: DeserializeOwned {
    /// Schema identifier used in generation requests and log records.
    const NAME: &'static str;

    /// Check constraints beyond field presence (ranges, counts, tags).
    fn validate(&self) -> Result<(), SchemaViolation>;
}

/// Parse raw model output into a validated `T`.
///
/// Strips surrounding markdown code fences first, since models routinely wrap
/// JSON in ```json fences despite instructions not to.
pub fn parse_validated<T: StageSchema>(raw: &str) -> Result<T, SchemaViolation> {
    let cleaned = strip_code_fences(raw);
    let value: T =
        serde_json::from_str(cleaned).map_err(|e| SchemaViolation::Json(e.to_string()))?;
    value.validate()?;
    Ok(value)
}

/// Remove a surrounding markdown code fence (``` or ```json) if present.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if text.starts_with("```") {
        text = match text.find('\n') {
            Some(idx) => &text[idx + 1..],
            None => "",
        };
        if let Some(stripped) = text.trim_end().strip_suffix("```") {
            text = stripped;
        }
    }
    text.trim()
}

fn require_unit_interval(name: &str, value: f64) -> Result<(), SchemaViolation> {
    if !(0.0..=1.0).contains(&value) || !value.is_finite() {
        return Err(SchemaViolation::Constraint(format!(
            "{name} must be between 0.0 and 1.0, got {value}"
        )));
    }
    Ok(())
}

// ──────────────────────────────────────────────
// Stage 1: decision structuring
// ──────────────────────────────────────────────

/// Structured representation of a decision after the first analysis stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredDecision {
    /// Clear, single-sentence statement of what needs to be decided.
    pub decision_goal: String,
    /// All explicit and implicit constraints affecting the decision.
    pub constraints: Vec<String>,
    /// All available options, provided and inferred.
    pub options: Vec<String>,
    /// Hidden assumptions surfaced from the input.
    pub assumptions: Vec<String>,
    /// Critical information gaps that would improve the decision.
    pub missing_information: Vec<String>,
}

impl StageSchema for StructuredDecision {
    const NAME: &'static str = "structured_decision";

    fn validate(&self) -> Result<(), SchemaViolation> {
        if self.decision_goal.trim().is_empty() {
            return Err(SchemaViolation::Constraint(
                "decision_goal must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Stage 2: bias detection
// ──────────────────────────────────────────────

/// Cognitive biases detected in the decision, with per-bias evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasReport {
    pub detected_biases: Vec<String>,
    /// Evidence for each detected bias, keyed by bias name.
    pub evidence: HashMap<String, String>,
    /// Overall severity from 0.0 (no bias) to 1.0 (severe).
    pub severity_score: f64,
}

impl StageSchema for BiasReport {
    const NAME: &'static str = "bias_report";

    fn validate(&self) -> Result<(), SchemaViolation> {
        require_unit_interval("severity_score", self.severity_score)
    }
}

// ──────────────────────────────────────────────
// Stage 3: outcome simulation
// ──────────────────────────────────────────────

/// Tag identifying which of the three simulated futures a scenario is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    BestCase,
    WorstCase,
    MostLikely,
}

impl ScenarioKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BestCase => "best_case",
            Self::WorstCase => "worst_case",
            Self::MostLikely => "most_likely",
        }
    }
}

/// One simulated future outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeScenario {
    pub scenario: ScenarioKind,
    pub description: String,
    pub risks: Vec<String>,
    /// Confidence that this scenario occurs, 0.0 to 1.0.
    pub confidence: f64,
    /// When this outcome would materialize, 1 to 120 months.
    pub timeframe_months: u32,
}

/// Minimum scenario description length, in characters.
const MIN_SCENARIO_DESCRIPTION: usize = 20;

impl OutcomeScenario {
    fn validate(&self) -> Result<(), SchemaViolation> {
        if self.description.chars().count() < MIN_SCENARIO_DESCRIPTION {
            return Err(SchemaViolation::Constraint(format!(
                "{} description must be at least {MIN_SCENARIO_DESCRIPTION} characters",
                self.scenario.as_str()
            )));
        }
        require_unit_interval("confidence", self.confidence)?;
        if !(1..=120).contains(&self.timeframe_months) {
            return Err(SchemaViolation::Constraint(format!(
                "timeframe_months must be between 1 and 120, got {}",
                self.timeframe_months
            )));
        }
        Ok(())
    }
}

/// The complete simulation: exactly one scenario per tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeSimulation {
    pub scenarios: Vec<OutcomeScenario>,
}

impl OutcomeSimulation {
    /// The scenario carrying a given tag, if present.
    pub fn scenario(&self, kind: ScenarioKind) -> Option<&OutcomeScenario> {
        self.scenarios.iter().find(|s| s.scenario == kind)
    }
}

impl StageSchema for OutcomeSimulation {
    const NAME: &'static str = "outcome_simulation";

    fn validate(&self) -> Result<(), SchemaViolation> {
        if self.scenarios.len() != 3 {
            return Err(SchemaViolation::Constraint(format!(
                "expected exactly 3 scenarios, got {}",
                self.scenarios.len()
            )));
        }
        for kind in [
            ScenarioKind::BestCase,
            ScenarioKind::WorstCase,
            ScenarioKind::MostLikely,
        ] {
            let count = self.scenarios.iter().filter(|s| s.scenario == kind).count();
            if count != 1 {
                return Err(SchemaViolation::Constraint(format!(
                    "expected exactly one {} scenario, got {count}",
                    kind.as_str()
                )));
            }
        }
        for scenario in &self.scenarios {
            scenario.validate()?;
        }
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Stage 4: reflection
// ──────────────────────────────────────────────

/// Lessons extracted by comparing predictions against the actual outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionInsight {
    /// How accurate the predictions were, 0.0 to 1.0.
    pub accuracy_score: f64,
    pub lessons_learned: Vec<String>,
    #[serde(default)]
    pub repeated_patterns: Vec<String>,
}

impl StageSchema for ReflectionInsight {
    const NAME: &'static str = "reflection_insight";

    fn validate(&self) -> Result<(), SchemaViolation> {
        require_unit_interval("accuracy_score", self.accuracy_score)?;
        if self.lessons_learned.is_empty() {
            return Err(SchemaViolation::Constraint(
                "lessons_learned must contain at least one entry".to_string(),
            ));
        }
        Ok(())
    }
}
