use serde_json::json;

use super::schema::{BiasReport, StructuredDecision};
use crate::models::{DecisionInput, ReflectionContext};

/// Instructions for the decision structuring stage.
const STRUCTURING_INSTRUCTIONS: &str = r#"You are a decision structuring assistant. Transform messy human input into a clear, structured decision model.

Extract and structure:
1. decision_goal: A clear, single-sentence statement of what needs to be decided
2. constraints: All explicit and implicit constraints (provided and inferred)
3. options: All available decision options (provided and inferred)
4. assumptions: Hidden assumptions that are being made
5. missing_information: Critical information gaps that would improve the decision

Rules:
- Be precise and factual
- Do not add speculative information
- Surface implicit constraints and assumptions
- Identify genuine information gaps

Return ONLY valid JSON in this EXACT format (no markdown, no code blocks):
{
  "decision_goal": "Clear statement here",
  "constraints": ["constraint 1", "constraint 2"],
  "options": ["option 1", "option 2"],
  "assumptions": ["assumption 1", "assumption 2"],
  "missing_information": ["info gap 1", "info gap 2"]
}"#;

/// Instructions for the bias detection stage.
const BIAS_DETECTION_INSTRUCTIONS: &str = r#"You are a cognitive bias detection assistant. Identify biases that may be influencing this decision.

Common biases include:
- Confirmation bias: Seeking information that confirms existing beliefs
- Anchoring bias: Over-relying on the first piece of information
- Status quo bias: Preferring things to stay the same
- Sunk cost fallacy: Continuing based on past investment
- Availability heuristic: Overweighting recent or memorable information
- Optimism bias: Overestimating positive outcomes

For each bias detected, name it and provide specific evidence from the
structured decision. Then assess an overall severity_score (0.0 to 1.0).

Rules:
- Only detect biases with clear evidence
- Do not diagnose mental states
- Be conservative with severity scores
- If no biases are detected, return an empty list with severity_score 0.0

Return ONLY valid JSON in this EXACT format (no markdown, no code blocks):
{
  "detected_biases": ["Bias Name 1", "Bias Name 2"],
  "evidence": {
    "Bias Name 1": "Evidence text here",
    "Bias Name 2": "Evidence text here"
  },
  "severity_score": 0.5
}"#;

/// Instructions for the outcome simulation stage.
const OUTCOME_SIMULATION_INSTRUCTIONS: &str = r#"You are an outcome simulation assistant. Generate realistic future scenarios for this decision.

Generate exactly 3 scenarios:
1. best_case: The most optimistic realistic outcome
2. worst_case: The most pessimistic realistic outcome
3. most_likely: The most probable outcome

For each scenario, provide:
- description: What happens in this scenario (minimum 20 characters)
- risks: Specific risks associated with this scenario
- confidence: Your confidence in this scenario (0.0 to 1.0)
- timeframe_months: When this outcome would materialize (1-120 months)

Rules:
- Be realistic, not fantastical
- No guarantees or certainties
- Confidence scores must reflect genuine uncertainty
- Risks must be concrete and actionable
- Consider the detected biases when simulating outcomes

Return ONLY valid JSON in this EXACT format (no markdown, no code blocks):
{
  "scenarios": [
    {"scenario": "best_case", "description": "...", "risks": ["..."], "confidence": 0.3, "timeframe_months": 12},
    {"scenario": "worst_case", "description": "...", "risks": ["..."], "confidence": 0.2, "timeframe_months": 6},
    {"scenario": "most_likely", "description": "...", "risks": ["..."], "confidence": 0.5, "timeframe_months": 18}
  ]
}"#;

/// Instructions for the reflection stage.
const REFLECTION_INSTRUCTIONS: &str = r#"You are a reflection assistant. Compare predicted outcomes with actual results and extract learning insights.

Analyze:
1. accuracy_score: How accurate were the predictions? (0.0 to 1.0)
2. lessons_learned: What can be learned from this decision?
3. repeated_patterns: Are there recurring decision-making patterns?

Rules:
- Focus on learning, not judgment
- Be honest about prediction accuracy
- Identify actionable lessons
- Keep insights constructive and forward-looking

Return ONLY valid JSON in this EXACT format (no markdown, no code blocks):
{
  "accuracy_score": 0.75,
  "lessons_learned": ["lesson 1", "lesson 2"],
  "repeated_patterns": ["pattern 1"]
}"#;

fn bulleted(items: &[String]) -> String {
    if items.is_empty() {
        "  (none provided)".to_string()
    } else {
        items
            .iter()
            .map(|item| format!("  - {item}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn pretty(value: &impl serde::Serialize) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Stage 1 prompt: raw user input, formatted for extraction.
pub fn build_structuring_prompt(input: &DecisionInput) -> String {
    format!(
        "{STRUCTURING_INSTRUCTIONS}\n\nTitle: {}\nContext: {}\nConstraints:\n{}\nOptions:\n{}",
        input.title,
        input.context,
        bulleted(&input.constraints),
        bulleted(&input.options),
    )
}

/// Stage 2 prompt: the validated structured decision as JSON.
pub fn build_bias_detection_prompt(structured: &StructuredDecision) -> String {
    format!(
        "{BIAS_DETECTION_INSTRUCTIONS}\n\nStructured Decision:\n{}",
        pretty(structured)
    )
}

/// Stage 3 prompt: structured decision plus bias report as JSON.
pub fn build_outcome_simulation_prompt(
    structured: &StructuredDecision,
    biases: &BiasReport,
) -> String {
    format!(
        "{OUTCOME_SIMULATION_INSTRUCTIONS}\n\nStructured Decision:\n{}\n\nBias Report:\n{}",
        pretty(structured),
        pretty(biases),
    )
}

/// Reflection prompt: the original decision, its predictions, and what
/// actually happened.
pub fn build_reflection_prompt(reflection: &ReflectionContext) -> String {
    let decision = json!({
        "title": reflection.title,
        "context": reflection.context,
        "structured_decision": reflection.structured_decision,
        "bias_report": reflection.bias_report,
    });
    format!(
        "{REFLECTION_INSTRUCTIONS}\n\nOriginal Decision:\n{}\n\nPredicted Outcomes:\n{}\n\nActual Outcome:\n{}",
        pretty(&decision),
        pretty(&reflection.outcome_simulation),
        reflection.actual_outcome,
    )
}
