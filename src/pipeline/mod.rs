pub mod schema;
pub mod prompt;
pub mod generation;
pub mod openrouter;
pub mod orchestrator;

pub use schema::*;
pub use generation::*;
pub use openrouter::*;
pub use orchestrator::*;

use thiserror::Error;

/// The single failure kind the analysis core surfaces to callers.
///
/// Every unrecoverable condition (exhausted validation retries, upstream
/// timeout, transport error, missing decision, anything unexpected) collapses
/// into this one type. Callers that need to distinguish the missing-decision
/// case match on the message (see [`TerminalFailure::is_not_found`]); nothing
/// else is differentiated outside the core.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TerminalFailure {
    pub message: String,
}

impl TerminalFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Failure for a reflection request against an unknown decision id.
    /// The "not found" substring is the contract the HTTP layer maps to 404.
    pub fn not_found(decision_id: &uuid::Uuid) -> Self {
        Self::new(format!("Decision {decision_id} not found"))
    }

    pub fn is_not_found(&self) -> bool {
        self.message.to_lowercase().contains("not found")
    }
}
