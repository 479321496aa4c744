//! HTTP boundary for the analysis pipeline.
//!
//! Thin wrapper: request validation, status mapping, and serialization.
//! The router is composable: `api_router()` returns a `Router` that can be
//! mounted on any axum server instance.

pub mod error;
pub mod router;
pub mod types;

pub use error::ApiError;
pub use router::api_router;
pub use types::AppContext;
