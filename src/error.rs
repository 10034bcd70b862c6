//! Error types for Synheart Insight
//!
//! Only malformed input is an error. Sparse data, singular matrices and
//! unmapped interventions are reported as [`crate::types::Limitation`] values
//! on otherwise successful results.

use thiserror::Error;

/// Errors raised at the input boundary, before any computation runs
#[derive(Debug, Error)]
pub enum InsightError {
    #[error("Failed to parse request: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid input at {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Encoding error: {0}")]
    EncodingError(String),
}

impl InsightError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        InsightError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
