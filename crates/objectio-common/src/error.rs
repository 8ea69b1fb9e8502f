//! Error types for ObjectIO
//!
//! This module defines the common error types shared by placement and the
//! metadata service. Domain failures of metadata commands are not errors;
//! they are response statuses.

use thiserror::Error;

/// Common result type for ObjectIO operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for ObjectIO
#[derive(Debug, Error)]
pub enum Error {
    // Placement errors
    #[error("insufficient nodes for placement: have {available}, need {required}")]
    InsufficientNodes { available: usize, required: usize },

    #[error("pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
