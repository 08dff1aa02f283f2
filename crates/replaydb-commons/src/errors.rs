//! Shared error type for ReplayDB.
//!
//! `ReplayError` is the domain error used across the core and RPC crates.
//! Its variants mirror the transport status kinds so that the single
//! translation point in `replaydb-rpc` stays mechanical.

use thiserror::Error;

/// Main error type for ReplayDB operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplayError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl ReplayError {
    /// Creates an InvalidArgument error with a message.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates a NotFound error with a message.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Creates a FailedPrecondition error with a message.
    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        Self::FailedPrecondition(msg.into())
    }

    /// Creates an Internal error with a message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Creates a DeadlineExceeded error with a message.
    pub fn deadline_exceeded(msg: impl Into<String>) -> Self {
        Self::DeadlineExceeded(msg.into())
    }

    /// Creates a Cancelled error with a message.
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Creates a ResourceExhausted error with a message.
    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }
}

/// Result type alias using ReplayError.
pub type Result<T> = std::result::Result<T, ReplayError>;
