//! Shared error type for shape normalization, plan caching, and row
//! demultiplexing.
#![forbid(unsafe_code)]

use std::error::Error as StdError;

use crate::query::value::ValueType;

/// Errors surfaced by the query-shape and demultiplexing layers.
#[derive(thiserror::Error, Debug)]
pub enum MuxError {
    /// Caller supplied an invalid request or argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Caller supplied an invalid request or argument (owned message).
    #[error("invalid argument: {0}")]
    InvalidOwned(String),
    /// Consumption was cancelled through its [`crate::demux::CancelToken`].
    #[error("operation cancelled")]
    Cancelled,
    /// The backend emitted rows that break group contiguity.
    #[error("row order violation: {0}")]
    RowOrder(String),
    /// Rows do not match the result shape they are read with.
    #[error("result shape mismatch: {0}")]
    Structural(String),
    /// A declared parameter slot has no bound value.
    #[error("missing value for parameter '{0}'")]
    MissingParameter(String),
    /// A bound value does not match the slot it is bound to.
    #[error("parameter '{name}' expects {expected} (got {found})")]
    ParameterMismatch {
        /// Synthetic slot name.
        name: String,
        /// Declared type of the cached slot.
        expected: ValueType,
        /// Type of the value offered for binding.
        found: ValueType,
    },
    /// The backend plan compiler rejected a shape.
    #[error("plan compilation failed: {0}")]
    Compile(String),
    /// The backend row source failed.
    #[error("row source failed: {0}")]
    Backend(#[source] Box<dyn StdError + Send + Sync>),
    /// A continuation token could not be decoded.
    #[error("malformed skip token: {0}")]
    SkipToken(String),
    /// A single root group grew beyond the configured buffer limit.
    #[error("root group exceeds {limit} buffered rows")]
    GroupTooLarge {
        /// Configured `max_group_rows`.
        limit: usize,
    },
}

impl MuxError {
    /// Wraps a backend failure.
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        MuxError::Backend(err.into())
    }

    /// Returns `true` when this error reports cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MuxError::Cancelled)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MuxError>;
