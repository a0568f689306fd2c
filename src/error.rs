//! Error types for pg_colocation.
//!
//! All errors that can occur while analysing a query are represented by
//! [`ColocationError`]. Errors are propagated via `Result<T, ColocationError>`
//! throughout the codebase and surface to the host planner, which aborts the
//! planning attempt.
//!
//! # Error Classification
//!
//! - **User**: invalid settings, unreadable inputs, malformed serialized
//!   query trees. Fixable by the caller.
//! - **Internal**: the query tree handed over by the planner is internally
//!   inconsistent (e.g. a column points past a subquery's target list).
//!   Indicates a bug upstream; never retried.
//!
//! Shapes the analysis cannot reason about are *not* errors: they degrade to
//! "not safe to push down" without producing a `ColocationError`.

use std::fmt;

/// Primary error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum ColocationError {
    // ── User errors ──────────────────────────────────────────────────────
    /// A metadata value is unknown or inconsistent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The settings file could not be read or parsed.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A serialized analysis input could not be decoded.
    #[error("input error: {0}")]
    InputError(String),

    /// The query tree arena violates the children-before-parents ordering.
    #[error("invalid query tree: {0}")]
    InvalidQueryTree(String),

    // ── Internal errors, should not happen ──────────────────────────────
    /// The query tree references something that does not exist.
    #[error("internal error: {0}")]
    InternalError(String),
}

/// Classification of error kind for callers that report or count failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColocationErrorKind {
    User,
    Internal,
}

impl fmt::Display for ColocationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColocationErrorKind::User => write!(f, "USER"),
            ColocationErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

impl ColocationError {
    /// Classify the error.
    pub fn kind(&self) -> ColocationErrorKind {
        match self {
            ColocationError::InvalidArgument(_)
            | ColocationError::ConfigError(_)
            | ColocationError::InputError(_)
            | ColocationError::InvalidQueryTree(_) => ColocationErrorKind::User,

            ColocationError::InternalError(_) => ColocationErrorKind::Internal,
        }
    }

    /// Whether the planning attempt must be aborted. Malformed query trees
    /// abort; settings and replay-input errors are reported to the caller.
    pub fn aborts_planning(&self) -> bool {
        matches!(
            self,
            ColocationError::InternalError(_) | ColocationError::InvalidQueryTree(_)
        )
    }

    /// Build the fatal error raised when a column reference points at a
    /// target-list position a subquery does not have.
    pub fn missing_subquery_attribute(alias: &str, attribute: i16) -> Self {
        ColocationError::InternalError(format!(
            "subquery \"{alias}\" does not have attribute {attribute}"
        ))
    }
}
