//! Error types for core value parsing and state transitions.

/// A string did not name a variant of a closed enum (pool, plan, status, ...).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    /// What was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// A status change that the one-directional lifecycle does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition from {from} to {to}")]
pub struct TransitionError {
    /// The current status.
    pub from: String,
    /// The requested status.
    pub to: String,
}

/// A grant would push a pool or the organization total past `i64::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("credit would overflow the balance")]
pub struct BalanceOverflow;
