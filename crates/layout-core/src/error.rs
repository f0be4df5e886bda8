//! Error taxonomy for the layout core.
//!
//! Every variant names the serial, array, row or category it concerns so an
//! operator can act on it without digging through logs.

use std::fmt;

use thiserror::Error;

use crate::Serial;

/// Result alias used across the layout crates.
pub type LayoutResult<T> = Result<T, LayoutError>;

/// Transaction stage that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxStage {
    Begin,
    Commit,
    Rollback,
}

impl TxStage {
    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        }
    }
}

impl fmt::Display for TxStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layout core error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    // ─────────────────────────────────────────────────────────────────────────
    // Allocation
    // ─────────────────────────────────────────────────────────────────────────
    #[error("capacity exhausted for {resource}: requested {requested}, remaining {remaining}")]
    CapacityExhausted {
        resource: String,
        requested: u64,
        remaining: u64,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────
    #[error("invalid transition for {subject}: {from} -> {to}")]
    InvalidTransition {
        subject: String,
        from: String,
        to: String,
    },

    #[error("partial commit: expected {expected} engraved serials, found {actual} (not engraved: {})", format_serials(.unresolved))]
    PartialCommit {
        expected: usize,
        actual: usize,
        unresolved: Vec<Serial>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Slot placement
    // ─────────────────────────────────────────────────────────────────────────
    #[error("slot overflow on {array}: {requested} item(s) requested, {available} slot(s) available of {capacity}")]
    SlotOverflow {
        array: String,
        capacity: u8,
        requested: usize,
        available: usize,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Store
    // ─────────────────────────────────────────────────────────────────────────
    #[error("transaction {stage} failed during {operation}: {reason}")]
    TransactionFailure {
        operation: String,
        stage: TxStage,
        reason: String,
    },

    #[error("store busy: {reason}")]
    Busy { reason: String },

    #[error("conflict: {reason}")]
    Conflict { reason: String },

    #[error("store error: {0}")]
    Store(String),

    // ─────────────────────────────────────────────────────────────────────────
    // Input
    // ─────────────────────────────────────────────────────────────────────────
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl LayoutError {
    /// Build an [`LayoutError::InvalidTransition`].
    pub fn invalid_transition(
        subject: impl fmt::Display,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            subject: subject.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Build an [`LayoutError::InvalidInput`].
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Build a [`LayoutError::NotFound`].
    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    /// Whether the caller may simply retry the operation.
    ///
    /// Only lock contention qualifies; a partial commit in particular needs an
    /// operator.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }

    /// Whether this error indicates store-level trouble.
    #[must_use]
    pub const fn is_transaction_failure(&self) -> bool {
        matches!(self, Self::TransactionFailure { .. })
    }
}

fn format_serials(serials: &[Serial]) -> String {
    if serials.is_empty() {
        return "none".to_string();
    }
    serials
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
