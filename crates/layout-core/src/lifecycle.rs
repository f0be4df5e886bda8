//! One-way lifecycle state machines for serials and arrays.
//!
//! # Serial lifecycle
//!
//! ```text
//!              engrave
//! ┌──────────┐ ───────► ┌──────────┐
//! │ Reserved │          │ Engraved │  (terminal)
//! └──────────┘ ───────► └──────────┘
//!              void     ┌──────────┐
//!                       │  Voided  │  (terminal)
//!                       └──────────┘
//! ```
//!
//! # Array workflow
//!
//! ```text
//! ┌─────────┐  start  ┌────────────┐  complete  ┌──────┐
//! │ Pending │ ──────► │ InProgress │ ─────────► │ Done │  (terminal)
//! └─────────┘         └────────────┘            └──────┘
//! ```
//!
//! Both machines are closed: an edge is legal only if it appears in the
//! machine's transition table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::LayoutError;

// ─────────────────────────────────────────────────────────────────────────────
// Serial status
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of an allocated serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialStatus {
    /// Allocated to an array that is being processed.
    Reserved,
    /// Physically applied to an item.
    Engraved,
    /// Abandoned; kept for audit and never reissued.
    Voided,
}

impl SerialStatus {
    /// Every legal edge of the serial lifecycle.
    pub const TRANSITIONS: &'static [(Self, Self)] = &[
        (Self::Reserved, Self::Engraved),
        (Self::Reserved, Self::Voided),
    ];

    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        Self::TRANSITIONS.contains(&(self, to))
    }

    /// Terminal states have no outgoing edges.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !Self::TRANSITIONS.iter().any(|(from, _)| *from == self)
    }

    /// Validate a transition, naming `subject` in the error.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidTransition`] if the edge is not listed.
    pub fn transition(
        self,
        to: Self,
        subject: impl fmt::Display,
    ) -> Result<Self, LayoutError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(LayoutError::invalid_transition(subject, self, to))
        }
    }

    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Engraved => "engraved",
            Self::Voided => "voided",
        }
    }
}

impl fmt::Display for SerialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SerialStatus {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(Self::Reserved),
            "engraved" => Ok(Self::Engraved),
            "voided" => Ok(Self::Voided),
            other => Err(LayoutError::invalid_input(format!(
                "unknown serial status: {other}"
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Work status
// ─────────────────────────────────────────────────────────────────────────────

/// Workflow state of an array and of every item on it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    #[default]
    Pending,
    InProgress,
    Done,
}

impl WorkStatus {
    /// Every legal edge of the array workflow.
    pub const TRANSITIONS: &'static [(Self, Self)] =
        &[(Self::Pending, Self::InProgress), (Self::InProgress, Self::Done)];

    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        Self::TRANSITIONS.contains(&(self, to))
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !Self::TRANSITIONS.iter().any(|(from, _)| *from == self)
    }

    /// Rows in this state may still be re-packed.
    #[must_use]
    pub const fn allows_redistribution(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    /// Validate a transition, naming `subject` in the error.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidTransition`] if the edge is not listed.
    pub fn transition(
        self,
        to: Self,
        subject: impl fmt::Display,
    ) -> Result<Self, LayoutError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(LayoutError::invalid_transition(subject, self, to))
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkStatus {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            other => Err(LayoutError::invalid_input(format!(
                "unknown work status: {other}"
            ))),
        }
    }
}
