//! Serial numbers and their persisted records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ArrayRef, LayoutError, SerialStatus};

/// A 20-bit serial in `1..=1_048_575`.
///
/// Values are never reused: once allocated a serial stays allocated, even
/// after it is voided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Serial(u32);

impl Serial {
    /// Smallest valid serial.
    pub const MIN: u32 = 1;

    /// Largest value representable in the 20 data bits of a Micro-ID grid.
    pub const MAX: u32 = (1 << 20) - 1;

    /// Create a serial, checking the 20-bit range.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidInput`] outside `1..=1_048_575`.
    pub fn new(value: u32) -> Result<Self, LayoutError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(LayoutError::invalid_input(format!(
                "serial {value} outside {}..={}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Serials print as eight zero-padded digits, the form used on travellers.
impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08}", self.0)
    }
}

impl FromStr for Serial {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<u32>()
            .map_err(|e| LayoutError::invalid_input(format!("invalid serial {s:?}: {e}")))?;
        Self::new(value)
    }
}

impl TryFrom<u32> for Serial {
    type Error = LayoutError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Serial> for u32 {
    fn from(value: Serial) -> Self {
        value.0
    }
}

/// Persisted state of one allocated serial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialRecord {
    pub serial: Serial,
    pub status: SerialStatus,
    /// Array the serial was reserved for.
    pub array: ArrayRef,
    pub reserved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engraved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voided_at: Option<DateTime<Utc>>,
}

impl SerialRecord {
    /// A freshly reserved serial.
    #[must_use]
    pub const fn reserved(serial: Serial, array: ArrayRef, at: DateTime<Utc>) -> Self {
        Self {
            serial,
            status: SerialStatus::Reserved,
            array,
            reserved_at: at,
            engraved_at: None,
            voided_at: None,
        }
    }

    /// Apply a lifecycle transition, stamping the matching timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidTransition`] if the edge is not legal.
    pub fn apply(&mut self, to: SerialStatus, at: DateTime<Utc>) -> Result<(), LayoutError> {
        self.status = self
            .status
            .transition(to, format_args!("serial {}", self.serial))?;
        match to {
            SerialStatus::Engraved => self.engraved_at = Some(at),
            SerialStatus::Voided => self.voided_at = Some(at),
            SerialStatus::Reserved => {}
        }
        Ok(())
    }
}
