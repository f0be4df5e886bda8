//! Public identifiers: `{category}{zero-padded sequence}` codes bound to one
//! array of one batch.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ArrayRef, Category, LayoutError};

/// Largest supported digit width.
pub const MAX_IDENTIFIER_DIGITS: u8 = 9;

/// A per-category sequential code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicIdentifier {
    pub category: Category,
    pub sequence: u32,
    /// Zero-padded width of the sequence part.
    pub digits: u8,
}

impl PublicIdentifier {
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidInput`] if `sequence` is zero or does not
    /// fit in `digits` decimal digits.
    pub fn new(category: Category, sequence: u32, digits: u8) -> Result<Self, LayoutError> {
        if digits == 0 || digits > MAX_IDENTIFIER_DIGITS {
            return Err(LayoutError::invalid_input(format!(
                "identifier width must be 1..={MAX_IDENTIFIER_DIGITS}, got {digits}"
            )));
        }
        if sequence == 0 || u64::from(sequence) > max_sequence(digits) {
            return Err(LayoutError::invalid_input(format!(
                "sequence {sequence} does not fit {digits} digits for {category}"
            )));
        }
        Ok(Self {
            category,
            sequence,
            digits,
        })
    }

    /// Parse `CATEGORY00042`; the trailing `digits` characters are the sequence.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::InvalidInput`] if the code is malformed.
    pub fn parse(code: &str, digits: u8) -> Result<Self, LayoutError> {
        let width = usize::from(digits);
        if code.len() <= width || !code.is_ascii() {
            return Err(LayoutError::invalid_input(format!(
                "identifier {code:?} too short for {digits} digits"
            )));
        }
        let (prefix, number) = code.split_at(code.len() - width);
        if !number.chars().all(|c| c.is_ascii_digit()) {
            return Err(LayoutError::invalid_input(format!(
                "identifier {code:?} does not end in {digits} digits"
            )));
        }
        let sequence = number
            .parse::<u32>()
            .map_err(|e| LayoutError::invalid_input(format!("identifier {code:?}: {e}")))?;
        Self::new(Category::new(prefix)?, sequence, digits)
    }
}

impl fmt::Display for PublicIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:0width$}",
            self.category,
            self.sequence,
            width = usize::from(self.digits)
        )
    }
}

/// Highest sequence representable in `digits` decimal digits, saturating at
/// `u64::MAX` for widths past 19.
#[must_use]
#[allow(clippy::cast_lossless)]
pub const fn max_sequence(digits: u8) -> u64 {
    match 10_u64.checked_pow(digits as u32) {
        Some(limit) => limit - 1,
        None => u64::MAX,
    }
}

/// Persisted binding of an identifier to its array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierRecord {
    pub identifier: PublicIdentifier,
    pub array: ArrayRef,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube() -> Category {
        Category::new("CUBE").unwrap()
    }

    #[test]
    fn formats_zero_padded() {
        let id = PublicIdentifier::new(cube(), 42, 5).unwrap();
        assert_eq!(id.to_string(), "CUBE00042");
    }

    #[test]
    fn rejects_out_of_width() {
        assert!(PublicIdentifier::new(cube(), 99_999, 5).is_ok());
        assert!(PublicIdentifier::new(cube(), 100_000, 5).is_err());
        assert!(PublicIdentifier::new(cube(), 0, 5).is_err());
        assert!(PublicIdentifier::new(cube(), 1, 0).is_err());
    }

    #[test]
    fn parse_round_trips_display() {
        let id = PublicIdentifier::new(Category::new("SZ-04").unwrap(), 7, 5).unwrap();
        assert_eq!(PublicIdentifier::parse(&id.to_string(), 5).unwrap(), id);
        assert!(PublicIdentifier::parse("CUBE4", 5).is_err());
        assert!(PublicIdentifier::parse("CUBE0004X", 5).is_err());
    }

    #[test]
    fn max_sequence_by_width() {
        assert_eq!(max_sequence(1), 9);
        assert_eq!(max_sequence(5), 99_999);
        assert_eq!(max_sequence(9), 999_999_999);
        assert_eq!(max_sequence(19), 9_999_999_999_999_999_999);
        assert_eq!(max_sequence(20), u64::MAX);
        assert_eq!(max_sequence(u8::MAX), u64::MAX);
    }
}
