//! Layout configuration, loadable from TOML.
//!
//! ```toml
//! slots_per_array = 8
//! identifier_digits = 5
//! serial_max = 1048575
//! temp_seq_offset = 1000000
//! array_seq_max = 999999
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifier::{MAX_IDENTIFIER_DIGITS, max_sequence};
use crate::{ArraySeq, Serial, SlotPosition};

/// Largest array capacity supported.
pub const MAX_SLOTS_PER_ARRAY: u8 = 64;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for allocation and placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    /// Slots per array (N).
    pub slots_per_array: u8,

    /// Zero-padded digit width of public identifiers.
    pub identifier_digits: u8,

    /// Highest serial the pool may hand out.
    pub serial_max: u32,

    /// Offset of the temporary sequence space used while moving rows.
    pub temp_seq_offset: u32,

    /// Highest array sequence number a batch may use.
    pub array_seq_max: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            slots_per_array: 8,
            identifier_digits: 5,
            serial_max: Serial::MAX,
            temp_seq_offset: 1_000_000,
            array_seq_max: 999_999,
        }
    }
}

impl LayoutConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on malformed TOML or inconsistent values.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    /// Check the settings against each other.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slots_per_array == 0 || self.slots_per_array > MAX_SLOTS_PER_ARRAY {
            return Err(ConfigError::Invalid(format!(
                "slots_per_array must be 1..={MAX_SLOTS_PER_ARRAY}, got {}",
                self.slots_per_array
            )));
        }
        if self.identifier_digits == 0 || self.identifier_digits > MAX_IDENTIFIER_DIGITS {
            return Err(ConfigError::Invalid(format!(
                "identifier_digits must be 1..={MAX_IDENTIFIER_DIGITS}, got {}",
                self.identifier_digits
            )));
        }
        if !(Serial::MIN..=Serial::MAX).contains(&self.serial_max) {
            return Err(ConfigError::Invalid(format!(
                "serial_max must be {}..={}, got {}",
                Serial::MIN,
                Serial::MAX,
                self.serial_max
            )));
        }
        if self.array_seq_max == 0 || self.array_seq_max >= self.temp_seq_offset {
            return Err(ConfigError::Invalid(format!(
                "array_seq_max ({}) must be positive and below temp_seq_offset ({})",
                self.array_seq_max, self.temp_seq_offset
            )));
        }
        if self.temp_seq_offset.checked_add(self.array_seq_max).is_none() {
            return Err(ConfigError::Invalid(
                "temp_seq_offset + array_seq_max overflows u32".to_string(),
            ));
        }
        Ok(())
    }

    /// Highest identifier sequence for the configured width.
    #[must_use]
    pub const fn identifier_max(&self) -> u64 {
        max_sequence(self.identifier_digits)
    }

    /// Whether `slot` exists on an array of this capacity.
    #[must_use]
    pub const fn slot_in_range(&self, slot: SlotPosition) -> bool {
        slot.get() <= self.slots_per_array
    }

    /// Position of `seq` in the temporary sequence space.
    #[must_use]
    pub const fn temp_seq(&self, seq: ArraySeq) -> ArraySeq {
        seq.offset(self.temp_seq_offset)
    }
}
