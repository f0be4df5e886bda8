//! Shared output helpers.

use anyhow::{Context, Result};
use serde::Serialize;

/// Print `value` as pretty JSON or through `human`.
pub fn emit<T: Serialize>(value: &T, json: bool, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        let output =
            serde_json::to_string_pretty(value).context("failed to serialize output to JSON")?;
        println!("{output}");
    } else {
        human(value);
    }
    Ok(())
}
