//! Error types for layout stores.

use layout_core::LayoutError;
use thiserror::Error;

/// Errors raised by store backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unique constraint {constraint} violated by {key}")]
    UniqueViolation { constraint: &'static str, key: String },

    #[error("store busy: {0}")]
    Busy(String),

    #[error("transaction already finished")]
    Finished,

    #[error("illegal update: {0}")]
    IllegalUpdate(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Lock contention; the caller may retry.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

impl From<StoreError> for LayoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { .. } => Self::Conflict {
                reason: err.to_string(),
            },
            StoreError::Busy(reason) => Self::Busy { reason },
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(code, message) => match code.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    Self::Busy(err.to_string())
                }
                ErrorCode::ConstraintViolation => Self::UniqueViolation {
                    constraint: "sqlite",
                    key: message.clone().unwrap_or_else(|| err.to_string()),
                },
                _ => Self::Backend(err.to_string()),
            },
            _ => Self::Backend(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_into_layout_taxonomy() {
        let conflict: LayoutError = StoreError::UniqueViolation {
            constraint: "items_slot",
            key: "B1#2/3".into(),
        }
        .into();
        assert!(matches!(conflict, LayoutError::Conflict { .. }));

        let busy: LayoutError = StoreError::Busy("locked".into()).into();
        assert!(busy.is_retryable());

        let other: LayoutError = StoreError::Backend("disk".into()).into();
        assert_eq!(other, LayoutError::Store("backend error: disk".into()));
    }

    #[test]
    fn classifies_sqlite_failures() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(StoreError::from(busy).is_busy());

        let unique = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed: items.batch_id".into()),
        );
        assert!(matches!(
            StoreError::from(unique),
            StoreError::UniqueViolation { .. }
        ));
    }
}
