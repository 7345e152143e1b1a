//! Error types and handling for `contact_sync`.
//!
//! # Design
//!
//! - Uses `thiserror` for derive-based error types
//! - Remote failures are modelled separately in [`StoreError`] so that
//!   components can retry transient ones before escalating
//! - Provides recovery hints for user-facing errors
//! - Provides structured JSON output for automation

mod context;
mod structured;

pub use context::{OptionExt, ResultExt};
pub use structured::{ErrorCategory, ErrorCode, StructuredError};

use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for `contact_sync` operations.
#[derive(Error, Debug)]
pub enum SyncError {
    // === Configuration Errors ===
    /// Configuration file or value error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configuration field has the wrong shape.
    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    /// The invoking principal is not allowed to run an import.
    #[error("Import refused for '{principal}': run it from another account")]
    BlockedPrincipal { principal: String },

    // === Remote Errors ===
    /// A store operation failed and has no degrade path.
    #[error("Contact store error: {0}")]
    Store(#[from] StoreError),

    /// A store operation failed again after its single retry.
    #[error("{op} failed after retry: {source}")]
    RetryExhausted {
        op: String,
        #[source]
        source: StoreError,
    },

    // === Sheet Errors ===
    /// The staged grid does not follow the Groups/Contacts/Total layout.
    #[error("Sheet format error in row {row}: {reason}")]
    SheetFormat { row: usize, reason: String },

    /// Two staged records claim the same identity tag.
    #[error("Duplicate identity tag in staged contacts: {identity}")]
    DuplicateIdentity { identity: String },

    /// The named sheet has never been written.
    #[error("Sheet '{name}' not found in {path}")]
    SheetNotFound { name: String, path: PathBuf },

    // === Local Errors ===
    /// `SQLite` error from a local account or workbook file.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error with additional context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Wrapped anyhow error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Can the user fix this without code changes?
    #[must_use]
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Validation { .. }
                | Self::BlockedPrincipal { .. }
                | Self::SheetNotFound { .. }
                | Self::DuplicateIdentity { .. }
        )
    }

    /// Will re-running the same command plausibly get further?
    ///
    /// Runs are convergent, so any remote failure is worth another attempt.
    #[must_use]
    pub const fn is_rerunnable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::RetryExhausted { .. })
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::BlockedPrincipal { .. } => {
                Some("Run the import as the destination account, not the exporting one")
            }
            Self::SheetNotFound { .. } => Some("Run: csync export"),
            Self::DuplicateIdentity { .. } => Some("Re-run the export to regenerate the sheet"),
            Self::RetryExhausted { .. } | Self::Store(_) => {
                Some("Re-run the command; completed work is matched on the next run")
            }
            Self::Validation { .. } | Self::Config(_) => {
                Some("Check .contact-sync/config.yaml and CSYNC_* environment variables")
            }
            _ => None,
        }
    }

    /// Create a validation error for a specific field.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a store error that survived its retry.
    #[must_use]
    pub fn retry_exhausted(op: impl Into<String>, source: StoreError) -> Self {
        Self::RetryExhausted {
            op: op.into(),
            source,
        }
    }
}

/// Result type using `SyncError`.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::BlockedPrincipal {
            principal: "owner@example.org".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Import refused for 'owner@example.org': run it from another account"
        );
    }

    #[test]
    fn test_validation_error() {
        let err = SyncError::validation("source-groups", "must not be empty");
        assert_eq!(
            err.to_string(),
            "Validation failed: source-groups: must not be empty"
        );
    }

    #[test]
    fn test_retry_exhausted_keeps_source() {
        let err = SyncError::retry_exhausted(
            "create group ICE",
            StoreError::transient("create_group", "quota"),
        );
        assert!(err.to_string().starts_with("create group ICE failed after retry"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.is_rerunnable());
        assert!(!err.is_user_recoverable());
    }

    #[test]
    fn test_suggestion() {
        let err = SyncError::SheetNotFound {
            name: "Exported_Contacts".to_string(),
            path: PathBuf::from("workbook.db"),
        };
        assert_eq!(err.suggestion(), Some("Run: csync export"));
        assert!(SyncError::Io(std::io::Error::other("x")).suggestion().is_none());
    }
}
