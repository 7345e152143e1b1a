//! Machine-readable failures.
//!
//! Scheduled runs are driven by scripts, so every [`SyncError`] maps to a
//! stable code, an exit status, and a flag saying whether simply running
//! the command again can help.

use crate::error::SyncError;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt::Write as _;

/// Broad failure families. Each owns one process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Internal,
    Access,
    Remote,
    Sheet,
    Config,
    Local,
}

impl ErrorCategory {
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Internal => 1,
            Self::Access => 3,
            Self::Remote => 5,
            Self::Sheet => 6,
            Self::Config => 7,
            Self::Local => 8,
        }
    }
}

/// Stable error codes, serialized in `SCREAMING_SNAKE_CASE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConfigError,
    ValidationFailed,
    ConfigParseError,
    BlockedPrincipal,
    StoreTransient,
    StoreRejected,
    RetryExhausted,
    SheetFormat,
    DuplicateIdentity,
    SheetNotFound,
    DatabaseError,
    IoError,
    JsonError,
    InternalError,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigError => "CONFIG_ERROR",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::ConfigParseError => "CONFIG_PARSE_ERROR",
            Self::BlockedPrincipal => "BLOCKED_PRINCIPAL",
            Self::StoreTransient => "STORE_TRANSIENT",
            Self::StoreRejected => "STORE_REJECTED",
            Self::RetryExhausted => "RETRY_EXHAUSTED",
            Self::SheetFormat => "SHEET_FORMAT",
            Self::DuplicateIdentity => "DUPLICATE_IDENTITY",
            Self::SheetNotFound => "SHEET_NOT_FOUND",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigError | Self::ValidationFailed | Self::ConfigParseError => {
                ErrorCategory::Config
            }
            Self::BlockedPrincipal => ErrorCategory::Access,
            Self::StoreTransient | Self::StoreRejected | Self::RetryExhausted => {
                ErrorCategory::Remote
            }
            Self::SheetFormat | Self::DuplicateIdentity | Self::SheetNotFound => {
                ErrorCategory::Sheet
            }
            Self::DatabaseError | Self::IoError | Self::JsonError => ErrorCategory::Local,
            Self::InternalError => ErrorCategory::Internal,
        }
    }

    /// Process exit status for this code.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }

    /// Whether a later run may succeed with nothing changed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreTransient | Self::RetryExhausted | Self::DatabaseError
        )
    }
}

/// One failure, ready to print.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    pub retryable: bool,
    /// Fields that identify what failed: a row, an operation, an identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl StructuredError {
    #[must_use]
    pub fn from_error(err: &SyncError) -> Self {
        let code = code_for(err);
        Self {
            code,
            message: err.to_string(),
            hint: err.suggestion().map(str::to_string),
            retryable: code.is_retryable(),
            context: context_for(err),
        }
    }

    /// `{"error": {...}}`, the shape written to stderr in JSON mode.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({ "error": self })
    }

    /// Plain text, with the labels coloured when `color` is set.
    #[must_use]
    pub fn to_human(&self, color: bool) -> String {
        let (red, yellow, reset) = if color {
            ("\x1b[31m", "\x1b[33m", "\x1b[0m")
        } else {
            ("", "", "")
        };
        let mut out = format!("{red}Error:{reset} {}", self.message);
        if let Some(hint) = &self.hint {
            let _ = write!(out, "\n{yellow}Hint:{reset} {hint}");
        }
        out
    }
}

fn code_for(err: &SyncError) -> ErrorCode {
    match err {
        SyncError::Config(_) => ErrorCode::ConfigError,
        SyncError::Validation { .. } => ErrorCode::ValidationFailed,
        SyncError::BlockedPrincipal { .. } => ErrorCode::BlockedPrincipal,
        SyncError::Store(source) if source.is_transient() => ErrorCode::StoreTransient,
        SyncError::Store(_) => ErrorCode::StoreRejected,
        SyncError::RetryExhausted { .. } => ErrorCode::RetryExhausted,
        SyncError::SheetFormat { .. } => ErrorCode::SheetFormat,
        SyncError::DuplicateIdentity { .. } => ErrorCode::DuplicateIdentity,
        SyncError::SheetNotFound { .. } => ErrorCode::SheetNotFound,
        SyncError::Database(_) => ErrorCode::DatabaseError,
        SyncError::Io(_) | SyncError::WithContext { .. } => ErrorCode::IoError,
        SyncError::Json(_) => ErrorCode::JsonError,
        SyncError::Yaml(_) => ErrorCode::ConfigParseError,
        SyncError::Other(_) => ErrorCode::InternalError,
    }
}

fn context_for(err: &SyncError) -> Option<Value> {
    let context = match err {
        SyncError::Validation { field, reason } => json!({"field": field, "reason": reason}),
        SyncError::BlockedPrincipal { principal } => json!({"principal": principal}),
        SyncError::Store(source) => store_context(source),
        SyncError::RetryExhausted { op, source } => {
            json!({"operation": op, "last_error": source.to_string()})
        }
        SyncError::SheetFormat { row, reason } => json!({"row": row, "reason": reason}),
        SyncError::DuplicateIdentity { identity } => json!({"identity": identity}),
        SyncError::SheetNotFound { name, path } => {
            json!({"sheet": name, "path": path.display().to_string()})
        }
        _ => return None,
    };
    Some(context)
}

fn store_context(err: &StoreError) -> Value {
    json!({
        "operation": err.operation(),
        "transient": err.is_transient(),
    })
}
