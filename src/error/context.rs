//! Context helpers for attaching human-readable descriptions to errors.

use super::{Result, SyncError};

/// Attach context to any `Result` whose error can be boxed.
pub trait ResultExt<T> {
    /// Wrap the error with a static description.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::WithContext` when `self` is an error.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Wrap the error with a lazily built description.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::WithContext` when `self` is an error.
    fn with_context<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| SyncError::WithContext {
            context: context.into(),
            source: Box::new(source),
        })
    }

    fn with_context<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|source| SyncError::WithContext {
            context: f().into(),
            source: Box::new(source),
        })
    }
}

/// Turn a missing value into a configuration error.
pub trait OptionExt<T> {
    /// # Errors
    ///
    /// Returns `SyncError::Config` when `self` is `None`.
    fn ok_or_config(self, message: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_config(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| SyncError::Config(message.into()))
    }
}
