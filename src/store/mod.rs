//! Contact store contract.
//!
//! A [`ContactStore`] is one account's address book: groups, contacts and
//! the membership relation between them. The reconciliation engine only
//! talks to stores through this trait, so the local `SQLite` account and
//! the failure-injecting wrapper used in tests are interchangeable.

pub mod fault;
mod schema;
pub mod sqlite;

pub use fault::{FaultInjector, FaultKind};
pub use sqlite::SqliteContactStore;

use crate::model::{ContactGroup, ContactRecord};
use std::collections::BTreeMap;
use thiserror::Error;

/// Per-call ceilings every store honours.
pub mod limits {
    use std::time::Duration;

    /// Ids per `batch_get` call.
    pub const BATCH_GET: usize = 50;
    /// Member ids returned by one `group_member_ids` listing.
    pub const MEMBER_LIST: usize = 1000;
    /// Records per `batch_create` call.
    pub const CREATE: usize = 10;
    /// Records per `batch_update` call.
    pub const UPDATE: usize = 199;
    /// Ids per `modify_members` call.
    pub const MODIFY_MEMBERS: usize = 1000;

    /// Create calls allowed per [`CREATE_WINDOW`].
    pub const CREATE_PER_WINDOW: usize = 89;
    pub const CREATE_WINDOW: Duration = Duration::from_secs(61);
    /// Photo uploads allowed per [`PHOTO_WINDOW`].
    pub const PHOTO_PER_WINDOW: usize = 58;
    pub const PHOTO_WINDOW: Duration = Duration::from_secs(63);
}

/// Field masks accepted by `batch_update`.
pub mod masks {
    /// Everything the reconciler overwrites on a matched record.
    pub const CONTACT_FIELDS: &[&str] = &[
        "names",
        "addresses",
        "emailAddresses",
        "phoneNumbers",
        "biographies",
        "miscKeywords",
    ];
    /// Tags only; used when stripping photo references.
    pub const KEYWORDS_ONLY: &[&str] = &["miscKeywords"];
}

/// Failure reported by a contact store.
///
/// Only [`StoreError::Transient`] is worth retrying; every other variant
/// fails the same way on a second attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Quota, contention or a momentary backend outage.
    #[error("{op}: temporarily unavailable: {reason}")]
    Transient { op: String, reason: String },

    /// The request is invalid for this store.
    #[error("{op}: rejected: {reason}")]
    Rejected { op: String, reason: String },

    /// A referenced contact or group does not exist.
    #[error("{op}: no such resource '{id}'")]
    NotFound { op: String, id: String },

    /// Unexpected storage failure.
    #[error("{op}: backend failure: {reason}")]
    Backend { op: String, reason: String },
}

impl StoreError {
    #[must_use]
    pub fn transient(op: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transient {
            op: op.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn rejected(op: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            op: op.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn not_found(op: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            op: op.into(),
            id: id.into(),
        }
    }

    /// Classify a `SQLite` failure: busy and locked databases are transient.
    #[must_use]
    pub fn from_sqlite(op: &str, err: &rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
                Self::transient(op, err.to_string())
            }
            _ => Self::Backend {
                op: op.to_string(),
                reason: err.to_string(),
            },
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Name of the store operation that failed.
    #[must_use]
    pub fn operation(&self) -> &str {
        match self {
            Self::Transient { op, .. }
            | Self::Rejected { op, .. }
            | Self::NotFound { op, .. }
            | Self::Backend { op, .. } => op,
        }
    }
}

/// Result type for store calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One account's address book.
///
/// Calls over the per-call [`limits`] are rejected rather than split;
/// chunking is the caller's job.
pub trait ContactStore {
    /// Every group in the account, system groups included.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` when the listing fails.
    fn list_groups(&self) -> StoreResult<Vec<ContactGroup>>;

    /// Up to `max` member ids of a group, oldest member first.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown group, `Rejected` when `max` exceeds
    /// [`limits::MEMBER_LIST`].
    fn group_member_ids(&self, group_id: &str, max: usize) -> StoreResult<Vec<String>>;

    /// Fetch full records. Ids that no longer exist are omitted.
    ///
    /// # Errors
    ///
    /// `Rejected` for more than [`limits::BATCH_GET`] ids.
    fn batch_get(&self, ids: &[String]) -> StoreResult<Vec<ContactRecord>>;

    /// # Errors
    ///
    /// `Rejected` when a group with that name already exists.
    fn create_group(&mut self, name: &str) -> StoreResult<ContactGroup>;

    /// Remove a user group, and its member contacts when `delete_contacts`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown group, `Rejected` for system groups.
    fn delete_group(&mut self, group_id: &str, delete_contacts: bool) -> StoreResult<()>;

    /// Add contacts to a group. Existing members are left alone.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown group or contact.
    fn modify_members(&mut self, group_id: &str, add: &[String]) -> StoreResult<()>;

    /// Create records. The outer error fails the whole call; inner errors
    /// are per record and line up with `records`.
    ///
    /// # Errors
    ///
    /// `Rejected` for more than [`limits::CREATE`] records.
    fn batch_create(
        &mut self,
        records: &[ContactRecord],
    ) -> StoreResult<Vec<StoreResult<ContactRecord>>>;

    /// Overwrite the masked fields of existing records, keyed by resource
    /// name. The call is atomic: one bad record fails all of them.
    ///
    /// # Errors
    ///
    /// `Rejected` for an oversized call, an unknown mask field or a stale
    /// etag; `NotFound` for an unknown resource name.
    fn batch_update(
        &mut self,
        records: &BTreeMap<String, ContactRecord>,
        mask: &[&str],
    ) -> StoreResult<Vec<ContactRecord>>;

    /// Replace a contact's photo with web-safe base64 image bytes.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown contact, `Rejected` for undecodable bytes.
    fn update_photo(&mut self, resource_name: &str, photo_bytes: &str) -> StoreResult<()>;
}
