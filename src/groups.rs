//! Group directory: group name resolution and member fetching.
//!
//! Every store read here is retried once after a short pause when it fails
//! transiently. A second failure aborts the run with
//! [`SyncError::RetryExhausted`]; nothing downstream can work from a
//! partial member list.

use crate::error::{Result, SyncError};
use crate::model::{ContactRecord, GroupMap};
use crate::store::{ContactStore, StoreResult, limits};
use crate::util::Clock;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Groups every account has that are never synchronized unless asked for.
pub const BUILTIN_EXCLUSIONS: &[&str] = &[
    "chatBuddies",
    "all",
    "myContacts",
    "friends",
    "family",
    "blocked",
    "coworkers",
];

/// Pause before the single retry of a failed read.
pub const FETCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Resolves group names and fetches their members from a store.
pub struct GroupDirectory<'c> {
    clock: &'c dyn Clock,
    retry_delay: Duration,
}

impl<'c> GroupDirectory<'c> {
    #[must_use]
    pub fn new(clock: &'c dyn Clock) -> Self {
        Self {
            clock,
            retry_delay: FETCH_RETRY_DELAY,
        }
    }

    /// Map group names to ids.
    ///
    /// The built-in exclusions apply unless `wanted` names them; anything in
    /// `excluded` is always dropped, even when also wanted. A non-empty
    /// `wanted` restricts the result to those names.
    ///
    /// # Errors
    ///
    /// Returns `RetryExhausted` when the group listing fails twice.
    pub fn resolve_groups<S: ContactStore + ?Sized>(
        &self,
        store: &S,
        wanted: &[String],
        excluded: &[String],
    ) -> Result<GroupMap> {
        let skip: HashSet<&str> = BUILTIN_EXCLUSIONS
            .iter()
            .copied()
            .filter(|name| !wanted.iter().any(|w| w == name))
            .chain(excluded.iter().map(String::as_str))
            .collect();

        let groups = self.with_retry("list groups", || store.list_groups())?;
        let resolved: GroupMap = groups
            .into_iter()
            .filter(|group| !skip.contains(group.name.as_str()))
            .filter(|group| wanted.is_empty() || wanted.contains(&group.name))
            .map(|group| (group.name, group.resource_name))
            .collect();

        debug!(
            wanted = wanted.len(),
            resolved = resolved.len(),
            "Resolved contact groups"
        );
        Ok(resolved)
    }

    /// Full records of a group's members, in membership order.
    ///
    /// # Errors
    ///
    /// Returns `RetryExhausted` when a listing or fetch fails twice, or
    /// `Store` for a non-transient failure.
    pub fn members_of<S: ContactStore + ?Sized>(
        &self,
        store: &S,
        group_id: &str,
    ) -> Result<Vec<ContactRecord>> {
        let ids = self.with_retry(&format!("list members of {group_id}"), || {
            store.group_member_ids(group_id, limits::MEMBER_LIST)
        })?;
        if ids.len() == limits::MEMBER_LIST {
            warn!(
                group_id,
                "Group listing hit the member limit; later members are not fetched"
            );
        }
        let members = self.members_by_ids(store, &ids)?;
        debug!(group_id, members = members.len(), "Fetched group members");
        Ok(members)
    }

    /// Members of several groups by name, first occurrence of each contact
    /// kept. Names that do not resolve contribute nothing.
    ///
    /// # Errors
    ///
    /// Same as [`GroupDirectory::members_of`].
    pub fn members_of_many<S: ContactStore + ?Sized>(
        &self,
        store: &S,
        names: &[String],
    ) -> Result<Vec<ContactRecord>> {
        let groups = self.resolve_groups(store, names, &[])?;
        let mut seen = HashSet::new();
        let mut members = Vec::new();
        for name in names {
            let Some(group_id) = groups.id_of(name) else {
                debug!(group = %name, "Group not present in account");
                continue;
            };
            for record in self.members_of(store, group_id)? {
                let fresh = record
                    .resource_name
                    .as_ref()
                    .is_none_or(|id| seen.insert(id.clone()));
                if fresh {
                    members.push(record);
                }
            }
        }
        Ok(members)
    }

    /// Fetch arbitrary records in slices the store accepts.
    ///
    /// # Errors
    ///
    /// Same as [`GroupDirectory::members_of`].
    pub fn members_by_ids<S: ContactStore + ?Sized>(
        &self,
        store: &S,
        ids: &[String],
    ) -> Result<Vec<ContactRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        for slice in ids.chunks(limits::BATCH_GET) {
            records.extend(self.with_retry("batch get contacts", || store.batch_get(slice))?);
        }
        Ok(records)
    }

    fn with_retry<T>(&self, op: &str, mut call: impl FnMut() -> StoreResult<T>) -> Result<T> {
        match call() {
            Ok(value) => Ok(value),
            Err(err) if err.is_transient() => {
                warn!(op, error = %err, "Store read failed; retrying once");
                self.clock.sleep(self.retry_delay);
                call().map_err(|err| SyncError::retry_exhausted(op, err))
            }
            Err(err) => Err(err.into()),
        }
    }
}
