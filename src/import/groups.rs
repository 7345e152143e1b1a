//! Destination group maintenance: creating groups, adding members, and
//! removing stale contacts by deleting the group that holds them.

use crate::error::{Result, SyncError};
use crate::model::GroupMap;
use crate::store::{ContactStore, StoreResult, limits};
use crate::util::Clock;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reserved group stale contacts are gathered in before removal.
pub const DELETE_GROUP: &str = "Delete Group";

/// Pause before retrying a failed group operation.
pub const GROUP_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Wait after creating a group before touching its members.
pub const CREATE_SETTLE: Duration = Duration::from_secs(2);
/// Wait after populating the delete group before removing it.
pub const DELETE_SETTLE: Duration = Duration::from_secs(1);

/// How one group's membership update went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipOutcome {
    Added { group_id: String, members: usize },
    /// Adding members failed twice; the run carries on without them.
    GaveUp { reason: String },
}

pub struct GroupReconciler<'c> {
    clock: &'c dyn Clock,
}

impl<'c> GroupReconciler<'c> {
    #[must_use]
    pub fn new(clock: &'c dyn Clock) -> Self {
        Self { clock }
    }

    /// Make sure `name` exists and contains `members`.
    ///
    /// A membership failure retries the whole operation once after
    /// [`GROUP_RETRY_DELAY`], then gives up.
    ///
    /// # Errors
    ///
    /// Returns `RetryExhausted` when the group has to be created and the
    /// second creation attempt fails too.
    pub fn populate<S: ContactStore + ?Sized>(
        &self,
        store: &mut S,
        groups: &mut GroupMap,
        name: &str,
        members: &[String],
    ) -> Result<MembershipOutcome> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let group_id = self.ensure_group(store, groups, name)?;
            match add_members(store, &group_id, members) {
                Ok(()) => {
                    debug!(group = name, members = members.len(), "Group membership updated");
                    return Ok(MembershipOutcome::Added {
                        group_id,
                        members: members.len(),
                    });
                }
                Err(err) if attempt < 2 => {
                    warn!(group = name, error = %err, "Adding members failed; retrying group");
                    self.clock.sleep(GROUP_RETRY_DELAY);
                }
                Err(err) => {
                    error!(group = name, error = %err, "Adding members failed twice; giving up");
                    return Ok(MembershipOutcome::GaveUp {
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    /// Gather `stale` into [`DELETE_GROUP`] and delete it with its members.
    ///
    /// Returns how the gathering went; the group is deleted either way.
    ///
    /// # Errors
    ///
    /// Returns `RetryExhausted` when creating or deleting the group fails
    /// twice.
    pub fn delete_stale<S: ContactStore + ?Sized>(
        &self,
        store: &mut S,
        groups: &mut GroupMap,
        stale: &[String],
    ) -> Result<MembershipOutcome> {
        let outcome = self.populate(store, groups, DELETE_GROUP, stale)?;
        let Some(group_id) = groups.id_of(DELETE_GROUP).map(ToString::to_string) else {
            return Ok(outcome);
        };

        self.clock.sleep(DELETE_SETTLE);
        self.retry_once("delete group", || store.delete_group(&group_id, true))?;
        groups.remove(DELETE_GROUP);
        info!(contacts = stale.len(), "Deleted stale contacts");
        Ok(outcome)
    }

    fn ensure_group<S: ContactStore + ?Sized>(
        &self,
        store: &mut S,
        groups: &mut GroupMap,
        name: &str,
    ) -> Result<String> {
        if let Some(id) = groups.id_of(name) {
            return Ok(id.to_string());
        }
        let created = self.retry_once(&format!("create group {name}"), || store.create_group(name))?;
        info!(group = name, id = %created.resource_name, "Created destination group");
        self.clock.sleep(CREATE_SETTLE);
        groups.insert(name, created.resource_name.clone());
        Ok(created.resource_name)
    }

    fn retry_once<T>(&self, op: &str, mut call: impl FnMut() -> StoreResult<T>) -> Result<T> {
        match call() {
            Ok(value) => Ok(value),
            Err(first) => {
                warn!(op, error = %first, "Group operation failed; retrying once");
                self.clock.sleep(GROUP_RETRY_DELAY);
                call().map_err(|err| {
                    error!(op, error = %err, "Group operation failed twice");
                    SyncError::retry_exhausted(op, err)
                })
            }
        }
    }
}

fn add_members<S: ContactStore + ?Sized>(
    store: &mut S,
    group_id: &str,
    members: &[String],
) -> StoreResult<()> {
    for slice in members.chunks(limits::MODIFY_MEMBERS) {
        store.modify_members(group_id, slice)?;
    }
    Ok(())
}
