//! Failure injection for any [`ContactStore`].
//!
//! Wraps a store and makes chosen operations fail, either for the next few
//! calls or whenever a call touches a given target (group id, contact id,
//! group name, or a created record's display name).

use crate::model::{ContactGroup, ContactRecord};
use crate::store::{ContactStore, StoreError, StoreResult};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// What an injected failure looks like to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Retryable; succeeds once the queued faults are used up.
    Transient,
    /// Not retryable.
    Permanent,
}

impl FaultKind {
    fn error(self, op: &str, target: Option<&str>) -> StoreError {
        let reason = target.map_or_else(
            || "injected fault".to_string(),
            |target| format!("injected fault for '{target}'"),
        );
        match self {
            Self::Transient => StoreError::transient(op, reason),
            Self::Permanent => StoreError::rejected(op, reason),
        }
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    queued: HashMap<String, VecDeque<FaultKind>>,
    always: HashMap<String, FaultKind>,
    targets: HashMap<(String, String), FaultKind>,
    calls: BTreeMap<String, usize>,
}

/// A [`ContactStore`] that fails on demand.
#[derive(Debug)]
pub struct FaultInjector<S> {
    inner: S,
    plan: RefCell<FaultPlan>,
}

impl<S: ContactStore> FaultInjector<S> {
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            plan: RefCell::new(FaultPlan::default()),
        }
    }

    /// Fail the next `times` calls of `op`.
    pub fn fail_next(&mut self, op: &str, kind: FaultKind, times: usize) {
        let mut plan = self.plan.borrow_mut();
        let queue = plan.queued.entry(op.to_string()).or_default();
        queue.extend(std::iter::repeat_n(kind, times));
    }

    /// Fail every call of `op`.
    pub fn fail_always(&mut self, op: &str, kind: FaultKind) {
        self.plan.borrow_mut().always.insert(op.to_string(), kind);
    }

    /// Fail every call of `op` that touches `target`.
    pub fn fail_target(&mut self, op: &str, target: &str, kind: FaultKind) {
        self.plan
            .borrow_mut()
            .targets
            .insert((op.to_string(), target.to_string()), kind);
    }

    /// Drop every planned fault; call counts are kept.
    pub fn heal(&mut self) {
        let mut plan = self.plan.borrow_mut();
        plan.queued.clear();
        plan.always.clear();
        plan.targets.clear();
    }

    /// How many times `op` was invoked, failed calls included.
    #[must_use]
    pub fn calls(&self, op: &str) -> usize {
        self.plan.borrow().calls.get(op).copied().unwrap_or(0)
    }

    #[must_use]
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    #[must_use]
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn check(&self, op: &str, targets: &[&str]) -> StoreResult<()> {
        let mut plan = self.plan.borrow_mut();
        *plan.calls.entry(op.to_string()).or_default() += 1;

        for target in targets {
            if let Some(kind) = plan.targets.get(&(op.to_string(), (*target).to_string())) {
                return Err(kind.error(op, Some(target)));
            }
        }
        if let Some(kind) = plan.queued.get_mut(op).and_then(VecDeque::pop_front) {
            return Err(kind.error(op, None));
        }
        if let Some(kind) = plan.always.get(op) {
            return Err(kind.error(op, None));
        }
        Ok(())
    }

    fn targeted(&self, op: &str, target: &str) -> Option<FaultKind> {
        self.plan
            .borrow()
            .targets
            .get(&(op.to_string(), target.to_string()))
            .copied()
    }
}

impl<S: ContactStore> ContactStore for FaultInjector<S> {
    fn list_groups(&self) -> StoreResult<Vec<ContactGroup>> {
        self.check("list_groups", &[])?;
        self.inner.list_groups()
    }

    fn group_member_ids(&self, group_id: &str, max: usize) -> StoreResult<Vec<String>> {
        self.check("group_member_ids", &[group_id])?;
        self.inner.group_member_ids(group_id, max)
    }

    fn batch_get(&self, ids: &[String]) -> StoreResult<Vec<ContactRecord>> {
        let targets: Vec<&str> = ids.iter().map(String::as_str).collect();
        self.check("batch_get", &targets)?;
        self.inner.batch_get(ids)
    }

    fn create_group(&mut self, name: &str) -> StoreResult<ContactGroup> {
        self.check("create_group", &[name])?;
        self.inner.create_group(name)
    }

    fn delete_group(&mut self, group_id: &str, delete_contacts: bool) -> StoreResult<()> {
        self.check("delete_group", &[group_id])?;
        self.inner.delete_group(group_id, delete_contacts)
    }

    fn modify_members(&mut self, group_id: &str, add: &[String]) -> StoreResult<()> {
        self.check("modify_members", &[group_id])?;
        self.inner.modify_members(group_id, add)
    }

    /// Targets match a record's display name and fail only that record.
    fn batch_create(
        &mut self,
        records: &[ContactRecord],
    ) -> StoreResult<Vec<StoreResult<ContactRecord>>> {
        const OP: &str = "batch_create";
        self.check(OP, &[])?;

        let mut failures = Vec::with_capacity(records.len());
        let mut forward = Vec::new();
        for record in records {
            let name = record.display_name();
            let fault = self.targeted(OP, &name).map(|kind| kind.error(OP, Some(&name)));
            if fault.is_none() {
                forward.push(record.clone());
            }
            failures.push(fault);
        }

        let mut created = self.inner.batch_create(&forward)?.into_iter();
        let mut results = Vec::with_capacity(records.len());
        for fault in failures {
            match fault {
                Some(err) => results.push(Err(err)),
                None => results.push(created.next().unwrap_or_else(|| {
                    Err(StoreError::Backend {
                        op: OP.to_string(),
                        reason: "store returned too few results".to_string(),
                    })
                })),
            }
        }
        Ok(results)
    }

    fn batch_update(
        &mut self,
        records: &BTreeMap<String, ContactRecord>,
        mask: &[&str],
    ) -> StoreResult<Vec<ContactRecord>> {
        let targets: Vec<&str> = records.keys().map(String::as_str).collect();
        self.check("batch_update", &targets)?;
        self.inner.batch_update(records, mask)
    }

    fn update_photo(&mut self, resource_name: &str, photo_bytes: &str) -> StoreResult<()> {
        self.check("update_photo", &[resource_name])?;
        self.inner.update_photo(resource_name, photo_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldEntry;
    use crate::store::SqliteContactStore;
    use serde_json::json;

    fn named(name: &str) -> ContactRecord {
        let mut entry = FieldEntry::default();
        entry.body.insert("displayName".into(), json!(name));
        ContactRecord {
            names: vec![entry],
            ..ContactRecord::default()
        }
    }

    #[test]
    fn queued_faults_are_consumed() {
        let mut store = FaultInjector::new(SqliteContactStore::open_memory().unwrap());
        store.fail_next("list_groups", FaultKind::Transient, 2);

        assert!(store.list_groups().unwrap_err().is_transient());
        assert!(store.list_groups().unwrap_err().is_transient());
        assert!(store.list_groups().is_ok());
        assert_eq!(store.calls("list_groups"), 3);
    }

    #[test]
    fn targeted_create_fails_single_record() {
        let mut store = FaultInjector::new(SqliteContactStore::open_memory().unwrap());
        store.fail_target("batch_create", "Bob", FaultKind::Permanent);

        let results = store
            .batch_create(&[named("Ada"), named("Bob"), named("Cy")])
            .unwrap();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(StoreError::Rejected { .. })));
        assert_eq!(
            results[2].as_ref().unwrap().resource_name.as_deref(),
            Some("people/c2")
        );
    }

    #[test]
    fn heal_clears_faults() {
        let mut store = FaultInjector::new(SqliteContactStore::open_memory().unwrap());
        store.fail_always("create_group", FaultKind::Permanent);
        assert!(store.create_group("ICE").is_err());
        store.heal();
        assert!(store.create_group("ICE").is_ok());
        assert_eq!(store.calls("create_group"), 2);
    }
}
