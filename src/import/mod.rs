//! Import: apply a staged record set to a destination account.
//!
//! A run moves through fixed phases, each finishing before the next:
//!
//! 1. **Load**: decode the sheet and index staged records by identity.
//! 2. **Match**: pair destination records in managed groups with staged
//!    ones; unpaired destination records are stale.
//! 3. **Create**: staged records nobody claimed, under the create quota.
//! 4. **Update**: paired records, in slices the store accepts.
//! 5. **Groups**: add members to every managed group, then delete the
//!    stale contacts by deleting the group they were gathered in.
//! 6. **Photos**: upload pending photos under the photo quota; records
//!    whose photo cannot be uploaded lose their photo reference.
//!
//! Nothing is rolled back. A failed run leaves the destination partly
//! converged and the next run picks up from there, because created and
//! updated records carry their identity tag.

pub mod groups;
pub mod matching;

pub use groups::{DELETE_GROUP, GroupReconciler, MembershipOutcome};
pub use matching::{IncomingIndex, MalformedRecord, classify, copy_field_metadata, pair};

use crate::batch::{BatchPolicy, RateLimitedExecutor};
use crate::error::{Result, SyncError};
use crate::groups::GroupDirectory;
use crate::model::{
    Classification, ContactRecord, GroupMap, MatchedPair, PendingPhotoUpdate, TagKind,
};
use crate::photo::PhotoSource;
use crate::sheet::{RecordSet, SheetStore, decode};
use crate::store::{ContactStore, StoreResult, limits, masks};
use crate::util::Clock;
use crate::util::progress::ProgressTracker;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause before retrying a failed update slice.
pub const UPDATE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Import-side settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSettings {
    /// Principals that must never run an import (typically the exporter).
    pub blocked_principals: Vec<String>,
}

impl ImportSettings {
    #[must_use]
    pub fn is_blocked(&self, principal: &str) -> bool {
        let principal = principal.trim();
        self.blocked_principals
            .iter()
            .any(|blocked| blocked.trim().eq_ignore_ascii_case(principal))
    }
}

/// One item that did not make it, with the phase it failed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub phase: &'static str,
    pub item: String,
    pub error: String,
}

/// Counts and failures of one import run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub incoming: usize,
    pub matched: usize,
    pub stale: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub photos_updated: usize,
    pub photos_failed: usize,
    /// Photo references removed because the photo could not be used.
    pub photo_refs_stripped: usize,
    /// Groups whose membership was updated.
    pub groups_updated: Vec<String>,
    pub malformed: Vec<MalformedRecord>,
    pub failures: Vec<ItemFailure>,
}

impl ImportReport {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.malformed.is_empty() || !self.failures.is_empty()
    }

    fn fail(&mut self, phase: &'static str, item: impl Into<String>, error: impl ToString) {
        self.failures.push(ItemFailure {
            phase,
            item: item.into(),
            error: error.to_string(),
        });
    }
}

/// Work collected while a run is in flight.
#[derive(Default)]
struct RunState {
    report: ImportReport,
    /// Group name -> destination ids to add, in registration order.
    pending_members: HashMap<String, Vec<String>>,
    pending_photos: Vec<PendingPhotoUpdate>,
    stale: Vec<String>,
}

impl RunState {
    /// Queue `resource_name` for every managed group `record` is tagged with.
    fn register_groups(&mut self, record: &ContactRecord, resource_name: &str, managed: &[String]) {
        let mut seen = HashSet::new();
        for group in record.group_tags() {
            if !managed.iter().any(|name| name == group) {
                debug!(group, contact = resource_name, "Ignoring unmanaged group tag");
                continue;
            }
            if seen.insert(group) {
                self.pending_members
                    .entry(group.to_string())
                    .or_default()
                    .push(resource_name.to_string());
            }
        }
    }
}

/// Applies staged record sets to a destination store.
pub struct Importer<'a> {
    settings: ImportSettings,
    principal: String,
    clock: &'a dyn Clock,
    photos: &'a dyn PhotoSource,
    show_progress: bool,
}

impl<'a> Importer<'a> {
    /// # Errors
    ///
    /// Returns `SyncError::BlockedPrincipal` when `principal` may not import.
    pub fn new(
        settings: ImportSettings,
        principal: &str,
        clock: &'a dyn Clock,
        photos: &'a dyn PhotoSource,
    ) -> Result<Self> {
        if settings.is_blocked(principal) {
            return Err(SyncError::BlockedPrincipal {
                principal: principal.to_string(),
            });
        }
        Ok(Self {
            settings,
            principal: principal.to_string(),
            clock,
            photos,
            show_progress: false,
        })
    }

    /// Draw progress bars for the rate-limited phases.
    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    #[must_use]
    pub const fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    /// Read `sheet` and apply it to `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sheet is missing or malformed, or a store
    /// operation with no degrade path fails twice.
    pub fn import<S, W>(&self, store: &mut S, sheet: &W) -> Result<ImportReport>
    where
        S: ContactStore + ?Sized,
        W: SheetStore + ?Sized,
    {
        let set = decode(&sheet.read_range()?)?;
        self.apply(store, set)
    }

    /// Apply an already decoded record set.
    ///
    /// # Errors
    ///
    /// Same as [`Importer::import`].
    pub fn apply<S: ContactStore + ?Sized>(
        &self,
        store: &mut S,
        set: RecordSet,
    ) -> Result<ImportReport> {
        info!(principal = %self.principal, records = set.records.len(), "Import started");
        let managed = set.managed_groups();
        let mut run = RunState::default();
        run.report.incoming = set.records.len();

        // Load
        let (mut index, malformed) = IncomingIndex::build(set.records)?;
        for record in &malformed {
            warn!(position = record.position, contact = %record.label, reason = %record.reason, "Skipping malformed record");
        }
        run.report.malformed = malformed;

        // Match
        let directory = GroupDirectory::new(self.clock);
        let mut groups = directory.resolve_groups(&*store, &[], &[])?;
        let pairs = self.match_existing(&*store, &directory, &groups, &managed, &mut index, &mut run)?;

        // Create
        let created = self.create_new(store, index.into_remaining(), &mut run);
        for record in &created {
            if let Some(id) = &record.resource_name {
                run.register_groups(record, id, &managed);
            }
        }

        // Update
        let updates: Vec<ContactRecord> = pairs.into_iter().map(|pair| pair.incoming).collect();
        run.report.updated =
            self.update_in_slices(store, updates, masks::CONTACT_FIELDS, "update", &mut run.report);
        info!(updated = run.report.updated, "Update phase finished");

        // Groups and delete
        self.reconcile_groups(store, &mut groups, &managed, &mut run)?;

        // Photos
        self.upload_photos(store, &directory, &mut run)?;

        let report = run.report;
        info!(
            matched = report.matched,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            photos = report.photos_updated,
            failures = report.failures.len(),
            "Import finished"
        );
        Ok(report)
    }

    fn match_existing<S: ContactStore + ?Sized>(
        &self,
        store: &S,
        directory: &GroupDirectory<'_>,
        groups: &GroupMap,
        managed: &[String],
        index: &mut IncomingIndex,
        run: &mut RunState,
    ) -> Result<Vec<MatchedPair>> {
        let spinner = if self.show_progress {
            ProgressTracker::new_spinner("Fetching destination contacts")
        } else {
            ProgressTracker::hidden(0)
        };
        let mut scope = managed.to_vec();
        scope.push(DELETE_GROUP.to_string());
        let existing = directory.members_of_many(store, &scope)?;
        spinner.finish_and_clear();

        let condemned = groups.id_of(DELETE_GROUP);
        let mut pairs = Vec::new();
        for record in existing {
            let Some(resource_name) = record.resource_name.clone() else {
                continue;
            };
            let already_condemned =
                condemned.is_some_and(|id| record.memberships.iter().any(|m| m == id));
            let class = if already_condemned {
                Classification::Stale
            } else {
                classify(&record, index)
            };

            let incoming = match (class, record.identity()) {
                (Classification::Matched, Some(identity)) => index.take(identity),
                _ => None,
            };
            let Some(incoming) = incoming else {
                debug!(contact = %resource_name, "Destination record is stale");
                run.stale.push(resource_name);
                continue;
            };

            let mut matched = pair(record, incoming);
            let changed_ref = matched
                .incoming
                .photo_ref()
                .filter(|reference| matched.existing.photo_ref() != Some(*reference))
                .map(ToString::to_string);
            if let Some(reference) = changed_ref {
                self.queue_photo(&mut matched.incoming, &resource_name, &reference, run);
            }
            run.register_groups(&matched.incoming, &resource_name, managed);
            pairs.push(matched);
        }

        run.report.matched = pairs.len();
        run.report.stale = run.stale.len();
        info!(
            matched = run.report.matched,
            stale = run.report.stale,
            new = index.len(),
            "Match phase finished"
        );
        Ok(pairs)
    }

    /// Queue an upload for `reference`, or drop the reference when the
    /// photo cannot be read.
    fn queue_photo(
        &self,
        record: &mut ContactRecord,
        resource_name: &str,
        reference: &str,
        run: &mut RunState,
    ) {
        match self.photos.fetch(reference) {
            Some(photo_bytes) => run.pending_photos.push(PendingPhotoUpdate {
                resource_name: resource_name.to_string(),
                photo_bytes,
            }),
            None => {
                warn!(contact = %record.display_name(), reference, "Photo unreachable; dropping reference");
                record.strip_tags(&TagKind::PhotoRef);
                run.report.photos_failed += 1;
                run.report.photo_refs_stripped += 1;
                run.report.fail("photo", resource_name, format!("unreachable photo {reference}"));
            }
        }
    }

    fn create_new<S: ContactStore + ?Sized>(
        &self,
        store: &mut S,
        mut records: Vec<ContactRecord>,
        run: &mut RunState,
    ) -> Vec<ContactRecord> {
        if records.is_empty() {
            return Vec::new();
        }

        // Photos are read up front so unreadable references never reach
        // the destination.
        let mut photo_bytes: HashMap<String, String> = HashMap::new();
        for record in &mut records {
            let (Some(identity), Some(reference)) = (
                record.identity().map(ToString::to_string),
                record.photo_ref().map(ToString::to_string),
            ) else {
                continue;
            };
            if let Some(bytes) = self.photos.fetch(&reference) {
                photo_bytes.insert(identity, bytes);
            } else {
                warn!(contact = %record.display_name(), reference = %reference, "Photo unreachable; dropping reference");
                record.strip_tags(&TagKind::PhotoRef);
                run.report.photos_failed += 1;
                run.report.photo_refs_stripped += 1;
                run.report
                    .fail("photo", identity, format!("unreachable photo {reference}"));
            }
        }

        let tracker = self.tracker(records.len(), "Creating contacts");
        let executor = RateLimitedExecutor::new(BatchPolicy::CREATE, self.clock).with_progress(&tracker);
        let outcome = executor.run(records, |chunk: &[ContactRecord]| {
            match store.batch_create(chunk) {
                Ok(results) => results,
                Err(err) => chunk.iter().map(|_| Err(err.clone())).collect(),
            }
        });
        tracker.finish_and_clear();

        for failed in &outcome.failed {
            warn!(contact = %failed.item.display_name(), error = %failed.error, "Create failed");
            run.report
                .fail("create", failed.item.display_name(), &failed.error);
        }
        for record in &outcome.succeeded {
            let (Some(id), Some(identity)) = (&record.resource_name, record.identity()) else {
                continue;
            };
            if let Some(bytes) = photo_bytes.remove(identity) {
                run.pending_photos.push(PendingPhotoUpdate {
                    resource_name: id.clone(),
                    photo_bytes: bytes,
                });
            }
        }
        run.report.created = outcome.succeeded.len();
        info!(
            created = run.report.created,
            failed = outcome.failed.len(),
            calls = outcome.calls,
            "Create phase finished"
        );
        outcome.succeeded
    }

    /// Update `records` in store-sized slices. A slice failing transiently
    /// is retried once; a slice that still fails is recorded and skipped.
    /// Returns how many records were updated.
    fn update_in_slices<S: ContactStore + ?Sized>(
        &self,
        store: &mut S,
        records: Vec<ContactRecord>,
        mask: &[&str],
        phase: &'static str,
        report: &mut ImportReport,
    ) -> usize {
        let mut updated = 0;
        for slice in records.chunks(limits::UPDATE) {
            let batch: BTreeMap<String, ContactRecord> = slice
                .iter()
                .filter_map(|record| {
                    record
                        .resource_name
                        .clone()
                        .map(|id| (id, record.clone()))
                })
                .collect();
            if batch.is_empty() {
                continue;
            }

            let result = match store.batch_update(&batch, mask) {
                Err(err) if err.is_transient() => {
                    warn!(phase, records = batch.len(), error = %err, "Update slice failed; retrying once");
                    self.clock.sleep(UPDATE_RETRY_DELAY);
                    store.batch_update(&batch, mask)
                }
                other => other,
            };
            match result {
                Ok(done) => {
                    debug!(phase, records = done.len(), "Update slice applied");
                    updated += done.len();
                }
                Err(err) => {
                    warn!(phase, records = batch.len(), error = %err, "Update slice skipped");
                    for id in batch.keys() {
                        report.fail(phase, id.clone(), &err);
                    }
                }
            }
        }
        updated
    }

    fn reconcile_groups<S: ContactStore + ?Sized>(
        &self,
        store: &mut S,
        groups: &mut GroupMap,
        managed: &[String],
        run: &mut RunState,
    ) -> Result<()> {
        let reconciler = GroupReconciler::new(self.clock);
        for name in managed {
            let Some(members) = run.pending_members.remove(name) else {
                continue;
            };
            if members.is_empty() {
                continue;
            }
            match reconciler.populate(store, groups, name, &members)? {
                MembershipOutcome::Added { .. } => run.report.groups_updated.push(name.clone()),
                MembershipOutcome::GaveUp { reason } => run.report.fail("groups", name.clone(), reason),
            }
        }

        if run.stale.is_empty() {
            return Ok(());
        }
        if let MembershipOutcome::GaveUp { reason } =
            reconciler.delete_stale(store, groups, &run.stale)?
        {
            run.report.fail("delete", DELETE_GROUP, reason);
        } else {
            run.report.deleted = run.stale.len();
        }
        Ok(())
    }

    fn upload_photos<S: ContactStore + ?Sized>(
        &self,
        store: &mut S,
        directory: &GroupDirectory<'_>,
        run: &mut RunState,
    ) -> Result<()> {
        let pending = std::mem::take(&mut run.pending_photos);
        if pending.is_empty() {
            return Ok(());
        }

        let tracker = self.tracker(pending.len(), "Uploading photos");
        let executor = RateLimitedExecutor::new(BatchPolicy::PHOTO, self.clock).with_progress(&tracker);
        let outcome = executor.run(pending, |chunk: &[PendingPhotoUpdate]| {
            chunk
                .iter()
                .map(|photo| {
                    store
                        .update_photo(&photo.resource_name, &photo.photo_bytes)
                        .map(|()| photo.resource_name.clone())
                })
                .collect::<Vec<StoreResult<String>>>()
        });
        tracker.finish_and_clear();
        run.report.photos_updated = outcome.succeeded.len();

        if outcome.failed.is_empty() {
            info!(photos = run.report.photos_updated, "Photo phase finished");
            return Ok(());
        }

        let failed_ids: Vec<String> = outcome
            .failed
            .iter()
            .map(|failed| failed.item.resource_name.clone())
            .collect();
        for failed in &outcome.failed {
            warn!(contact = %failed.item.resource_name, error = %failed.error, "Photo upload failed");
            run.report
                .fail("photo", failed.item.resource_name.clone(), &failed.error);
        }
        run.report.photos_failed += failed_ids.len();

        // Fresh copies carry current etags.
        let mut cleaned = Vec::new();
        for mut record in directory.members_by_ids(&*store, &failed_ids)? {
            if record.strip_tags(&TagKind::PhotoRef) > 0 {
                cleaned.push(record);
            }
        }
        let stripped =
            self.update_in_slices(store, cleaned, masks::KEYWORDS_ONLY, "photo cleanup", &mut run.report);
        run.report.photo_refs_stripped += stripped;
        info!(
            photos = run.report.photos_updated,
            failed = failed_ids.len(),
            stripped,
            "Photo phase finished"
        );
        Ok(())
    }

    fn tracker(&self, total: usize, message: &str) -> ProgressTracker {
        let total = u64::try_from(total).unwrap_or(u64::MAX);
        if self.show_progress {
            ProgressTracker::new(total, message)
        } else {
            ProgressTracker::hidden(total)
        }
    }
}
