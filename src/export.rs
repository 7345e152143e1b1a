//! Export: snapshot the curated source groups into the staging sheet.
//!
//! Each exported record is normalized, stamped with the tags the importer
//! needs to find it again (`IDENTITY`, `GROUP`, `PHOTO_REF`) and stripped of
//! everything that only makes sense inside the source account.

use crate::error::Result;
use crate::groups::GroupDirectory;
use crate::model::{ContactRecord, GroupMap, SyncTag, TagKind};
use crate::normalize::normalize;
use crate::sheet::{RecordSet, SheetStore, encode};
use crate::store::ContactStore;
use crate::util::{Clock, grid_hash};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

/// What to export and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSettings {
    /// Source groups in priority order; earlier groups win duplicates.
    pub source_groups: Vec<String>,
    /// Extra group every exported contact joins; empty disables it.
    pub mission_group: String,
    pub exclude_groups: Vec<String>,
    /// Treat records sharing a phone key as duplicates.
    pub dedupe_by_number: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            source_groups: vec!["ICE".to_string(), "Static".to_string(), "Roster".to_string()],
            mission_group: "Mission Contacts".to_string(),
            exclude_groups: vec!["Roster".to_string()],
            dedupe_by_number: true,
        }
    }
}

/// Outcome of one export run.
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub exported: usize,
    pub duplicates_skipped: usize,
    pub photo_refs: usize,
    pub mission_group: String,
    /// Groups listed in the sheet, in export order.
    pub groups: Vec<String>,
    /// SHA-256 of the written grid.
    pub content_hash: String,
}

/// A staged record set plus what was dropped while building it.
#[derive(Debug, Clone)]
pub struct StagedExport {
    pub set: RecordSet,
    pub duplicates_skipped: usize,
}

pub struct Exporter<'c> {
    settings: ExportSettings,
    directory: GroupDirectory<'c>,
}

impl<'c> Exporter<'c> {
    #[must_use]
    pub fn new(settings: ExportSettings, clock: &'c dyn Clock) -> Self {
        Self {
            settings,
            directory: GroupDirectory::new(clock),
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    /// Build the record set without touching any sheet.
    ///
    /// # Errors
    ///
    /// Returns an error if a group listing or member fetch fails for good.
    pub fn stage<S: ContactStore + ?Sized>(&self, store: &S) -> Result<StagedExport> {
        // Excluded groups still supply members; they only stay out of the
        // group tags and the sheet's group row.
        let sources = self
            .directory
            .resolve_groups(store, &self.settings.source_groups, &[])?;
        let mut tagged = sources.clone();
        for name in &self.settings.exclude_groups {
            tagged.remove(name);
        }

        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut seen_phones: HashSet<String> = HashSet::new();
        let mut groups = Vec::new();
        let mut records = Vec::new();
        let mut duplicates_skipped = 0;

        for name in &self.settings.source_groups {
            let Some(group_id) = sources.id_of(name) else {
                debug!(group = %name, "Source group not present in account");
                continue;
            };
            if tagged.id_of(name).is_some() {
                groups.push(name.clone());
            }

            let mut kept = 0;
            for member in self.directory.members_of(store, group_id)? {
                let record = normalize(member);
                if self.is_duplicate(&record, &seen_ids, &seen_phones) {
                    debug!(contact = %record.display_name(), group = %name, "Skipping duplicate");
                    duplicates_skipped += 1;
                    continue;
                }
                if let Some(id) = &record.resource_name {
                    seen_ids.insert(id.clone());
                }
                if self.settings.dedupe_by_number {
                    seen_phones.extend(
                        record
                            .phone_values()
                            .filter(|key| !key.is_empty())
                            .map(ToString::to_string),
                    );
                }
                records.push(self.stamp(record, &tagged));
                kept += 1;
            }
            info!(group = %name, kept, "Collected source group");
        }

        Ok(StagedExport {
            set: RecordSet {
                mission_group: self.settings.mission_group.clone(),
                groups,
                records,
            },
            duplicates_skipped,
        })
    }

    /// Stage the source groups and overwrite `sheet` with them.
    ///
    /// # Errors
    ///
    /// Returns an error if the store reads fail for good or the sheet
    /// cannot be written.
    pub fn export<S, W>(&self, store: &S, sheet: &mut W) -> Result<ExportReport>
    where
        S: ContactStore + ?Sized,
        W: SheetStore + ?Sized,
    {
        let staged = self.stage(store)?;
        let grid = encode(&staged.set)?;
        sheet.clear()?;
        sheet.write_range(&grid)?;

        let report = ExportReport {
            exported: staged.set.records.len(),
            duplicates_skipped: staged.duplicates_skipped,
            photo_refs: staged
                .set
                .records
                .iter()
                .filter(|record| record.photo_ref().is_some())
                .count(),
            mission_group: staged.set.mission_group,
            groups: staged.set.groups,
            content_hash: grid_hash(&grid),
        };
        info!(
            exported = report.exported,
            duplicates = report.duplicates_skipped,
            hash = %report.content_hash,
            "Export written"
        );
        Ok(report)
    }

    fn is_duplicate(
        &self,
        record: &ContactRecord,
        seen_ids: &HashSet<String>,
        seen_phones: &HashSet<String>,
    ) -> bool {
        if record
            .resource_name
            .as_ref()
            .is_some_and(|id| seen_ids.contains(id))
        {
            return true;
        }
        self.settings.dedupe_by_number && record.phone_values().any(|key| seen_phones.contains(key))
    }

    /// Tag a normalized record for transport and strip source-only fields.
    fn stamp(&self, mut record: ContactRecord, tagged: &GroupMap) -> ContactRecord {
        for kind in [TagKind::Identity, TagKind::Group, TagKind::PhotoRef] {
            record.strip_tags(&kind);
        }
        let mut tags = Vec::new();

        let photo = record
            .photos
            .first()
            .filter(|photo| !photo.is_default_photo())
            .and_then(|photo| photo.url());
        if let Some(url) = photo {
            tags.push(SyncTag::photo_ref(url));
        }
        if let Some(id) = &record.resource_name {
            tags.push(SyncTag::identity(id.clone()));
        }
        if !self.settings.mission_group.is_empty() {
            tags.push(SyncTag::group(self.settings.mission_group.clone()));
        }
        for group_id in &record.memberships {
            if let Some(name) = tagged.name_of(group_id) {
                tags.push(SyncTag::group(name));
            }
        }

        tags.append(&mut record.misc_keywords);
        record.misc_keywords = tags;
        record.resource_name = None;
        record.etag = None;
        record.memberships.clear();
        record.photos.clear();
        record
    }
}
