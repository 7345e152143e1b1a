//! Identity matching between staged records and destination records.

use crate::error::{Result, SyncError};
use crate::model::{Classification, ContactRecord, METADATA_FIELDS, MatchedPair, TagKind};
use serde::Serialize;
use std::collections::HashMap;

/// A staged record that cannot be imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedRecord {
    /// 1-based position in the staged contacts row.
    pub position: usize,
    pub label: String,
    pub reason: String,
}

/// Staged records keyed by their `IDENTITY` tag.
///
/// Matching consumes entries, so each staged record pairs with at most one
/// destination record. What is left afterwards gets created.
#[derive(Debug, Default)]
pub struct IncomingIndex {
    slots: Vec<Option<ContactRecord>>,
    by_identity: HashMap<String, usize>,
}

impl IncomingIndex {
    /// Index `records`, setting aside those without exactly one identity.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::DuplicateIdentity` when two records claim the
    /// same identity; there is no safe way to choose between them.
    pub fn build(records: Vec<ContactRecord>) -> Result<(Self, Vec<MalformedRecord>)> {
        let mut index = Self::default();
        let mut malformed = Vec::new();

        for (idx, record) in records.into_iter().enumerate() {
            let identities: Vec<&str> = record.tags_of(&TagKind::Identity).collect();
            let identity = match identities.as_slice() {
                [one] if !one.is_empty() => (*one).to_string(),
                [] | [_] => {
                    malformed.push(MalformedRecord {
                        position: idx + 1,
                        label: record.display_name(),
                        reason: "missing identity tag".to_string(),
                    });
                    continue;
                }
                many => {
                    malformed.push(MalformedRecord {
                        position: idx + 1,
                        label: record.display_name(),
                        reason: format!("{} identity tags", many.len()),
                    });
                    continue;
                }
            };
            if index.by_identity.contains_key(&identity) {
                return Err(SyncError::DuplicateIdentity { identity });
            }
            index.by_identity.insert(identity, index.slots.len());
            index.slots.push(Some(record));
        }
        Ok((index, malformed))
    }

    #[must_use]
    pub fn contains(&self, identity: &str) -> bool {
        self.by_identity.contains_key(identity)
    }

    /// Remove and return the record for `identity`.
    pub fn take(&mut self, identity: &str) -> Option<ContactRecord> {
        let slot = self.by_identity.remove(identity)?;
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// Records not yet taken.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_identity.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty()
    }

    /// Untaken records in staged order.
    #[must_use]
    pub fn into_remaining(self) -> Vec<ContactRecord> {
        self.slots.into_iter().flatten().collect()
    }
}

/// Classify a destination record against the staged index.
#[must_use]
pub fn classify(existing: &ContactRecord, index: &IncomingIndex) -> Classification {
    match existing.identity() {
        Some(identity) if index.contains(identity) => Classification::Matched,
        _ => Classification::Stale,
    }
}

/// Pair a destination record with its staged counterpart.
///
/// The staged record takes over the destination's resource name and etag
/// and, entry by entry, the provenance metadata of the fields both share.
#[must_use]
pub fn pair(existing: ContactRecord, mut incoming: ContactRecord) -> MatchedPair {
    copy_field_metadata(&existing, &mut incoming);
    incoming.resource_name.clone_from(&existing.resource_name);
    incoming.etag.clone_from(&existing.etag);
    MatchedPair { existing, incoming }
}

/// Copy `metadata` positionally for every field in [`METADATA_FIELDS`].
pub fn copy_field_metadata(from: &ContactRecord, onto: &mut ContactRecord) {
    for name in METADATA_FIELDS {
        let (Some(source), Some(target)) = (from.field(name), onto.field_mut(name)) else {
            continue;
        };
        for (old, new) in source.iter().zip(target.iter_mut()) {
            if old.metadata.is_some() {
                new.metadata.clone_from(&old.metadata);
            }
        }
    }
}
