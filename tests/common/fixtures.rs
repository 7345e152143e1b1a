#![allow(dead_code)]

use contact_sync::model::{ContactRecord, FieldEntry, SyncTag};
use contact_sync::sheet::RecordSet;
use contact_sync::store::{ContactStore, SqliteContactStore};
use serde_json::json;

/// A source-side contact with one name and one phone number.
pub fn person(name: &str, phone: &str) -> ContactRecord {
    let mut entry = FieldEntry::default();
    entry.body.insert("displayName".into(), json!(name));
    entry.metadata = Some(json!({"primary": true, "source": {"type": "CONTACT"}}));
    let mut number = FieldEntry::with_value(phone);
    number.metadata = Some(json!({"primary": true}));
    ContactRecord {
        names: vec![entry],
        phone_numbers: vec![number],
        ..ContactRecord::default()
    }
}

/// Create `records` in `store` and add them to `group`, creating the group
/// when it does not exist yet. Returns the new resource names in order.
pub fn add_to_group(
    store: &mut SqliteContactStore,
    group: &str,
    records: &[ContactRecord],
) -> Vec<String> {
    let group_id = match store.group_by_name(group).expect("group lookup") {
        Some(existing) => existing.resource_name,
        None => store.create_group(group).expect("create group").resource_name,
    };
    let mut ids = Vec::with_capacity(records.len());
    for chunk in records.chunks(10) {
        for result in store.batch_create(chunk).expect("batch create") {
            ids.push(
                result
                    .expect("record created")
                    .resource_name
                    .expect("resource name"),
            );
        }
    }
    for slice in ids.chunks(1000) {
        store.modify_members(&group_id, slice).expect("modify members");
    }
    ids
}

/// A staged record as the exporter would write it.
pub fn staged(identity: &str, name: &str, phone: &str, groups: &[&str]) -> ContactRecord {
    let mut record = person(name, phone);
    record.names[0].metadata = None;
    record.phone_numbers[0].metadata = None;
    record.push_tag(SyncTag::identity(identity));
    for group in groups {
        record.push_tag(SyncTag::group(*group));
    }
    record
}

pub fn record_set(mission: &str, groups: &[&str], records: Vec<ContactRecord>) -> RecordSet {
    RecordSet {
        mission_group: mission.to_string(),
        groups: groups.iter().map(ToString::to_string).collect(),
        records,
    }
}

/// `count` staged records tagged with `group`, identities `people/s{n}`.
pub fn staged_batch(count: usize, group: &str) -> Vec<ContactRecord> {
    (0..count)
        .map(|n| {
            staged(
                &format!("people/s{n}"),
                &format!("Member {n}"),
                &format!("555{n:07}"),
                &[group],
            )
        })
        .collect()
}
