#![allow(dead_code)]

use contact_sync::model::ContactRecord;
use contact_sync::store::{ContactStore, SqliteContactStore};
use tracing::info;

/// Members of `group` at `store`, fully fetched.
pub fn group_members(store: &SqliteContactStore, group: &str) -> Vec<ContactRecord> {
    let Some(found) = store
        .group_by_name(group)
        .unwrap_or_else(|err| panic!("group lookup failed for {group}: {err}"))
    else {
        return Vec::new();
    };
    let ids = store
        .group_member_ids(&found.resource_name, 1000)
        .unwrap_or_else(|err| panic!("member listing failed for {group}: {err}"));
    ids.chunks(50)
        .flat_map(|slice| {
            store
                .batch_get(slice)
                .unwrap_or_else(|err| panic!("batch get failed: {err}"))
        })
        .collect()
}

pub fn assert_group_size(store: &SqliteContactStore, group: &str, expected: usize) {
    info!("Asserting group {} has {} member(s)", group, expected);
    let members = group_members(store, group);
    assert_eq!(
        members.len(),
        expected,
        "expected {expected} member(s) in {group}, got {}",
        members.len()
    );
}

pub fn assert_no_group(store: &SqliteContactStore, group: &str) {
    info!("Asserting group {} does not exist", group);
    let found = store
        .group_by_name(group)
        .unwrap_or_else(|err| panic!("group lookup failed for {group}: {err}"));
    assert!(found.is_none(), "expected group {group} to be absent");
}

/// The destination record carrying `identity`.
pub fn by_identity(store: &SqliteContactStore, identity: &str) -> ContactRecord {
    let matches: Vec<ContactRecord> = store
        .all_contacts()
        .unwrap_or_else(|err| panic!("listing contacts failed: {err}"))
        .into_iter()
        .filter(|record| record.identity() == Some(identity))
        .collect();
    assert_eq!(
        matches.len(),
        1,
        "expected exactly one contact with identity {identity}, got {}",
        matches.len()
    );
    matches.into_iter().next().unwrap_or_default()
}
