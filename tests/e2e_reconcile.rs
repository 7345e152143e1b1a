//! End-to-end reconciliation through the library API.
//!
//! A source account is exported into an in-memory sheet, the sheet is
//! imported into a second account, and the destination is checked after
//! each run. All waits go through a manual clock.

mod common;

use common::assertions::{assert_group_size, assert_no_group, by_identity, group_members};
use common::fixtures::{add_to_group, person, record_set, staged};
use common::{test_account, test_log};
use contact_sync::export::{ExportSettings, Exporter};
use contact_sync::import::groups::{CREATE_SETTLE, DELETE_SETTLE};
use contact_sync::import::{DELETE_GROUP, ImportSettings, Importer};
use contact_sync::model::{FieldEntry, TagKind};
use contact_sync::photo::{FETCH_TIMEOUT, FilePhotoSource, HttpPhotoSource};
use contact_sync::sheet::{MemorySheet, SheetStore, decode};
use contact_sync::util::ManualClock;
use std::fs;
use tempfile::TempDir;

fn ice_only(mission: &str) -> ExportSettings {
    ExportSettings {
        source_groups: vec!["ICE".to_string()],
        mission_group: mission.to_string(),
        exclude_groups: Vec::new(),
        dedupe_by_number: true,
    }
}

#[test]
fn e2e_single_contact_round_trip() {
    let _log = test_log("e2e_single_contact_round_trip");
    let mut source = test_account();
    let ids = add_to_group(&mut source, "ICE", &[person("Ada", "555-1234567890")]);
    assert_eq!(ids, ["people/c1"]);

    let clock = ManualClock::new();
    let mut sheet = MemorySheet::new();
    let report = Exporter::new(ice_only(""), &clock)
        .export(&source, &mut sheet)
        .expect("export");
    assert_eq!(report.exported, 1);
    assert_eq!(report.groups, ["ICE"]);

    let set = decode(&sheet.read_range().expect("read")).expect("decode");
    assert_eq!(set.mission_group, "");
    let record = &set.records[0];
    assert_eq!(record.identity(), Some("people/c1"));
    assert_eq!(record.group_tags().collect::<Vec<_>>(), ["ICE"]);
    assert_eq!(record.phone_values().collect::<Vec<_>>(), ["1234567890"]);
    assert!(record.resource_name.is_none());
    assert!(record.names[0].metadata.is_none());

    let mut destination = test_account();
    let photos = FilePhotoSource::new();
    let importer =
        Importer::new(ImportSettings::default(), "ops", &clock, &photos).expect("importer");
    let report = importer.import(&mut destination, &sheet).expect("import");
    assert_eq!(report.created, 1);
    assert_eq!(report.matched, 0);
    assert_eq!(report.deleted, 0);
    assert_eq!(report.photos_updated, 0);
    assert!(!report.has_failures());

    assert_group_size(&destination, "ICE", 1);
    let imported = by_identity(&destination, "people/c1");
    assert_eq!(imported.display_name(), "Ada");
    assert_eq!(clock.sleeps(), [CREATE_SETTLE]);
}

#[test]
fn e2e_rerun_is_idempotent() {
    let _log = test_log("e2e_rerun_is_idempotent");
    let mut source = test_account();
    add_to_group(
        &mut source,
        "ICE",
        &[person("Ada", "5550000001"), person("Bo", "5550000002")],
    );
    let clock = ManualClock::new();
    let mut sheet = MemorySheet::new();
    Exporter::new(ice_only("Mission Contacts"), &clock)
        .export(&source, &mut sheet)
        .expect("export");

    let mut destination = test_account();
    let photos = FilePhotoSource::new();
    let importer =
        Importer::new(ImportSettings::default(), "ops", &clock, &photos).expect("importer");
    let first = importer.import(&mut destination, &sheet).expect("first import");
    assert_eq!(first.created, 2);
    assert_eq!(first.groups_updated, ["Mission Contacts", "ICE"]);

    let second = importer.import(&mut destination, &sheet).expect("second import");
    assert_eq!(second.created, 0);
    assert_eq!(second.deleted, 0);
    assert_eq!(second.matched, 2);
    assert_eq!(second.updated, 2);
    assert!(!second.has_failures());

    assert_eq!(destination.all_contacts().expect("contacts").len(), 2);
    assert_group_size(&destination, "ICE", 2);
    assert_group_size(&destination, "Mission Contacts", 2);
    assert_no_group(&destination, DELETE_GROUP);
}

#[test]
fn e2e_stale_records_are_deleted() {
    let _log = test_log("e2e_stale_records_are_deleted");
    let mut destination = test_account();
    let clock = ManualClock::new();
    let photos = FilePhotoSource::new();
    let importer =
        Importer::new(ImportSettings::default(), "ops", &clock, &photos).expect("importer");

    let both = record_set(
        "",
        &["ICE"],
        vec![
            staged("people/c1", "Ada", "1", &["ICE"]),
            staged("people/c2", "Bo", "2", &["ICE"]),
        ],
    );
    importer.apply(&mut destination, both).expect("first import");
    assert_group_size(&destination, "ICE", 2);

    let one = record_set("", &["ICE"], vec![staged("people/c1", "Ada", "1", &["ICE"])]);
    let report = importer.apply(&mut destination, one).expect("second import");
    assert_eq!(report.matched, 1);
    assert_eq!(report.stale, 1);
    assert_eq!(report.deleted, 1);

    let remaining = destination.all_contacts().expect("contacts");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].identity(), Some("people/c1"));
    assert_no_group(&destination, DELETE_GROUP);
    assert!(clock.sleeps().contains(&DELETE_SETTLE));
}

#[test]
fn e2e_identity_decides_matches() {
    let _log = test_log("e2e_identity_decides_matches");
    let mut destination = test_account();
    let clock = ManualClock::new();
    let photos = FilePhotoSource::new();
    let importer =
        Importer::new(ImportSettings::default(), "ops", &clock, &photos).expect("importer");

    importer
        .apply(
            &mut destination,
            record_set("", &["ICE"], vec![staged("people/c7", "Ada", "1111111111", &["ICE"])]),
        )
        .expect("seed");
    let original = by_identity(&destination, "people/c7");

    // Same identity with a new number updates in place; a record that only
    // shares the number is still a new contact.
    let report = importer
        .apply(
            &mut destination,
            record_set(
                "",
                &["ICE"],
                vec![
                    staged("people/c7", "Ada Lovelace", "2222222222", &["ICE"]),
                    staged("people/c8", "Twin", "1111111111", &["ICE"]),
                ],
            ),
        )
        .expect("second import");
    assert_eq!(report.matched, 1);
    assert_eq!(report.created, 1);
    assert_eq!(report.stale, 0);

    let updated = by_identity(&destination, "people/c7");
    assert_eq!(updated.resource_name, original.resource_name);
    assert_eq!(updated.display_name(), "Ada Lovelace");
    assert_eq!(updated.phone_values().collect::<Vec<_>>(), ["2222222222"]);
    assert_group_size(&destination, "ICE", 2);
}

#[test]
fn e2e_group_membership_follows_tags() {
    let _log = test_log("e2e_group_membership_follows_tags");
    let mut source = test_account();
    add_to_group(&mut source, "ICE", &[person("Ada", "5550000001")]);
    add_to_group(&mut source, "Static", &[person("Bo", "5550000002")]);
    add_to_group(&mut source, "Roster", &[person("Cy", "5550000003")]);

    let clock = ManualClock::new();
    let mut sheet = MemorySheet::new();
    let report = Exporter::new(ExportSettings::default(), &clock)
        .export(&source, &mut sheet)
        .expect("export");
    assert_eq!(report.groups, ["ICE", "Static"]);
    // Roster is excluded from tags, not from the export.
    assert_eq!(report.exported, 3);

    let mut destination = test_account();
    let photos = FilePhotoSource::new();
    Importer::new(ImportSettings::default(), "ops", &clock, &photos)
        .expect("importer")
        .import(&mut destination, &sheet)
        .expect("import");

    assert_group_size(&destination, "Mission Contacts", 3);
    assert_group_size(&destination, "ICE", 1);
    assert_group_size(&destination, "Static", 1);
    assert_no_group(&destination, "Roster");
    let static_members = group_members(&destination, "Static");
    assert_eq!(static_members[0].display_name(), "Bo");
}

#[test]
fn e2e_photo_uploaded_once() {
    let _log = test_log("e2e_photo_uploaded_once");
    let photo_dir = TempDir::new().expect("photo dir");
    let photo_path = photo_dir.path().join("ada.png");
    fs::write(&photo_path, b"\x89PNG fake image bytes").expect("write photo");

    let mut source = test_account();
    let mut ada = person("Ada", "5550000001");
    ada.photos = vec![FieldEntry::photo(
        format!("file://{}", photo_path.display()),
        false,
    )];
    add_to_group(&mut source, "ICE", &[ada]);

    let clock = ManualClock::new();
    let mut sheet = MemorySheet::new();
    let report = Exporter::new(ice_only(""), &clock)
        .export(&source, &mut sheet)
        .expect("export");
    assert_eq!(report.photo_refs, 1);

    let mut destination = test_account();
    let photos = FilePhotoSource::new();
    let importer =
        Importer::new(ImportSettings::default(), "ops", &clock, &photos).expect("importer");
    let first = importer.import(&mut destination, &sheet).expect("first import");
    assert_eq!(first.photos_updated, 1);

    let imported = by_identity(&destination, "people/c1");
    let resource_name = imported.resource_name.clone().expect("resource name");
    assert!(
        destination
            .photo_bytes(&resource_name)
            .expect("photo bytes")
            .is_some()
    );
    assert_eq!(imported.tags_of(&TagKind::PhotoRef).count(), 1);

    let second = importer.import(&mut destination, &sheet).expect("second import");
    assert_eq!(second.photos_updated, 0);
    assert_eq!(second.photos_failed, 0);
}

#[test]
fn e2e_http_photo_uploaded() {
    let _log = test_log("e2e_http_photo_uploaded");
    let server = tiny_http::Server::http("127.0.0.1:0").expect("photo server");
    let addr = server.server_addr().to_ip().expect("ip address");
    let serving = std::thread::spawn(move || {
        let request = server.recv().expect("photo request");
        let body = b"\x89PNG hosted image".to_vec();
        request
            .respond(tiny_http::Response::from_data(body))
            .expect("respond");
    });

    let mut source = test_account();
    let mut ada = person("Ada", "5550000001");
    ada.photos = vec![FieldEntry::photo(format!("http://{addr}/ada.png"), false)];
    add_to_group(&mut source, "ICE", &[ada]);

    let clock = ManualClock::new();
    let mut sheet = MemorySheet::new();
    Exporter::new(ice_only(""), &clock)
        .export(&source, &mut sheet)
        .expect("export");

    let mut destination = test_account();
    let photos =
        HttpPhotoSource::new(FilePhotoSource::new(), FETCH_TIMEOUT).expect("http photo source");
    let report = Importer::new(ImportSettings::default(), "ops", &clock, &photos)
        .expect("importer")
        .import(&mut destination, &sheet)
        .expect("import");
    serving.join().expect("server thread");

    assert_eq!(report.photos_updated, 1);
    assert_eq!(report.photo_refs_stripped, 0);
    let imported = by_identity(&destination, "people/c1");
    let resource_name = imported.resource_name.clone().expect("resource name");
    assert!(
        destination
            .photo_bytes(&resource_name)
            .expect("photo bytes")
            .is_some()
    );
}
