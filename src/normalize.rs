//! Record normalization ahead of export.
//!
//! A normalized record has at most one name and one photo, no provenance
//! metadata anywhere in its tree, no etag, and phone numbers reduced to
//! their comparable digit form.

use crate::model::{ContactRecord, FieldEntry};
use serde_json::Value;

/// Nesting depth past which metadata stripping stops descending.
pub const MAX_METADATA_DEPTH: usize = 64;

const PHONE_KEY_DIGITS: usize = 10;

/// Comparable form of a phone number: digits only, and the trailing ten
/// when there are more than ten.
///
/// `"(701) 555-0172 ext"` becomes `"7015550172"`; `"+1 701 555 0172"`
/// loses its country code the same way.
#[must_use]
pub fn phone_key(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > PHONE_KEY_DIGITS {
        digits[digits.len() - PHONE_KEY_DIGITS..].to_string()
    } else {
        digits
    }
}

/// Normalize a record fetched from the source account.
#[must_use]
pub fn normalize(mut record: ContactRecord) -> ContactRecord {
    keep_primary(&mut record.names);
    keep_primary(&mut record.photos);
    record.etag = None;

    for phone in &mut record.phone_numbers {
        if let Some(value) = phone.value() {
            let key = phone_key(value);
            phone.set_value(key);
        }
    }

    for field in record.fields_mut() {
        for entry in field.iter_mut() {
            strip_entry_metadata(entry);
        }
    }
    for value in record.extra.values_mut() {
        strip_metadata(value, 1);
    }
    record.extra.remove("metadata");

    record
}

/// Reduce a multi-valued field to its primary entry, or the first one
/// when nothing is flagged primary.
fn keep_primary(entries: &mut Vec<FieldEntry>) {
    if entries.len() <= 1 {
        return;
    }
    let keep = entries
        .iter()
        .position(FieldEntry::is_primary)
        .unwrap_or(0);
    let primary = entries.swap_remove(keep);
    entries.clear();
    entries.push(primary);
}

fn strip_entry_metadata(entry: &mut FieldEntry) {
    entry.metadata = None;
    for value in entry.body.values_mut() {
        strip_metadata(value, 1);
    }
}

/// Remove every object key named `metadata` below `value`.
fn strip_metadata(value: &mut Value, depth: usize) {
    if depth > MAX_METADATA_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            map.remove("metadata");
            for child in map.values_mut() {
                strip_metadata(child, depth + 1);
            }
        }
        Value::Array(items) => {
            for child in items {
                strip_metadata(child, depth + 1);
            }
        }
        _ => {}
    }
}
