//! Core data types for `contact_sync`.
//!
//! This module defines the fundamental types used throughout the application:
//! - `ContactRecord` - A contact as exchanged with a store or through the sheet
//! - `FieldEntry` - One value of a multi-valued contact field
//! - `SyncTag` - Cross-reference keywords carried in `miscKeywords`
//! - `ContactGroup` / `GroupMap` - Group listings and name lookups
//! - `Classification` / `MatchedPair` - Reconciliation outcomes

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Fields whose per-entry provenance metadata is copied onto a matched
/// incoming record before it overwrites the destination.
pub const METADATA_FIELDS: &[&str] = &[
    "names",
    "addresses",
    "emailAddresses",
    "phoneNumbers",
    "biographies",
];

/// Kind of a keyword stored in a record's `miscKeywords`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagKind {
    /// Destination id the record originated from.
    Identity,
    /// Logical group the record belongs to.
    Group,
    /// Dereferenceable photo location.
    PhotoRef,
    /// Any keyword type this tool does not manage.
    #[serde(untagged)]
    Custom(String),
}

impl TagKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Identity => "IDENTITY",
            Self::Group => "GROUP",
            Self::PhotoRef => "PHOTO_REF",
            Self::Custom(value) => value,
        }
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A `{type, value}` keyword carrying synchronization metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncTag {
    #[serde(rename = "type")]
    pub kind: TagKind,
    pub value: String,
}

impl SyncTag {
    #[must_use]
    pub fn new(kind: TagKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn identity(value: impl Into<String>) -> Self {
        Self::new(TagKind::Identity, value)
    }

    #[must_use]
    pub fn group(value: impl Into<String>) -> Self {
        Self::new(TagKind::Group, value)
    }

    #[must_use]
    pub fn photo_ref(value: impl Into<String>) -> Self {
        Self::new(TagKind::PhotoRef, value)
    }
}

/// One entry of a multi-valued contact field (a name, a phone number, ...).
///
/// The body is kept as free-form JSON so structured payloads (address
/// parts, name components) survive untouched; only `metadata` is modelled.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl FieldEntry {
    /// Entry whose body is `{"value": value}`.
    #[must_use]
    pub fn with_value(value: impl Into<String>) -> Self {
        let mut body = Map::new();
        body.insert("value".to_string(), Value::String(value.into()));
        Self {
            metadata: None,
            body,
        }
    }

    /// Photo entry whose body is `{"url": url}`.
    #[must_use]
    pub fn photo(url: impl Into<String>, is_default: bool) -> Self {
        let mut body = Map::new();
        body.insert("url".to_string(), Value::String(url.into()));
        if is_default {
            body.insert("default".to_string(), Value::Bool(true));
        }
        Self {
            metadata: None,
            body,
        }
    }

    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.body.get("value").and_then(Value::as_str)
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.body
            .insert("value".to_string(), Value::String(value.into()));
    }

    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.body.get("url").and_then(Value::as_str)
    }

    /// `metadata.primary`, false when absent.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|meta| meta.get("primary"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Placeholder avatars are flagged `default: true` by the store.
    #[must_use]
    pub fn is_default_photo(&self) -> bool {
        self.body
            .get("default")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A contact as returned by a store or carried in the staged sheet.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    /// Destination-assigned id; only present on records read from a store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<FieldEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<FieldEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub email_addresses: Vec<FieldEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phone_numbers: Vec<FieldEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub biographies: Vec<FieldEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<FieldEntry>,
    /// Group ids the record belongs to at its store.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memberships: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub misc_keywords: Vec<SyncTag>,
    /// Fields this tool does not interpret, kept for round trips.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContactRecord {
    /// Look up one of the [`METADATA_FIELDS`] by wire name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Vec<FieldEntry>> {
        match name {
            "names" => Some(&self.names),
            "addresses" => Some(&self.addresses),
            "emailAddresses" => Some(&self.email_addresses),
            "phoneNumbers" => Some(&self.phone_numbers),
            "biographies" => Some(&self.biographies),
            "photos" => Some(&self.photos),
            _ => None,
        }
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Vec<FieldEntry>> {
        match name {
            "names" => Some(&mut self.names),
            "addresses" => Some(&mut self.addresses),
            "emailAddresses" => Some(&mut self.email_addresses),
            "phoneNumbers" => Some(&mut self.phone_numbers),
            "biographies" => Some(&mut self.biographies),
            "photos" => Some(&mut self.photos),
            _ => None,
        }
    }

    /// Every multi-valued field, in wire order.
    pub fn fields_mut(&mut self) -> [&mut Vec<FieldEntry>; 6] {
        [
            &mut self.names,
            &mut self.addresses,
            &mut self.email_addresses,
            &mut self.phone_numbers,
            &mut self.biographies,
            &mut self.photos,
        ]
    }

    pub fn tags_of<'a>(&'a self, kind: &'a TagKind) -> impl Iterator<Item = &'a str> + 'a {
        self.misc_keywords
            .iter()
            .filter(move |tag| &tag.kind == kind)
            .map(|tag| tag.value.as_str())
    }

    /// The first identity tag, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.tags_of(&TagKind::Identity).next()
    }

    #[must_use]
    pub fn photo_ref(&self) -> Option<&str> {
        self.tags_of(&TagKind::PhotoRef).next()
    }

    pub fn group_tags(&self) -> impl Iterator<Item = &str> {
        self.tags_of(&TagKind::Group)
    }

    pub fn push_tag(&mut self, tag: SyncTag) {
        self.misc_keywords.push(tag);
    }

    /// Remove every tag of `kind`, returning how many were dropped.
    pub fn strip_tags(&mut self, kind: &TagKind) -> usize {
        let before = self.misc_keywords.len();
        self.misc_keywords.retain(|tag| &tag.kind != kind);
        before - self.misc_keywords.len()
    }

    pub fn phone_values(&self) -> impl Iterator<Item = &str> {
        self.phone_numbers.iter().filter_map(FieldEntry::value)
    }

    /// Best label for log lines.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.names
            .first()
            .and_then(|name| {
                name.body
                    .get("displayName")
                    .or_else(|| name.body.get("unstructuredName"))
                    .or_else(|| name.body.get("givenName"))
                    .and_then(Value::as_str)
            })
            .or(self.resource_name.as_deref())
            .or_else(|| self.identity())
            .unwrap_or("<unnamed>")
            .to_string()
    }
}

/// Group category as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupType {
    #[default]
    UserContactGroup,
    SystemContactGroup,
}

impl GroupType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UserContactGroup => "USER_CONTACT_GROUP",
            Self::SystemContactGroup => "SYSTEM_CONTACT_GROUP",
        }
    }
}

/// A group as listed by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactGroup {
    pub resource_name: String,
    pub name: String,
    #[serde(default)]
    pub group_type: GroupType,
    #[serde(default)]
    pub member_count: usize,
}

/// Group name to group id, rebuilt every run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMap {
    by_name: BTreeMap<String, String>,
}

impl GroupMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, id: impl Into<String>) {
        self.by_name.insert(name.into(), id.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.by_name.remove(name)
    }

    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(String::as_str)
    }

    /// Reverse lookup; group maps are small so a scan is fine.
    #[must_use]
    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.by_name
            .iter()
            .find(|(_, group_id)| group_id.as_str() == id)
            .map(|(name, _)| name.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_name
            .iter()
            .map(|(name, id)| (name.as_str(), id.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl FromIterator<(String, String)> for GroupMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            by_name: iter.into_iter().collect(),
        }
    }
}

/// How a record was classified during matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Destination record paired with an incoming record.
    Matched,
    /// Destination record with no live incoming counterpart.
    Stale,
    /// Incoming record with no destination counterpart.
    New,
}

impl Classification {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::Stale => "stale",
            Self::New => "new",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A destination record and the incoming record that will overwrite it.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedPair {
    pub existing: ContactRecord,
    pub incoming: ContactRecord,
}

/// A photo to upload for an existing destination record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPhotoUpdate {
    pub resource_name: String,
    /// Web-safe base64 image payload.
    pub photo_bytes: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tag_kinds_use_wire_names() {
        let tags = vec![
            SyncTag::identity("people/c1"),
            SyncTag::group("ICE"),
            SyncTag::photo_ref("file:///tmp/a.png"),
            SyncTag::new(TagKind::Custom("OUTLOOK_USER".to_string()), "x"),
        ];
        let json = serde_json::to_value(&tags).unwrap();
        assert_eq!(json[0]["type"], "IDENTITY");
        assert_eq!(json[1]["type"], "GROUP");
        assert_eq!(json[2]["type"], "PHOTO_REF");
        assert_eq!(json[3]["type"], "OUTLOOK_USER");

        let back: Vec<SyncTag> = serde_json::from_value(json).unwrap();
        assert_eq!(back, tags);
    }

    #[test]
    fn record_uses_camel_case_and_keeps_unknown_fields() {
        let raw = json!({
            "resourceName": "people/c9",
            "emailAddresses": [{"value": "a@example.org", "metadata": {"primary": true}}],
            "phoneNumbers": [{"value": "7015550172", "type": "mobile"}],
            "organizations": [{"name": "Acme"}]
        });
        let record: ContactRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.resource_name.as_deref(), Some("people/c9"));
        assert!(record.email_addresses[0].is_primary());
        assert_eq!(record.phone_numbers[0].body["type"], "mobile");
        assert!(record.extra.contains_key("organizations"));

        let out = serde_json::to_value(&record).unwrap();
        assert_eq!(out["organizations"][0]["name"], "Acme");
        assert!(out.get("names").is_none());
    }

    #[test]
    fn tag_helpers() {
        let mut record = ContactRecord::default();
        record.push_tag(SyncTag::photo_ref("file:///a.png"));
        record.push_tag(SyncTag::identity("people/c1"));
        record.push_tag(SyncTag::group("ICE"));
        record.push_tag(SyncTag::group("Static"));

        assert_eq!(record.identity(), Some("people/c1"));
        assert_eq!(record.photo_ref(), Some("file:///a.png"));
        assert_eq!(record.group_tags().collect::<Vec<_>>(), ["ICE", "Static"]);
        assert_eq!(record.strip_tags(&TagKind::PhotoRef), 1);
        assert_eq!(record.photo_ref(), None);
    }

    #[test]
    fn group_map_lookups() {
        let mut groups = GroupMap::new();
        groups.insert("ICE", "contactGroups/a1");
        groups.insert("Static", "contactGroups/b2");
        assert_eq!(groups.id_of("ICE"), Some("contactGroups/a1"));
        assert_eq!(groups.name_of("contactGroups/b2"), Some("Static"));
        assert_eq!(groups.names().collect::<Vec<_>>(), ["ICE", "Static"]);
        assert_eq!(groups.remove("ICE").as_deref(), Some("contactGroups/a1"));
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn display_name_falls_back() {
        let mut record = ContactRecord::default();
        assert_eq!(record.display_name(), "<unnamed>");
        record.push_tag(SyncTag::identity("people/c3"));
        assert_eq!(record.display_name(), "people/c3");
        let mut name = FieldEntry::default();
        name.body.insert("displayName".into(), json!("Ada"));
        record.names.push(name);
        assert_eq!(record.display_name(), "Ada");
    }
}
