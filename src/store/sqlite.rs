//! `SQLite`-backed contact account.

use crate::error::Result;
use crate::model::{ContactGroup, ContactRecord, FieldEntry, GroupType};
use crate::store::masks::CONTACT_FIELDS;
use crate::store::schema::apply_schema;
use crate::store::{ContactStore, StoreError, StoreResult, limits};
use crate::util::short_hash;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const CONTACT_PREFIX: &str = "people/c";

/// A contact account persisted in a `SQLite` file.
#[derive(Debug)]
pub struct SqliteContactStore {
    conn: Connection,
}

impl SqliteContactStore {
    /// Open (or create) the account at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open with a busy timeout (ms). Without one, a locked account
    /// surfaces immediately as a transient store error.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open_with_timeout(path: &Path, busy_timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        if let Some(timeout) = busy_timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        }
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory account for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Look a group up by display name.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the query fails.
    pub fn group_by_name(&self, name: &str) -> StoreResult<Option<ContactGroup>> {
        Ok(self
            .list_groups()?
            .into_iter()
            .find(|group| group.name == name))
    }

    /// Every contact in the account, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the query fails.
    pub fn all_contacts(&self) -> StoreResult<Vec<ContactRecord>> {
        const OP: &str = "all_contacts";
        let ids: Vec<i64> = {
            let mut stmt = self
                .conn
                .prepare("SELECT id FROM contacts ORDER BY id")
                .map_err(db(OP))?;
            stmt.query_map([], |row| row.get(0))
                .map_err(db(OP))?
                .collect::<rusqlite::Result<_>>()
                .map_err(db(OP))?
        };
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = read_contact(&self.conn, OP, id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Raw photo payload last uploaded for a contact.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the query fails.
    pub fn photo_bytes(&self, resource_name: &str) -> StoreResult<Option<String>> {
        const OP: &str = "photo_bytes";
        let id = contact_row_id(OP, resource_name)?;
        let bytes: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT photo_bytes FROM contacts WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db(OP))?;
        Ok(bytes.flatten())
    }
}

impl ContactStore for SqliteContactStore {
    fn list_groups(&self) -> StoreResult<Vec<ContactGroup>> {
        const OP: &str = "list_groups";
        let mut stmt = self
            .conn
            .prepare(
                "SELECT g.resource_name, g.name, g.group_type,
                        (SELECT count(*) FROM memberships m WHERE m.group_id = g.id)
                 FROM contact_groups g ORDER BY g.id",
            )
            .map_err(db(OP))?;
        let rows = stmt
            .query_map([], |row| {
                let group_type: String = row.get(2)?;
                let count: i64 = row.get(3)?;
                Ok(ContactGroup {
                    resource_name: row.get(0)?,
                    name: row.get(1)?,
                    group_type: parse_group_type(&group_type),
                    member_count: usize::try_from(count).unwrap_or(0),
                })
            })
            .map_err(db(OP))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db(OP))
    }

    fn group_member_ids(&self, group_id: &str, max: usize) -> StoreResult<Vec<String>> {
        const OP: &str = "group_member_ids";
        if max > limits::MEMBER_LIST {
            return Err(StoreError::rejected(
                OP,
                format!("max members {max} exceeds {}", limits::MEMBER_LIST),
            ));
        }
        let (row_id, _) = group_row(&self.conn, OP, group_id)?;
        let mut stmt = self
            .conn
            .prepare(
                "SELECT contact_id FROM memberships WHERE group_id = ?1
                 ORDER BY contact_id LIMIT ?2",
            )
            .map_err(db(OP))?;
        let limit = i64::try_from(max).unwrap_or(i64::MAX);
        let ids = stmt
            .query_map(params![row_id, limit], |row| row.get::<_, i64>(0))
            .map_err(db(OP))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db(OP))?;
        Ok(ids.into_iter().map(contact_resource_name).collect())
    }

    fn batch_get(&self, ids: &[String]) -> StoreResult<Vec<ContactRecord>> {
        const OP: &str = "batch_get";
        if ids.len() > limits::BATCH_GET {
            return Err(StoreError::rejected(
                OP,
                format!("{} ids exceeds {}", ids.len(), limits::BATCH_GET),
            ));
        }
        let mut records = Vec::with_capacity(ids.len());
        for resource_name in ids {
            let Ok(row_id) = contact_row_id(OP, resource_name) else {
                debug!(resource_name, "Skipping malformed contact id");
                continue;
            };
            match read_contact(&self.conn, OP, row_id)? {
                Some(record) => records.push(record),
                None => debug!(resource_name, "Contact no longer exists"),
            }
        }
        Ok(records)
    }

    fn create_group(&mut self, name: &str) -> StoreResult<ContactGroup> {
        const OP: &str = "create_group";
        if name.trim().is_empty() {
            return Err(StoreError::rejected(OP, "group name is empty"));
        }
        let tx = self.conn.transaction().map_err(db(OP))?;
        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM contact_groups WHERE name = ?1)",
                [name],
                |row| row.get(0),
            )
            .map_err(db(OP))?;
        if exists {
            return Err(StoreError::rejected(
                OP,
                format!("group '{name}' already exists"),
            ));
        }
        tx.execute(
            "INSERT INTO contact_groups (name, group_type, created_at)
             VALUES (?1, 'USER_CONTACT_GROUP', ?2)",
            params![name, Utc::now().to_rfc3339()],
        )
        .map_err(db(OP))?;
        let row_id = tx.last_insert_rowid();
        let resource_name = format!("contactGroups/g{row_id}");
        tx.execute(
            "UPDATE contact_groups SET resource_name = ?1 WHERE id = ?2",
            params![resource_name, row_id],
        )
        .map_err(db(OP))?;
        tx.commit().map_err(db(OP))?;

        Ok(ContactGroup {
            resource_name,
            name: name.to_string(),
            group_type: GroupType::UserContactGroup,
            member_count: 0,
        })
    }

    fn delete_group(&mut self, group_id: &str, delete_contacts: bool) -> StoreResult<()> {
        const OP: &str = "delete_group";
        let tx = self.conn.transaction().map_err(db(OP))?;
        let (row_id, group_type) = group_row(&tx, OP, group_id)?;
        if group_type == GroupType::SystemContactGroup {
            return Err(StoreError::rejected(
                OP,
                format!("system group '{group_id}' cannot be deleted"),
            ));
        }
        if delete_contacts {
            let removed = tx
                .execute(
                    "DELETE FROM contacts WHERE id IN
                     (SELECT contact_id FROM memberships WHERE group_id = ?1)",
                    [row_id],
                )
                .map_err(db(OP))?;
            debug!(group_id, removed, "Deleted group members");
        }
        tx.execute("DELETE FROM contact_groups WHERE id = ?1", [row_id])
            .map_err(db(OP))?;
        tx.commit().map_err(db(OP))
    }

    fn modify_members(&mut self, group_id: &str, add: &[String]) -> StoreResult<()> {
        const OP: &str = "modify_members";
        if add.len() > limits::MODIFY_MEMBERS {
            return Err(StoreError::rejected(
                OP,
                format!("{} ids exceeds {}", add.len(), limits::MODIFY_MEMBERS),
            ));
        }
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction().map_err(db(OP))?;
        let (group_row_id, _) = group_row(&tx, OP, group_id)?;
        for resource_name in add {
            let contact_id = contact_row_id(OP, resource_name)?;
            if !contact_exists(&tx, OP, contact_id)? {
                return Err(StoreError::not_found(OP, resource_name.clone()));
            }
            tx.execute(
                "INSERT OR IGNORE INTO memberships (group_id, contact_id, added_at)
                 VALUES (?1, ?2, ?3)",
                params![group_row_id, contact_id, now],
            )
            .map_err(db(OP))?;
        }
        tx.commit().map_err(db(OP))
    }

    fn batch_create(
        &mut self,
        records: &[ContactRecord],
    ) -> StoreResult<Vec<StoreResult<ContactRecord>>> {
        const OP: &str = "batch_create";
        if records.len() > limits::CREATE {
            return Err(StoreError::rejected(
                OP,
                format!("{} records exceeds {}", records.len(), limits::CREATE),
            ));
        }
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction().map_err(db(OP))?;
        let (my_contacts, _) = group_row(&tx, OP, "contactGroups/myContacts")?;

        let mut results = Vec::with_capacity(records.len());
        for record in records {
            if let Some(existing) = &record.resource_name {
                results.push(Err(StoreError::rejected(
                    OP,
                    format!("record already has resource name '{existing}'"),
                )));
                continue;
            }
            tx.execute(
                "INSERT INTO contacts (etag, body, created_at, updated_at)
                 VALUES ('', '{}', ?1, ?1)",
                [&now],
            )
            .map_err(db(OP))?;
            let row_id = tx.last_insert_rowid();

            let mut stored = record.clone();
            stored.memberships.clear();
            stored.etag = None;
            stamp_metadata(&mut stored, row_id);
            write_body(&tx, OP, row_id, &stored, &now)?;
            tx.execute(
                "INSERT INTO memberships (group_id, contact_id, added_at) VALUES (?1, ?2, ?3)",
                params![my_contacts, row_id, now],
            )
            .map_err(db(OP))?;

            let created = read_contact(&tx, OP, row_id)?
                .ok_or_else(|| StoreError::not_found(OP, contact_resource_name(row_id)))?;
            results.push(Ok(created));
        }
        tx.commit().map_err(db(OP))?;
        Ok(results)
    }

    fn batch_update(
        &mut self,
        records: &BTreeMap<String, ContactRecord>,
        mask: &[&str],
    ) -> StoreResult<Vec<ContactRecord>> {
        const OP: &str = "batch_update";
        if records.len() > limits::UPDATE {
            return Err(StoreError::rejected(
                OP,
                format!("{} records exceeds {}", records.len(), limits::UPDATE),
            ));
        }
        if let Some(field) = mask.iter().find(|field| !CONTACT_FIELDS.contains(field)) {
            return Err(StoreError::rejected(
                OP,
                format!("'{field}' is not an updatable field"),
            ));
        }

        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction().map_err(db(OP))?;
        let mut updated = Vec::with_capacity(records.len());
        for (resource_name, incoming) in records {
            let row_id = contact_row_id(OP, resource_name)?;
            let existing = read_contact(&tx, OP, row_id)?
                .ok_or_else(|| StoreError::not_found(OP, resource_name.clone()))?;
            let stale = incoming
                .etag
                .as_ref()
                .is_some_and(|etag| existing.etag.as_ref() != Some(etag));
            if stale {
                return Err(StoreError::rejected(
                    OP,
                    format!("etag mismatch for '{resource_name}'"),
                ));
            }

            let mut merged = apply_mask(OP, &existing, incoming, mask)?;
            stamp_metadata(&mut merged, row_id);
            write_body(&tx, OP, row_id, &merged, &now)?;
            if let Some(record) = read_contact(&tx, OP, row_id)? {
                updated.push(record);
            }
        }
        tx.commit().map_err(db(OP))?;
        Ok(updated)
    }

    fn update_photo(&mut self, resource_name: &str, photo_bytes: &str) -> StoreResult<()> {
        const OP: &str = "update_photo";
        let decoded = URL_SAFE
            .decode(photo_bytes)
            .map_err(|err| StoreError::rejected(OP, format!("photo bytes: {err}")))?;
        if decoded.is_empty() {
            return Err(StoreError::rejected(OP, "photo bytes are empty"));
        }

        let row_id = contact_row_id(OP, resource_name)?;
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction().map_err(db(OP))?;
        let mut record = read_contact(&tx, OP, row_id)?
            .ok_or_else(|| StoreError::not_found(OP, resource_name))?;
        let mut photo = FieldEntry::photo(format!("store://{resource_name}/photo"), false);
        photo.metadata = Some(json!({"primary": true}));
        record.photos = vec![photo];
        write_body(&tx, OP, row_id, &record, &now)?;
        tx.execute(
            "UPDATE contacts SET photo_bytes = ?1 WHERE id = ?2",
            params![photo_bytes, row_id],
        )
        .map_err(db(OP))?;
        tx.commit().map_err(db(OP))
    }
}

fn db(op: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |err| StoreError::from_sqlite(op, &err)
}

fn json_error(op: &str, err: &serde_json::Error) -> StoreError {
    StoreError::Backend {
        op: op.to_string(),
        reason: format!("record JSON: {err}"),
    }
}

fn contact_resource_name(row_id: i64) -> String {
    format!("{CONTACT_PREFIX}{row_id}")
}

fn contact_row_id(op: &str, resource_name: &str) -> StoreResult<i64> {
    resource_name
        .strip_prefix(CONTACT_PREFIX)
        .and_then(|rest| rest.parse().ok())
        .ok_or_else(|| StoreError::not_found(op, resource_name))
}

fn parse_group_type(raw: &str) -> GroupType {
    if raw == GroupType::SystemContactGroup.as_str() {
        GroupType::SystemContactGroup
    } else {
        GroupType::UserContactGroup
    }
}

fn group_row(conn: &Connection, op: &'static str, group_id: &str) -> StoreResult<(i64, GroupType)> {
    conn.query_row(
        "SELECT id, group_type FROM contact_groups WHERE resource_name = ?1",
        [group_id],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
    )
    .optional()
    .map_err(db(op))?
    .map(|(id, kind)| (id, parse_group_type(&kind)))
    .ok_or_else(|| StoreError::not_found(op, group_id))
}

fn contact_exists(conn: &Connection, op: &'static str, row_id: i64) -> StoreResult<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM contacts WHERE id = ?1)",
        [row_id],
        |row| row.get(0),
    )
    .map_err(db(op))
}

fn read_contact(
    conn: &Connection,
    op: &'static str,
    row_id: i64,
) -> StoreResult<Option<ContactRecord>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT etag, body FROM contacts WHERE id = ?1",
            [row_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(db(op))?;
    let Some((etag, body)) = row else {
        return Ok(None);
    };

    let mut record: ContactRecord =
        serde_json::from_str(&body).map_err(|err| json_error(op, &err))?;
    record.resource_name = Some(contact_resource_name(row_id));
    record.etag = Some(etag);

    let mut stmt = conn
        .prepare(
            "SELECT g.resource_name FROM memberships m
             JOIN contact_groups g ON g.id = m.group_id
             WHERE m.contact_id = ?1 ORDER BY g.id",
        )
        .map_err(db(op))?;
    record.memberships = stmt
        .query_map([row_id], |row| row.get(0))
        .map_err(db(op))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(db(op))?;

    Ok(Some(record))
}

fn write_body(
    conn: &Connection,
    op: &'static str,
    row_id: i64,
    record: &ContactRecord,
    now: &str,
) -> StoreResult<()> {
    let mut body = record.clone();
    body.resource_name = None;
    body.etag = None;
    body.memberships.clear();
    let json = serde_json::to_string(&body).map_err(|err| json_error(op, &err))?;
    let etag = short_hash(&json);
    conn.execute(
        "UPDATE contacts SET body = ?1, etag = ?2, updated_at = ?3 WHERE id = ?4",
        params![json, etag, now, row_id],
    )
    .map_err(db(op))?;
    Ok(())
}

/// Give every field entry provenance metadata, as a real account does.
fn stamp_metadata(record: &mut ContactRecord, row_id: i64) {
    for field in record.fields_mut() {
        for (idx, entry) in field.iter_mut().enumerate() {
            if entry.metadata.is_none() {
                entry.metadata = Some(json!({
                    "primary": idx == 0,
                    "source": {"type": "CONTACT", "id": format!("c{row_id}")},
                }));
            }
        }
    }
}

fn apply_mask(
    op: &str,
    existing: &ContactRecord,
    incoming: &ContactRecord,
    mask: &[&str],
) -> StoreResult<ContactRecord> {
    let to_map = |record: &ContactRecord| match serde_json::to_value(record) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Ok(serde_json::Map::new()),
        Err(err) => Err(json_error(op, &err)),
    };
    let mut merged = to_map(existing)?;
    let incoming = to_map(incoming)?;
    for field in mask {
        match incoming.get(*field) {
            Some(value) => {
                merged.insert((*field).to_string(), value.clone());
            }
            None => {
                merged.remove(*field);
            }
        }
    }
    serde_json::from_value(Value::Object(merged)).map_err(|err| json_error(op, &err))
}
