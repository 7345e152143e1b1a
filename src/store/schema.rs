//! Account database schema.

use rusqlite::{Connection, Result, params};

/// System groups every account starts with.
pub const SYSTEM_GROUPS: &[&str] = &[
    "myContacts",
    "starred",
    "chatBuddies",
    "all",
    "friends",
    "family",
    "coworkers",
    "blocked",
];

pub const SCHEMA_SQL: &str = r"
    -- Groups. System groups use their name as resource suffix.
    CREATE TABLE IF NOT EXISTS contact_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        resource_name TEXT UNIQUE,
        name TEXT NOT NULL UNIQUE,
        group_type TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    -- Contacts. `body` is the record JSON without resourceName, etag and
    -- memberships; those are derived from the row.
    CREATE TABLE IF NOT EXISTS contacts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        etag TEXT NOT NULL,
        body TEXT NOT NULL,
        photo_bytes TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS memberships (
        group_id INTEGER NOT NULL,
        contact_id INTEGER NOT NULL,
        added_at TEXT NOT NULL,
        PRIMARY KEY (group_id, contact_id),
        FOREIGN KEY (group_id) REFERENCES contact_groups(id) ON DELETE CASCADE,
        FOREIGN KEY (contact_id) REFERENCES contacts(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_memberships_contact_id ON memberships(contact_id);
";

/// Apply the schema and seed the system groups.
///
/// Idempotent: every statement uses `IF NOT EXISTS` / `INSERT OR IGNORE`.
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    seed_system_groups(conn)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    Ok(())
}

fn seed_system_groups(conn: &Connection) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO contact_groups (resource_name, name, group_type, created_at)
         VALUES (?1, ?2, 'SYSTEM_CONTACT_GROUP', ?3)",
    )?;
    for name in SYSTEM_GROUPS {
        stmt.execute(params![format!("contactGroups/{name}"), name, now])?;
    }
    Ok(())
}
