//! Record set <-> cell grid codec.
//!
//! Layout, one labelled row each:
//!
//! ```text
//! Groups   | <mission> | <group> | <group> | ...
//! Contacts | <json>    | <json>  | ...
//! Total    | <count>
//! ```
//!
//! Rows are padded with empty cells to a rectangle. Decoding skips empty
//! cells and rows with any other label.

use crate::error::{Result, SyncError};
use crate::model::ContactRecord;
use tracing::debug;

pub const GROUPS_LABEL: &str = "Groups";
pub const CONTACTS_LABEL: &str = "Contacts";
pub const TOTAL_LABEL: &str = "Total";

/// What the exporter stages and the importer applies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    /// Group every exported contact is tagged with; empty when unused.
    pub mission_group: String,
    /// Source groups in export order.
    pub groups: Vec<String>,
    pub records: Vec<ContactRecord>,
}

impl RecordSet {
    /// Every group the import manages: the mission group first, then the
    /// source groups, without duplicates.
    #[must_use]
    pub fn managed_groups(&self) -> Vec<String> {
        let mut managed: Vec<String> = Vec::with_capacity(self.groups.len() + 1);
        let candidates = std::iter::once(&self.mission_group).chain(&self.groups);
        for name in candidates {
            if !name.is_empty() && !managed.contains(name) {
                managed.push(name.clone());
            }
        }
        managed
    }
}

/// Encode a record set into a padded grid.
///
/// # Errors
///
/// Returns `SyncError::Json` if a record cannot be serialized.
pub fn encode(set: &RecordSet) -> Result<Vec<Vec<String>>> {
    let mut groups_row = vec![GROUPS_LABEL.to_string(), set.mission_group.clone()];
    groups_row.extend(set.groups.iter().cloned());

    let mut contacts_row = Vec::with_capacity(set.records.len() + 1);
    contacts_row.push(CONTACTS_LABEL.to_string());
    for record in &set.records {
        contacts_row.push(serde_json::to_string(record)?);
    }

    let total_row = vec![TOTAL_LABEL.to_string(), set.records.len().to_string()];

    let mut grid = vec![groups_row, contacts_row, total_row];
    fill_out_range(&mut grid, "");
    Ok(grid)
}

/// Decode a grid written by [`encode`].
///
/// # Errors
///
/// Returns `SyncError::SheetFormat` when the groups or contacts row is
/// missing, a contact cell is not a record, or the total disagrees with
/// the number of records found.
pub fn decode(grid: &[Vec<String>]) -> Result<RecordSet> {
    let mut set = RecordSet::default();
    let mut saw_groups = false;
    let mut saw_contacts = false;
    let mut total: Option<(usize, usize)> = None;

    for (idx, row) in grid.iter().enumerate() {
        let row_number = idx + 1;
        let Some((label, cells)) = row.split_first() else {
            continue;
        };
        match label.as_str() {
            GROUPS_LABEL => {
                saw_groups = true;
                let mut cells = cells.iter();
                set.mission_group = cells.next().cloned().unwrap_or_default();
                set.groups
                    .extend(cells.filter(|cell| !cell.is_empty()).cloned());
            }
            CONTACTS_LABEL => {
                saw_contacts = true;
                for (col, cell) in cells.iter().enumerate() {
                    if cell.is_empty() {
                        continue;
                    }
                    let record: ContactRecord =
                        serde_json::from_str(cell).map_err(|err| SyncError::SheetFormat {
                            row: row_number,
                            reason: format!("contact in column {}: {err}", col + 2),
                        })?;
                    set.records.push(record);
                }
            }
            TOTAL_LABEL => {
                let raw = cells.first().map_or("", |cell| cell.trim());
                let count = raw.parse().map_err(|_| SyncError::SheetFormat {
                    row: row_number,
                    reason: format!("total '{raw}' is not a count"),
                })?;
                total = Some((row_number, count));
            }
            "" => {}
            other => debug!(row = row_number, label = other, "Ignoring unknown sheet row"),
        }
    }

    if !saw_groups {
        return Err(SyncError::SheetFormat {
            row: 1,
            reason: format!("no '{GROUPS_LABEL}' row"),
        });
    }
    if !saw_contacts {
        return Err(SyncError::SheetFormat {
            row: 2,
            reason: format!("no '{CONTACTS_LABEL}' row"),
        });
    }
    if let Some((row, count)) = total {
        if count != set.records.len() {
            return Err(SyncError::SheetFormat {
                row,
                reason: format!(
                    "total says {count} contacts but {} were found",
                    set.records.len()
                ),
            });
        }
    }

    Ok(set)
}

/// Pad every row with `fill` to the length of the longest row.
pub fn fill_out_range(grid: &mut [Vec<String>], fill: &str) {
    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    for row in grid.iter_mut() {
        row.resize(width, fill.to_string());
    }
}
