//! Status command implementation.
//!
//! Summarizes what the staging sheet currently holds without touching any
//! contact account.

use super::CommandContext;
use crate::config::CliOverrides;
use crate::error::Result;
use crate::lock::RunLock;
use crate::model::TagKind;
use crate::sheet::{RecordSet, SheetStore, SqliteSheet, decode};
use crate::util::grid_hash;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
struct StatusOutput {
    sheet: String,
    workbook: String,
    updated_at: Option<DateTime<Utc>>,
    mission_group: String,
    groups: Vec<String>,
    contacts: usize,
    /// Contacts tagged with each group.
    group_counts: BTreeMap<String, usize>,
    photo_refs: usize,
    content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_run: Option<String>,
}

/// Execute the status command.
///
/// # Errors
///
/// Returns an error if the workbook cannot be opened, the sheet was never
/// written, or its contents do not decode.
pub fn execute(json: bool, cli: &CliOverrides) -> Result<()> {
    let ctx = CommandContext::load(cli)?;
    let sheet = SqliteSheet::open(&ctx.paths.workbook_db, &ctx.paths.sheet)?;
    let grid = sheet.read_range()?;
    let set = decode(&grid)?;

    let output = StatusOutput {
        sheet: ctx.paths.sheet.clone(),
        workbook: ctx.paths.workbook_db.display().to_string(),
        updated_at: sheet.updated_at()?,
        group_counts: group_counts(&set),
        photo_refs: set
            .records
            .iter()
            .filter(|record| record.photo_ref().is_some())
            .count(),
        contacts: set.records.len(),
        mission_group: set.mission_group,
        groups: set.groups,
        content_hash: grid_hash(&grid),
        last_run: RunLock::holder(&ctx.paths.lock_dir, &ctx.principal)
            .map(|holder| format!("{} at {}", holder.command, holder.started_at.to_rfc3339())),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_text_output(&output);
    }
    Ok(())
}

fn group_counts(set: &RecordSet) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for record in &set.records {
        for group in record.tags_of(&TagKind::Group) {
            *counts.entry(group.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

fn print_text_output(output: &StatusOutput) {
    println!("Sheet: {} ({})", output.sheet, output.workbook);
    if let Some(updated) = output.updated_at {
        println!("Updated: {}", updated.to_rfc3339());
    }
    if output.mission_group.is_empty() {
        println!("Mission group: (none)");
    } else {
        println!("Mission group: {}", output.mission_group);
    }
    println!("Contacts: {}", output.contacts);
    for group in &output.groups {
        let count = output.group_counts.get(group).copied().unwrap_or(0);
        println!("  {group}: {count}");
    }
    if output.photo_refs > 0 {
        println!("Photo references: {}", output.photo_refs);
    }
    println!("Content hash: {}", output.content_hash);
    if let Some(last_run) = &output.last_run {
        println!("Last run: {last_run}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContactRecord, SyncTag};

    #[test]
    fn counts_group_tags() {
        let tagged = |groups: &[&str]| ContactRecord {
            misc_keywords: groups.iter().map(|g| SyncTag::group(*g)).collect(),
            ..ContactRecord::default()
        };
        let set = RecordSet {
            mission_group: "M".to_string(),
            groups: vec!["ICE".to_string()],
            records: vec![tagged(&["M", "ICE"]), tagged(&["M"])],
        };
        let counts = group_counts(&set);
        assert_eq!(counts.get("M"), Some(&2));
        assert_eq!(counts.get("ICE"), Some(&1));
    }
}
