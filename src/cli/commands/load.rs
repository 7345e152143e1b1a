//! Load command implementation.
//!
//! Bulk-adds contacts to a group of a local account, which is how a source
//! account gets populated before an export.

use super::CommandContext;
use crate::cli::LoadArgs;
use crate::config::CliOverrides;
use crate::error::{Result, ResultExt, SyncError};
use crate::model::ContactRecord;
use crate::store::{ContactStore, SqliteContactStore, limits};
use serde::Serialize;
use std::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct LoadOutput {
    group: String,
    group_id: String,
    loaded: usize,
    failed: usize,
}

/// Execute the load command.
///
/// # Errors
///
/// Returns an error if the file is not a JSON array of contacts or the
/// account cannot be written.
pub fn execute(args: &LoadArgs, json: bool, cli: &CliOverrides) -> Result<()> {
    let ctx = CommandContext::load(cli)?;
    let raw = fs::read_to_string(&args.file)
        .with_context(|| format!("Reading {}", args.file.display()))?;
    let records = parse_contacts(&raw)?;

    ctx.paths.ensure_dirs()?;
    let mut store = SqliteContactStore::open(&ctx.paths.account_db)?;
    let output = load_into(&mut store, &args.group, records)?;
    info!(group = %output.group, loaded = output.loaded, "Contacts loaded");

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "Loaded {} contact(s) into '{}' ({})",
            output.loaded, output.group, output.group_id
        );
        if output.failed > 0 {
            println!("{} contact(s) could not be created", output.failed);
        }
    }
    Ok(())
}

fn parse_contacts(raw: &str) -> Result<Vec<ContactRecord>> {
    let mut records: Vec<ContactRecord> = serde_json::from_str(raw)
        .map_err(|err| SyncError::validation("contacts file", err.to_string()))?;
    for record in &mut records {
        record.resource_name = None;
        record.etag = None;
        record.memberships.clear();
    }
    Ok(records)
}

fn load_into(
    store: &mut SqliteContactStore,
    group: &str,
    records: Vec<ContactRecord>,
) -> Result<LoadOutput> {
    let group_id = match store.group_by_name(group)? {
        Some(existing) => existing.resource_name,
        None => store.create_group(group)?.resource_name,
    };

    let mut ids = Vec::with_capacity(records.len());
    let mut failed = 0;
    for chunk in records.chunks(limits::CREATE) {
        for (record, result) in chunk.iter().zip(store.batch_create(chunk)?) {
            match result {
                Ok(created) => ids.extend(created.resource_name),
                Err(err) => {
                    warn!(contact = %record.display_name(), error = %err, "Contact not created");
                    failed += 1;
                }
            }
        }
    }
    for slice in ids.chunks(limits::MODIFY_MEMBERS) {
        store.modify_members(&group_id, slice)?;
    }

    Ok(LoadOutput {
        group: group.to_string(),
        group_id,
        loaded: ids.len(),
        failed,
    })
}
