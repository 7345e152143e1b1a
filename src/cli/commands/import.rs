//! Import command implementation.

use super::{CommandContext, report_skipped};
use crate::cli::ImportArgs;
use crate::config::{self, CliOverrides};
use crate::error::Result;
use crate::import::{ImportReport, Importer};
use crate::photo::{FETCH_TIMEOUT, FilePhotoSource, HttpPhotoSource};
use crate::sheet::SqliteSheet;
use crate::store::SqliteContactStore;
use crate::util::SystemClock;
use crate::util::progress::should_show_progress;
use tracing::info;

/// Execute the import command.
///
/// # Errors
///
/// Returns an error if the principal is blocked, the sheet is missing or
/// malformed, or a store operation with no degrade path fails twice.
pub fn execute(args: &ImportArgs, json: bool, cli: &CliOverrides) -> Result<()> {
    let ctx = CommandContext::load(cli)?;
    let settings = config::import_settings_from_layer(&ctx.layer);
    let clock = SystemClock;
    let photos = HttpPhotoSource::new(
        FilePhotoSource::with_base_dir(&ctx.paths.photo_dir),
        FETCH_TIMEOUT,
    )?;

    // Refuse before taking the lock or touching either database.
    let importer = Importer::new(settings, &ctx.principal, &clock, &photos)?
        .with_progress(!args.no_progress && !json && should_show_progress());

    let Some(_lock) = ctx.run_lock("import")? else {
        return report_skipped(&ctx, "import", json);
    };

    info!(
        account = %ctx.paths.account_db.display(),
        sheet = %ctx.paths.sheet,
        "Importing contacts"
    );
    let sheet = SqliteSheet::open(&ctx.paths.workbook_db, &ctx.paths.sheet)?;
    let mut store = SqliteContactStore::open(&ctx.paths.account_db)?;
    let report = importer.import(&mut store, &sheet)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text_output(&report);
    }
    Ok(())
}

fn print_text_output(report: &ImportReport) {
    println!(
        "Imported {} record(s): {} matched, {} created, {} updated, {} deleted",
        report.incoming, report.matched, report.created, report.updated, report.deleted
    );
    if !report.groups_updated.is_empty() {
        println!("Groups updated: {}", report.groups_updated.join(", "));
    }
    if report.photos_updated > 0 || report.photos_failed > 0 {
        println!(
            "Photos: {} uploaded, {} failed, {} reference(s) removed",
            report.photos_updated, report.photos_failed, report.photo_refs_stripped
        );
    }
    if !report.malformed.is_empty() {
        println!("Skipped {} malformed record(s):", report.malformed.len());
        for record in &report.malformed {
            println!("  #{} {}: {}", record.position, record.label, record.reason);
        }
    }
    if !report.failures.is_empty() {
        println!("{} failure(s):", report.failures.len());
        for failure in &report.failures {
            println!("  [{}] {}: {}", failure.phase, failure.item, failure.error);
        }
    }
}
