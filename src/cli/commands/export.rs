//! Export command implementation.

use super::{CommandContext, report_skipped};
use crate::cli::ExportArgs;
use crate::config::{self, CliOverrides};
use crate::error::Result;
use crate::export::{ExportReport, ExportSettings, Exporter};
use crate::sheet::SqliteSheet;
use crate::store::SqliteContactStore;
use crate::util::SystemClock;
use tracing::info;

/// Execute the export command.
///
/// # Errors
///
/// Returns an error if config is invalid, the account or workbook cannot be
/// opened, or a store read fails for good.
pub fn execute(args: &ExportArgs, json: bool, cli: &CliOverrides) -> Result<()> {
    let ctx = CommandContext::load(cli)?;
    let settings = apply_args(config::export_settings_from_layer(&ctx.layer)?, args);

    let Some(_lock) = ctx.run_lock("export")? else {
        return report_skipped(&ctx, "export", json);
    };

    info!(
        account = %ctx.paths.account_db.display(),
        sheet = %ctx.paths.sheet,
        "Exporting contacts"
    );
    let store = SqliteContactStore::open(&ctx.paths.account_db)?;
    let mut sheet = SqliteSheet::open(&ctx.paths.workbook_db, &ctx.paths.sheet)?;
    let clock = SystemClock;
    let report = Exporter::new(settings, &clock).export(&store, &mut sheet)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text_output(&report, &ctx.paths.sheet);
    }
    Ok(())
}

fn apply_args(mut settings: ExportSettings, args: &ExportArgs) -> ExportSettings {
    if !args.groups.is_empty() {
        settings.source_groups.clone_from(&args.groups);
    }
    if let Some(mission) = &args.mission_group {
        settings.mission_group = mission.trim().to_string();
    }
    if args.no_dedupe {
        settings.dedupe_by_number = false;
    }
    settings
}

fn print_text_output(report: &ExportReport, sheet: &str) {
    println!(
        "Exported {} contact(s) to '{sheet}' from {}",
        report.exported,
        if report.groups.is_empty() {
            "no groups".to_string()
        } else {
            report.groups.join(", ")
        }
    );
    if !report.mission_group.is_empty() {
        println!("Mission group: {}", report.mission_group);
    }
    if report.duplicates_skipped > 0 {
        println!("Skipped {} duplicate(s)", report.duplicates_skipped);
    }
    if report.photo_refs > 0 {
        println!("Photo references: {}", report.photo_refs);
    }
    println!("Content hash: {}", report.content_hash);
}
