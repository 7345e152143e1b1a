//! CLI definitions and entry point.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// Export/import reconciler for address-book accounts (`SQLite` + cell grid)
#[derive(Parser, Debug)]
#[command(name = "csync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace directory (auto-discover .contact-sync if not set)
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Contact account database this run acts on
    #[arg(long, global = true)]
    pub account: Option<PathBuf>,

    /// Principal the run is performed as (defaults to $USER)
    #[arg(long, global = true)]
    pub principal: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Run lock wait in ms before skipping
    #[arg(long, global = true)]
    pub lock_timeout: Option<u64>,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Snapshot the source groups into the staging sheet
    Export(ExportArgs),

    /// Apply the staging sheet to the account
    Import(ImportArgs),

    /// Summarize the staging sheet
    Status,

    /// Add contacts from a JSON file to a group of the account
    Load(LoadArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct ExportArgs {
    /// Source groups in priority order (overrides config)
    #[arg(long, value_delimiter = ',')]
    pub groups: Vec<String>,

    /// Group every exported contact joins; pass "" to disable
    #[arg(long)]
    pub mission_group: Option<String>,

    /// Keep records that share a phone number
    #[arg(long)]
    pub no_dedupe: bool,
}

#[derive(Args, Debug, Default, Clone)]
pub struct ImportArgs {
    /// Hide progress bars even on a terminal
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// JSON file holding an array of contacts
    pub file: PathBuf,

    /// Group to add the contacts to (created if missing)
    #[arg(long)]
    pub group: String,
}
