use clap::Parser;
use contact_sync::cli::commands;
use contact_sync::cli::{Cli, Commands};
use contact_sync::config::CliOverrides;
use contact_sync::logging::init_logging;
use contact_sync::{StructuredError, SyncError};
use std::io::{self, IsTerminal};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(cli.verbose, cli.quiet, None) {
        eprintln!("Logging disabled: {err}");
    }

    let overrides = CliOverrides {
        workspace: cli.workspace.clone(),
        account: cli.account.clone(),
        principal: cli.principal.clone(),
        lock_timeout: cli.lock_timeout,
    };

    let outcome = match &cli.command {
        Commands::Export(args) => commands::export::execute(args, cli.json, &overrides),
        Commands::Import(args) => commands::import::execute(args, cli.json, &overrides),
        Commands::Status => commands::status::execute(cli.json, &overrides),
        Commands::Load(args) => commands::load::execute(args, cli.json, &overrides),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err, cli.json),
    }
}

/// Print `err` to stderr and pick the exit status for its category.
///
/// JSON is used under `--json` and whenever stdout is piped, so schedulers
/// always get something they can parse.
fn report(err: &SyncError, json: bool) -> ExitCode {
    let structured = StructuredError::from_error(err);
    if json || !io::stdout().is_terminal() {
        let payload = structured.to_json();
        let text = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
        eprintln!("{text}");
    } else {
        eprintln!("{}", structured.to_human(io::stderr().is_terminal()));
    }
    let status = u8::try_from(structured.code.exit_code()).unwrap_or(1);
    ExitCode::from(status)
}
