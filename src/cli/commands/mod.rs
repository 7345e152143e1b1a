//! Command implementations.
//!
//! Every command starts from a [`CommandContext`]: the discovered
//! workspace, the merged configuration and the invoking principal.

pub mod export;
pub mod import;
pub mod load;
pub mod status;

use crate::config::{self, CliOverrides, ConfigLayer, WorkspacePaths};
use crate::error::Result;
use crate::lock::RunLock;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Resolved workspace and configuration for one invocation.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub paths: WorkspacePaths,
    pub layer: ConfigLayer,
    pub principal: String,
    pub lock_timeout: Duration,
}

impl CommandContext {
    /// Discover the workspace from the current directory and load config.
    ///
    /// # Errors
    ///
    /// Returns an error if config cannot be read or holds invalid values.
    pub fn load(cli: &CliOverrides) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Self::load_from(cli, &cwd)
    }

    /// # Errors
    ///
    /// Same as [`CommandContext::load`].
    pub fn load_from(cli: &CliOverrides, start: &Path) -> Result<Self> {
        let root = config::discover_workspace(cli.workspace.as_deref(), start);
        let layer = config::load_config(&root, cli)?;
        let paths = WorkspacePaths::resolve(&root, &layer);
        let principal = config::resolve_principal(&layer);
        let lock_timeout = config::lock_timeout_from_layer(&layer)?;
        debug!(workspace = %root.display(), principal = %principal, "Loaded command context");
        Ok(Self {
            paths,
            layer,
            principal,
            lock_timeout,
        })
    }

    /// Take the principal's run lock, or `None` when another run holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock directory cannot be prepared.
    pub fn run_lock(&self, command: &str) -> Result<Option<RunLock>> {
        self.paths.ensure_dirs()?;
        RunLock::acquire(
            &self.paths.lock_dir,
            &self.principal,
            command,
            self.lock_timeout,
        )
    }
}

#[derive(Serialize)]
struct SkippedOutput<'a> {
    skipped: bool,
    command: &'a str,
    principal: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    held_by: Option<String>,
}

/// Report a run skipped on lock contention. Not an error.
pub(crate) fn report_skipped(ctx: &CommandContext, command: &str, json: bool) -> Result<()> {
    let holder = RunLock::holder(&ctx.paths.lock_dir, &ctx.principal);
    let held_by = holder.map(|holder| format!("{} (pid {})", holder.command, holder.pid));
    warn!(
        command,
        principal = %ctx.principal,
        held_by = held_by.as_deref().unwrap_or("unknown"),
        "Another run holds the lock; skipping"
    );
    if json {
        let payload = serde_json::to_string(&SkippedOutput {
            skipped: true,
            command,
            principal: &ctx.principal,
            held_by,
        })?;
        println!("{payload}");
    }
    Ok(())
}
