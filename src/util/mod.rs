//! Shared utilities for `contact_sync`.
//!
//! - Content hashing (SHA256) for etags and sheet fingerprints
//! - The [`Clock`] abstraction behind every wait
//! - Progress indicators for rate-limited phases
//! - Workspace path helpers

pub mod clock;
mod hash;
pub mod progress;

pub use clock::{Clock, ManualClock, SystemClock};
pub use hash::{content_hash, grid_hash, short_hash};

use std::path::{Path, PathBuf};

/// Name of the per-workspace directory holding config, databases and locks.
pub const WORKSPACE_DIR: &str = ".contact-sync";

/// Walk up from `start` looking for a `.contact-sync` directory.
#[must_use]
pub fn find_workspace_dir(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(WORKSPACE_DIR))
        .find(|candidate| candidate.is_dir())
}

/// Split a comma-separated list, trimming blanks away.
#[must_use]
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_find_workspace_dir_walks_up() {
        let temp = TempDir::new().expect("temp dir");
        let root = temp.path().join(WORKSPACE_DIR);
        fs::create_dir(&root).expect("create workspace");
        let nested = temp.path().join("a").join("b");
        fs::create_dir_all(&nested).expect("create nested");

        assert_eq!(find_workspace_dir(&nested), Some(root));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" ICE, Static ,,Roster "), ["ICE", "Static", "Roster"]);
        assert!(split_list("").is_empty());
    }
}
