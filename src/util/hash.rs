//! Content hashing for etags and staged-sheet fingerprints.
//!
//! Uses SHA256; grids are hashed cell by cell with null separators so
//! `["ab", "c"]` and `["a", "bc"]` never collide.

use sha2::{Digest, Sha256};

/// Full hex SHA256 of a string.
#[must_use]
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// First 16 hex chars of [`content_hash`]; used as a record etag.
#[must_use]
pub fn short_hash(text: &str) -> String {
    let mut hash = content_hash(text);
    hash.truncate(16);
    hash
}

/// Fingerprint of a rectangular grid, padding included.
#[must_use]
pub fn grid_hash(grid: &[Vec<String>]) -> String {
    let mut hasher = Sha256::new();
    for row in grid {
        for cell in row {
            if cell.contains('\0') {
                hasher.update(cell.replace('\0', " ").as_bytes());
            } else {
                hasher.update(cell.as_bytes());
            }
            hasher.update(b"\x00");
        }
        hasher.update(b"\x1e");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_hash_is_prefix() {
        let full = content_hash("hello");
        assert_eq!(full.len(), 64);
        assert_eq!(short_hash("hello"), full[..16]);
    }

    #[test]
    fn test_grid_hash_separates_cells_and_rows() {
        let a = vec![vec!["ab".to_string(), "c".to_string()]];
        let b = vec![vec!["a".to_string(), "bc".to_string()]];
        assert_ne!(grid_hash(&a), grid_hash(&b));

        let one_row = vec![vec!["a".to_string(), "b".to_string()]];
        let two_rows = vec![vec!["a".to_string()], vec!["b".to_string()]];
        assert_ne!(grid_hash(&one_row), grid_hash(&two_rows));
    }

    #[test]
    fn test_grid_hash_is_stable() {
        let grid = vec![vec!["Groups".to_string(), "ICE".to_string()]];
        assert_eq!(grid_hash(&grid), grid_hash(&grid.clone()));
    }
}
