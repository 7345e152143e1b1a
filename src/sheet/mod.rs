//! Staging sheet storage.
//!
//! The staged record set lives in a named rectangular grid of string
//! cells. [`SqliteSheet`] keeps grids in a workbook database shared by
//! both accounts; [`MemorySheet`] is the in-process equivalent.

pub mod codec;

pub use codec::{RecordSet, decode, encode, fill_out_range};

use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A named cell grid.
pub trait SheetStore {
    /// Remove every cell, leaving an empty grid.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn clear(&mut self) -> Result<()>;

    /// Write `grid` starting at the top-left cell.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn write_range(&mut self, grid: &[Vec<String>]) -> Result<()>;

    /// Read the whole grid back.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::SheetNotFound` if the sheet was never written.
    fn read_range(&self) -> Result<Vec<Vec<String>>>;
}

const WORKBOOK_SQL: &str = r"
    CREATE TABLE IF NOT EXISTS sheets (
        name TEXT PRIMARY KEY,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS cells (
        sheet TEXT NOT NULL,
        row INTEGER NOT NULL,
        col INTEGER NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (sheet, row, col),
        FOREIGN KEY (sheet) REFERENCES sheets(name) ON DELETE CASCADE
    );
";

/// One sheet of a workbook database.
#[derive(Debug)]
pub struct SqliteSheet {
    conn: Connection,
    name: String,
    path: PathBuf,
}

impl SqliteSheet {
    /// Open the sheet `name` in the workbook at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the workbook cannot be opened or initialized.
    pub fn open(path: &Path, name: &str) -> Result<Self> {
        Self::open_with_timeout(path, name, None)
    }

    /// # Errors
    ///
    /// Returns an error if the workbook cannot be opened or initialized.
    pub fn open_with_timeout(
        path: &Path,
        name: &str,
        busy_timeout_ms: Option<u64>,
    ) -> Result<Self> {
        let conn = Connection::open(path)?;
        if let Some(timeout) = busy_timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        }
        conn.execute_batch(WORKBOOK_SQL)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn,
            name: name.to_string(),
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When the sheet was last cleared or written.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn updated_at(&self) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT updated_at FROM sheets WHERE name = ?1",
                [&self.name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw
            .and_then(|value| DateTime::parse_from_rfc3339(&value).ok())
            .map(|value| value.with_timezone(&Utc)))
    }

    fn touch(conn: &Connection, name: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO sheets (name, updated_at) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET updated_at = excluded.updated_at",
            params![name, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

impl SheetStore for SqliteSheet {
    fn clear(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM cells WHERE sheet = ?1", [&self.name])?;
        Self::touch(&tx, &self.name)?;
        tx.commit()?;
        Ok(())
    }

    fn write_range(&mut self, grid: &[Vec<String>]) -> Result<()> {
        let tx = self.conn.transaction()?;
        Self::touch(&tx, &self.name)?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO cells (sheet, row, col, value) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(sheet, row, col) DO UPDATE SET value = excluded.value",
            )?;
            for (row_idx, row) in grid.iter().enumerate() {
                for (col_idx, value) in row.iter().enumerate() {
                    stmt.execute(params![
                        self.name,
                        cell_index(row_idx),
                        cell_index(col_idx),
                        value
                    ])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn read_range(&self) -> Result<Vec<Vec<String>>> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sheets WHERE name = ?1)",
            [&self.name],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(SyncError::SheetNotFound {
                name: self.name.clone(),
                path: self.path.clone(),
            });
        }

        let mut stmt = self
            .conn
            .prepare("SELECT row, col, value FROM cells WHERE sheet = ?1 ORDER BY row, col")?;
        let cells = stmt
            .query_map([&self.name], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut grid: Vec<Vec<String>> = Vec::new();
        for (row, col, value) in cells {
            let (Ok(row), Ok(col)) = (usize::try_from(row), usize::try_from(col)) else {
                continue;
            };
            if grid.len() <= row {
                grid.resize_with(row + 1, Vec::new);
            }
            let cells = &mut grid[row];
            if cells.len() <= col {
                cells.resize(col + 1, String::new());
            }
            cells[col] = value;
        }
        fill_out_range(&mut grid, "");
        Ok(grid)
    }
}

fn cell_index(idx: usize) -> i64 {
    i64::try_from(idx).unwrap_or(i64::MAX)
}

/// A sheet held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySheet {
    grid: Option<Vec<Vec<String>>>,
}

impl MemorySheet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A sheet that already holds `grid`.
    #[must_use]
    pub fn with_grid(grid: Vec<Vec<String>>) -> Self {
        Self { grid: Some(grid) }
    }

    #[must_use]
    pub fn grid(&self) -> Option<&[Vec<String>]> {
        self.grid.as_deref()
    }
}

impl SheetStore for MemorySheet {
    fn clear(&mut self) -> Result<()> {
        self.grid = Some(Vec::new());
        Ok(())
    }

    fn write_range(&mut self, grid: &[Vec<String>]) -> Result<()> {
        let target = self.grid.get_or_insert_with(Vec::new);
        for (row_idx, row) in grid.iter().enumerate() {
            if target.len() <= row_idx {
                target.resize_with(row_idx + 1, Vec::new);
            }
            let cells = &mut target[row_idx];
            if cells.len() < row.len() {
                cells.resize(row.len(), String::new());
            }
            cells[..row.len()].clone_from_slice(row);
        }
        Ok(())
    }

    fn read_range(&self) -> Result<Vec<Vec<String>>> {
        let mut grid = self.grid.clone().ok_or_else(|| SyncError::SheetNotFound {
            name: "memory".to_string(),
            path: PathBuf::from(":memory:"),
        })?;
        fill_out_range(&mut grid, "");
        Ok(grid)
    }
}
