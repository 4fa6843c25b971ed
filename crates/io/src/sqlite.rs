// SQLite storage: every spreadsheet in one `cellsync.db`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use cellsync_engine::{CellEdit, CellSnapshot};

use crate::{validate_name, Storage, StorageError, StoredSpreadsheet};

pub const DB_FILE_NAME: &str = "cellsync.db";

const FORMAT_VERSION: &str = "1";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS spreadsheets (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS cells (
    sheet_id INTEGER NOT NULL REFERENCES spreadsheets(id),
    name TEXT NOT NULL,
    content TEXT NOT NULL,
    PRIMARY KEY (sheet_id, name)
);

CREATE TABLE IF NOT EXISTS cell_history (
    sheet_id INTEGER NOT NULL REFERENCES spreadsheets(id),
    cell_name TEXT NOT NULL,
    position INTEGER NOT NULL,    -- 0 = most recent
    content TEXT NOT NULL,
    PRIMARY KEY (sheet_id, cell_name, position)
);

CREATE TABLE IF NOT EXISTS edits (
    sheet_id INTEGER NOT NULL REFERENCES spreadsheets(id),
    position INTEGER NOT NULL,    -- 0 = most recent
    cell_name TEXT NOT NULL,
    prior_content TEXT NOT NULL,
    PRIMARY KEY (sheet_id, position)
);
"#;

/// Opens a short-lived connection per call; SQLite's own locking
/// serialises concurrent saves.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    path: PathBuf,
}

impl SqliteStorage {
    /// Use `<dir>/cellsync.db`, creating the directory and schema if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let storage = Self {
            path: dir.join(DB_FILE_NAME),
        };

        let conn = storage.connect()?;
        conn.execute_batch(SCHEMA)?;
        let version: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = 'format_version'", [], |row| row.get(0))
            .optional()?;
        match version.as_deref() {
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('format_version', ?1)",
                    params![FORMAT_VERSION],
                )?;
            }
            Some(FORMAT_VERSION) => {}
            Some(other) => {
                log::warn!(
                    "{} has format version {}, expected {}",
                    storage.path.display(),
                    other,
                    FORMAT_VERSION
                );
            }
        }
        Ok(storage)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, StorageError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }
}

impl Storage for SqliteStorage {
    fn list(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT name FROM spreadsheets ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn load(&self, name: &str) -> Result<StoredSpreadsheet, StorageError> {
        validate_name(name)?;
        let conn = self.connect()?;

        let sheet_id: Option<i64> = conn
            .query_row("SELECT id FROM spreadsheets WHERE name = ?1", params![name], |row| row.get(0))
            .optional()?;
        let Some(sheet_id) = sheet_id else {
            return Ok(StoredSpreadsheet::default());
        };

        let mut history: BTreeMap<String, Vec<String>> = BTreeMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT cell_name, content FROM cell_history WHERE sheet_id = ?1 ORDER BY cell_name, position",
            )?;
            let rows = stmt.query_map(params![sheet_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (cell, content) = row?;
                history.entry(cell).or_default().push(content);
            }
        }

        let cells = {
            let mut stmt =
                conn.prepare("SELECT name, content FROM cells WHERE sheet_id = ?1 ORDER BY name")?;
            let rows = stmt.query_map(params![sheet_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut cells = Vec::new();
            for row in rows {
                let (name, content) = row?;
                let history = history.remove(&name).unwrap_or_default();
                cells.push(CellSnapshot {
                    name,
                    content,
                    history,
                });
            }
            cells
        };

        let edits = {
            let mut stmt = conn.prepare(
                "SELECT cell_name, prior_content FROM edits WHERE sheet_id = ?1 ORDER BY position",
            )?;
            let rows = stmt.query_map(params![sheet_id], |row| {
                Ok(CellEdit::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        Ok(StoredSpreadsheet { cells, edits })
    }

    fn save(&self, name: &str, sheet: &StoredSpreadsheet) -> Result<(), StorageError> {
        validate_name(name)?;
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        tx.execute("INSERT OR IGNORE INTO spreadsheets (name) VALUES (?1)", params![name])?;
        let sheet_id: i64 =
            tx.query_row("SELECT id FROM spreadsheets WHERE name = ?1", params![name], |row| row.get(0))?;

        tx.execute("DELETE FROM cells WHERE sheet_id = ?1", params![sheet_id])?;
        tx.execute("DELETE FROM cell_history WHERE sheet_id = ?1", params![sheet_id])?;
        tx.execute("DELETE FROM edits WHERE sheet_id = ?1", params![sheet_id])?;

        {
            let mut insert_cell =
                tx.prepare("INSERT INTO cells (sheet_id, name, content) VALUES (?1, ?2, ?3)")?;
            let mut insert_history = tx.prepare(
                "INSERT INTO cell_history (sheet_id, cell_name, position, content) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for cell in &sheet.cells {
                insert_cell.execute(params![sheet_id, cell.name, cell.content])?;
                for (position, prior) in cell.history.iter().enumerate() {
                    insert_history.execute(params![sheet_id, cell.name, position as i64, prior])?;
                }
            }

            let mut insert_edit = tx.prepare(
                "INSERT INTO edits (sheet_id, position, cell_name, prior_content) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, edit) in sheet.edits.iter().enumerate() {
                insert_edit.execute(params![sheet_id, position as i64, edit.cell_name, edit.prior_content])?;
            }
        }

        tx.commit()?;
        log::debug!(
            "Saved {} ({} cells, {} edits) to {}",
            name,
            sheet.cells.len(),
            sheet.edits.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StoredSpreadsheet {
        StoredSpreadsheet {
            cells: vec![
                CellSnapshot {
                    name: "A1".into(),
                    content: "=B1*2".into(),
                    history: vec!["7".into(), String::new()],
                },
                CellSnapshot {
                    name: "B1".into(),
                    content: String::new(),
                    history: vec!["x\ny".into()],
                },
            ],
            edits: vec![
                CellEdit::new("B1", "x\ny"),
                CellEdit::new("A1", "7"),
                CellEdit::new("A1", ""),
            ],
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::open(dir.path()).unwrap();

        assert!(storage.list().unwrap().is_empty());
        assert!(storage.load("budget").unwrap().is_empty());

        storage.save("budget", &sample()).unwrap();
        assert_eq!(storage.load("budget").unwrap(), sample());
        assert_eq!(storage.list().unwrap(), vec!["budget"]);
    }

    #[test]
    fn test_save_replaces_rows() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::open(dir.path()).unwrap();
        storage.save("budget", &sample()).unwrap();

        let smaller = StoredSpreadsheet {
            cells: vec![CellSnapshot { name: "C3".into(), content: "1".into(), history: vec![] }],
            edits: vec![],
        };
        storage.save("budget", &smaller).unwrap();
        assert_eq!(storage.load("budget").unwrap(), smaller);
    }

    #[test]
    fn test_sheets_are_isolated_and_reopenable() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = SqliteStorage::open(dir.path()).unwrap();
            storage.save("one", &sample()).unwrap();
            storage.save("two", &StoredSpreadsheet::default()).unwrap();
        }

        let storage = SqliteStorage::open(dir.path()).unwrap();
        assert_eq!(storage.list().unwrap(), vec!["one", "two"]);
        assert_eq!(storage.load("one").unwrap(), sample());
        assert!(storage.load("two").unwrap().is_empty());
        assert!(storage.path().ends_with(DB_FILE_NAME));
    }

    #[test]
    fn test_invalid_name() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SqliteStorage::open(dir.path()).unwrap();
        assert!(matches!(storage.load("a/b"), Err(StorageError::InvalidName(_))));
    }
}
