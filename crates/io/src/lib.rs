//! Spreadsheet persistence.
//!
//! A [`Storage`] holds named spreadsheets. The server owns exactly one
//! instance and hands it around by `Arc<dyn Storage>`; nothing here is
//! process-global.

mod error;
pub mod memory;
pub mod sqlite;
pub mod text;

pub use error::StorageError;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use text::TextStorage;

use cellsync_engine::SheetSnapshot;

/// What gets persisted for one spreadsheet: live cells plus the undo log.
pub type StoredSpreadsheet = SheetSnapshot;

pub trait Storage: Send + Sync {
    /// Names of all stored spreadsheets, sorted.
    fn list(&self) -> Result<Vec<String>, StorageError>;

    /// Load a spreadsheet. Unknown names yield an empty spreadsheet.
    fn load(&self, name: &str) -> Result<StoredSpreadsheet, StorageError>;

    /// Replace the stored copy of a spreadsheet.
    fn save(&self, name: &str, sheet: &StoredSpreadsheet) -> Result<(), StorageError>;
}

/// Reject names that could escape the storage location or break the
/// line-oriented handshake.
pub fn validate_name(name: &str) -> Result<(), StorageError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if bad {
        Err(StorageError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        for ok in ["budget", "Q3 numbers", "a.b", "données"] {
            assert!(validate_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", ".", "..", "a/b", "a\\b", "tab\there", "line\n"] {
            assert!(matches!(validate_name(bad), Err(StorageError::InvalidName(_))), "{bad:?}");
        }
    }
}
