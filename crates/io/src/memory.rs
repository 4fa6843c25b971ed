//! Volatile storage; contents vanish with the process.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::{validate_name, Storage, StorageError, StoredSpreadsheet};

#[derive(Debug, Default)]
pub struct MemoryStorage {
    sheets: Mutex<BTreeMap<String, StoredSpreadsheet>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn list(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.sheets.lock().keys().cloned().collect())
    }

    fn load(&self, name: &str) -> Result<StoredSpreadsheet, StorageError> {
        validate_name(name)?;
        Ok(self.sheets.lock().get(name).cloned().unwrap_or_default())
    }

    fn save(&self, name: &str, sheet: &StoredSpreadsheet) -> Result<(), StorageError> {
        validate_name(name)?;
        self.sheets.lock().insert(name.to_string(), sheet.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellsync_engine::{CellEdit, CellSnapshot};

    #[test]
    fn test_save_load_list() {
        let storage = MemoryStorage::new();
        assert!(storage.load("x").unwrap().is_empty());

        let sheet = StoredSpreadsheet {
            cells: vec![CellSnapshot { name: "A1".into(), content: "1".into(), history: vec![] }],
            edits: vec![CellEdit::new("A1", "")],
        };
        storage.save("x", &sheet).unwrap();
        storage.save("a", &StoredSpreadsheet::default()).unwrap();

        assert_eq!(storage.load("x").unwrap(), sheet);
        assert_eq!(storage.list().unwrap(), vec!["a", "x"]);
    }
}
