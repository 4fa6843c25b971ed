//! Global edit log backing spreadsheet-wide undo.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// One undoable change: the content `cell_name` had before the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellEdit {
    pub cell_name: String,
    pub prior_content: String,
}

impl CellEdit {
    pub fn new(cell_name: impl Into<String>, prior_content: impl Into<String>) -> Self {
        Self {
            cell_name: cell_name.into(),
            prior_content: prior_content.into(),
        }
    }
}

/// Retention limits for cell history and the edit log.
///
/// `None` means unbounded. When a limit is hit the oldest entries go first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryPolicy {
    pub max_cell_history: Option<usize>,
    pub max_edits: Option<usize>,
}

impl HistoryPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }
}

/// Ordered log of edits, most recent at the front.
#[derive(Debug, Clone, Default)]
pub struct EditLog {
    entries: VecDeque<CellEdit>,
    max_len: Option<usize>,
}

impl EditLog {
    pub fn new(max_len: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            max_len,
        }
    }

    /// Rebuild from persisted entries (most recent first), applying the cap.
    pub fn from_entries(entries: impl IntoIterator<Item = CellEdit>, max_len: Option<usize>) -> Self {
        let mut entries: VecDeque<CellEdit> = entries.into_iter().collect();
        if let Some(max) = max_len {
            entries.truncate(max);
        }
        Self { entries, max_len }
    }

    pub fn push(&mut self, edit: CellEdit) {
        self.entries.push_front(edit);
        if let Some(max) = self.max_len {
            self.entries.truncate(max);
        }
    }

    pub fn peek(&self) -> Option<&CellEdit> {
        self.entries.front()
    }

    pub fn pop(&mut self) -> Option<CellEdit> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, most recent first.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &CellEdit> + '_ {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifo_order() {
        let mut log = EditLog::new(None);
        log.push(CellEdit::new("A1", ""));
        log.push(CellEdit::new("B1", "2"));
        assert_eq!(log.peek().unwrap().cell_name, "B1");
        assert_eq!(log.pop().unwrap().cell_name, "B1");
        assert_eq!(log.pop().unwrap().cell_name, "A1");
        assert!(log.pop().is_none());
    }

    #[test]
    fn test_cap_drops_oldest() {
        let mut log = EditLog::new(Some(2));
        for name in ["A1", "A2", "A3"] {
            log.push(CellEdit::new(name, ""));
        }
        let names: Vec<_> = log.iter().map(|e| e.cell_name.as_str()).collect();
        assert_eq!(names, vec!["A3", "A2"]);
    }

    #[test]
    fn test_from_entries_applies_cap() {
        let entries = vec![CellEdit::new("A3", ""), CellEdit::new("A2", ""), CellEdit::new("A1", "")];
        let log = EditLog::from_entries(entries, Some(1));
        assert_eq!(log.len(), 1);
        assert_eq!(log.peek().unwrap().cell_name, "A3");
    }

    #[test]
    fn test_policy_serde_defaults() {
        let policy: HistoryPolicy = serde_json::from_str("{\"max_edits\": 10}").unwrap();
        assert_eq!(policy.max_edits, Some(10));
        assert_eq!(policy.max_cell_history, None);
    }
}
