use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A named, versioned content slot.
///
/// `content` is empty, a literal number, literal text, or a formula in
/// canonical `=` form. `history` holds prior contents, most recent first.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    name: String,
    content: String,
    history: VecDeque<String>,
}

impl Cell {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            history: VecDeque::new(),
        }
    }

    /// Rebuild a cell from persisted state. `history` is most recent first.
    pub fn with_history(
        name: impl Into<String>,
        content: impl Into<String>,
        history: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            history: history.into_iter().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Prior contents, most recent first.
    pub fn history(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.history.iter().map(String::as_str)
    }

    /// The content a [`revert`](Self::revert) would restore.
    pub fn previous(&self) -> Option<&str> {
        self.history.front().map(String::as_str)
    }

    /// Replace the content, pushing the old content onto the history.
    ///
    /// `max_history` caps the retained entries; the oldest are dropped.
    /// Returns the displaced content.
    pub fn set_content(&mut self, content: String, max_history: Option<usize>) -> String {
        let old = std::mem::replace(&mut self.content, content);
        self.history.push_front(old.clone());
        if let Some(max) = max_history {
            self.history.truncate(max);
        }
        old
    }

    /// Swap the content with the most recent history entry.
    ///
    /// Two reverts in a row restore the original content. Returns the
    /// content that was replaced, or `None` when there is no history.
    pub fn revert(&mut self) -> Option<String> {
        let previous = self.history.front_mut()?;
        std::mem::swap(&mut self.content, previous);
        Some(previous.clone())
    }

    /// A cell with empty content and nothing non-empty to revert to carries
    /// no information and can be dropped from the cell map.
    pub fn is_dead(&self) -> bool {
        self.content.is_empty() && self.history.iter().all(String::is_empty)
    }

    pub fn snapshot(&self) -> CellSnapshot {
        CellSnapshot {
            name: self.name.clone(),
            content: self.content.clone(),
            history: self.history.iter().cloned().collect(),
        }
    }
}

/// Computed value of a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Classify non-formula content. Only finite numbers count as numeric.
    pub fn from_literal(content: &str) -> Self {
        if content.is_empty() {
            return CellValue::Empty;
        }
        match content.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => CellValue::Number(n),
            _ => CellValue::Text(content.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Owned copy of a cell used for persistence and client resync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub name: String,
    pub content: String,
    /// Prior contents, most recent first.
    #[serde(default)]
    pub history: Vec<String>,
}

impl From<CellSnapshot> for Cell {
    fn from(snapshot: CellSnapshot) -> Self {
        Cell::with_history(snapshot.name, snapshot.content, snapshot.history)
    }
}
