//! Decoded requests and their outcomes, as exchanged with the I/O layer.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, SheetError};

/// Identifier the connection layer assigns to each client.
pub type ClientId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestKind {
    SelectCell,
    EditCell,
    RevertCell,
    Undo,
}

/// An already-decoded client request.
///
/// `cell_name` is ignored by `Undo`; `content` is only read by `EditCell`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub kind: RequestKind,
    #[serde(default)]
    pub cell_name: String,
    #[serde(default)]
    pub content: String,
    pub client: ClientId,
}

impl Request {
    pub fn select(client: ClientId, cell_name: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::SelectCell,
            cell_name: cell_name.into(),
            content: String::new(),
            client,
        }
    }

    pub fn edit(client: ClientId, cell_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::EditCell,
            cell_name: cell_name.into(),
            content: content.into(),
            client,
        }
    }

    pub fn revert(client: ClientId, cell_name: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::RevertCell,
            cell_name: cell_name.into(),
            content: String::new(),
            client,
        }
    }

    pub fn undo(client: ClientId) -> Self {
        Self {
            kind: RequestKind::Undo,
            cell_name: String::new(),
            content: String::new(),
            client,
        }
    }
}

/// The cell touched by a successful edit, revert or undo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellUpdate {
    pub cell_name: String,
    /// Content after the change; empty when the cell was cleared.
    pub content: String,
}

/// Result handed back to the caller for broadcast or rejection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_cell: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Outcome {
    /// Success that changes no cell content (selection).
    pub fn selected(cell_name: String) -> Self {
        Self {
            success: true,
            affected_cell: Some(cell_name),
            ..Self::default()
        }
    }

    pub fn updated(update: CellUpdate) -> Self {
        Self {
            success: true,
            affected_cell: Some(update.cell_name),
            new_content: Some(update.content),
            ..Self::default()
        }
    }

    /// Failure; `cell_name` is the cell the request targeted, if any.
    pub fn rejected(cell_name: Option<String>, error: &SheetError) -> Self {
        Self {
            success: false,
            affected_cell: cell_name,
            new_content: None,
            error_kind: Some(error.kind()),
            message: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_carries_kind() {
        let outcome = Outcome::rejected(Some("A1".into()), &SheetError::NoEditsToUndo);
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::NoEditsToUndo));
        assert_eq!(outcome.message.as_deref(), Some("no edits to undo"));
    }

    #[test]
    fn test_outcome_json_skips_empty_fields() {
        let outcome = Outcome::updated(CellUpdate {
            cell_name: "A1".into(),
            content: "3".into(),
        });
        let json = serde_json::to_string(&outcome).unwrap();
        assert_eq!(json, r#"{"success":true,"affected_cell":"A1","new_content":"3"}"#);
    }

    #[test]
    fn test_request_kind_wire_names() {
        assert_eq!(serde_json::to_string(&RequestKind::EditCell).unwrap(), "\"editCell\"");
        assert_eq!(serde_json::to_string(&RequestKind::Undo).unwrap(), "\"undo\"");
    }
}
