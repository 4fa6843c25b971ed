use std::fmt;

use serde::{Deserialize, Serialize};

use crate::formula::FormulaError;
use crate::request::ClientId;

/// Stable, wire-facing classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Parse,
    DivisionByZero,
    UndefinedVariable,
    NotSelected,
    InvalidContent,
    InvalidCellName,
    CircularDependency,
    CellNotFound,
    NothingToRevert,
    NoEditsToUndo,
    /// Reserved for the persistence collaborator; never produced by the engine.
    Storage,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::DivisionByZero => "division_by_zero",
            Self::UndefinedVariable => "undefined_variable",
            Self::NotSelected => "not_selected",
            Self::InvalidContent => "invalid_content",
            Self::InvalidCellName => "invalid_cell_name",
            Self::CircularDependency => "circular_dependency",
            Self::CellNotFound => "cell_not_found",
            Self::NothingToRevert => "nothing_to_revert",
            Self::NoEditsToUndo => "no_edits_to_undo",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Rejection reasons for spreadsheet operations.
///
/// Every variant leaves the spreadsheet exactly as it was before the call.
#[derive(Debug, Clone, PartialEq)]
pub enum SheetError {
    /// The client has not selected the cell it tries to edit.
    NotSelected { client: ClientId, cell: String },
    /// New content is a formula that fails to parse.
    InvalidContent(FormulaError),
    /// Name does not match `[A-Z]+[0-9]+` after uppercasing.
    InvalidCellName(String),
    /// Committing the change would make the cell reachable from itself.
    CircularDependency { cell: String },
    CellNotFound(String),
    /// Revert requested on a cell with no prior content.
    NothingToRevert(String),
    NoEditsToUndo,
    /// Evaluation failure while computing a cell value.
    Formula(FormulaError),
}

impl SheetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotSelected { .. } => ErrorKind::NotSelected,
            Self::InvalidContent(_) => ErrorKind::InvalidContent,
            Self::InvalidCellName(_) => ErrorKind::InvalidCellName,
            Self::CircularDependency { .. } => ErrorKind::CircularDependency,
            Self::CellNotFound(_) => ErrorKind::CellNotFound,
            Self::NothingToRevert(_) => ErrorKind::NothingToRevert,
            Self::NoEditsToUndo => ErrorKind::NoEditsToUndo,
            Self::Formula(FormulaError::Parse(_)) => ErrorKind::Parse,
            Self::Formula(FormulaError::DivisionByZero) => ErrorKind::DivisionByZero,
            Self::Formula(FormulaError::UndefinedVariable(_)) => ErrorKind::UndefinedVariable,
        }
    }
}

impl fmt::Display for SheetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSelected { client, cell } => {
                write!(f, "client {client} has not selected {cell}")
            }
            Self::InvalidContent(err) => write!(f, "invalid content: {err}"),
            Self::InvalidCellName(name) => write!(f, "invalid cell name: {name:?}"),
            Self::CircularDependency { cell } => {
                write!(f, "change to {cell} would create a circular dependency")
            }
            Self::CellNotFound(name) => write!(f, "cell not found: {name}"),
            Self::NothingToRevert(name) => write!(f, "{name} has no prior content to revert to"),
            Self::NoEditsToUndo => write!(f, "no edits to undo"),
            Self::Formula(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SheetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidContent(err) | Self::Formula(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(SheetError::NoEditsToUndo.kind(), ErrorKind::NoEditsToUndo);
        assert_eq!(
            SheetError::Formula(FormulaError::DivisionByZero).kind(),
            ErrorKind::DivisionByZero
        );
        assert_eq!(
            SheetError::InvalidContent(FormulaError::Parse("x".into())).kind(),
            ErrorKind::InvalidContent
        );
    }

    #[test]
    fn test_kind_serializes_as_code() {
        for kind in [ErrorKind::CircularDependency, ErrorKind::NotSelected, ErrorKind::Storage] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.code()));
        }
    }

    #[test]
    fn test_display() {
        let err = SheetError::NotSelected { client: 3, cell: "B2".into() };
        assert_eq!(err.to_string(), "client 3 has not selected B2");
    }
}
