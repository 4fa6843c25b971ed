//! Cellsync Spreadsheet Protocol
//!
//! Canonical wire types for client ↔ server communication. The transport is
//! newline-delimited text over TCP: a short plain-text handshake followed by
//! one JSON object per line in each direction.
//!
//! # Handshake
//!
//! 1. Client sends its username on one line.
//! 2. Server sends every known spreadsheet name, one per line, followed by an
//!    empty line ([`spreadsheet_list`]).
//! 3. Client sends the name of the spreadsheet to open. Unknown names create
//!    a new spreadsheet.
//! 4. Server sends one [`ServerMessage::CellUpdated`] per populated cell,
//!    then the client's numeric id on its own line ([`client_id_line`]).
//!
//! After the handshake the client sends [`ClientRequest`] lines and receives
//! [`ServerMessage`] lines.
//!
//! # Wire stability
//!
//! Field names and tag values are fixed by existing clients. Golden vectors
//! in `tests/golden/` pin the format; if they fail, fix the types.
//!
//! # Usage
//!
//! ```ignore
//! use cellsync_protocol::{decode_request, encode_message, ServerMessage};
//!
//! let request = decode_request(r#"{"requestType":"selectCell","cellName":"A1"}"#)?;
//! let line = encode_message(&ServerMessage::server_error("Server closing"))?;
//! ```

use serde::{Deserialize, Serialize};

use cellsync_engine::{CellUpdate, ClientId, ErrorKind, Outcome, Request};

/// Message text sent to every client when the server stops.
pub const SHUTDOWN_MESSAGE: &str = "Server closing";

// =============================================================================
// Client → Server Messages
// =============================================================================

/// Requests a client may send once the handshake is complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "requestType", rename_all = "camelCase")]
pub enum ClientRequest {
    SelectCell {
        #[serde(rename = "cellName")]
        cell_name: String,
    },
    EditCell {
        #[serde(rename = "cellName")]
        cell_name: String,
        #[serde(default)]
        contents: String,
    },
    RevertCell {
        #[serde(rename = "cellName")]
        cell_name: String,
    },
    Undo,
}

impl ClientRequest {
    /// Attach the sending client's id, producing an engine request.
    pub fn into_request(self, client: ClientId) -> Request {
        match self {
            Self::SelectCell { cell_name } => Request::select(client, cell_name),
            Self::EditCell {
                cell_name,
                contents,
            } => Request::edit(client, cell_name, contents),
            Self::RevertCell { cell_name } => Request::revert(client, cell_name),
            Self::Undo => Request::undo(client),
        }
    }
}

// =============================================================================
// Server → Client Messages
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "messageType", rename_all = "camelCase")]
pub enum ServerMessage {
    /// A cell's content changed (also sent for every cell on join).
    CellUpdated {
        #[serde(rename = "cellName")]
        cell_name: String,
        contents: String,
    },
    /// A client selected a cell.
    CellSelected {
        #[serde(rename = "cellName")]
        cell_name: String,
        selector: ClientId,
        #[serde(rename = "selectorName")]
        selector_name: String,
    },
    /// A client left the spreadsheet.
    Disconnected { user: ClientId },
    /// The requester's last request was rejected. Sent only to the requester.
    RequestError {
        #[serde(rename = "cellName", default)]
        cell_name: String,
        message: String,
        #[serde(rename = "errorKind", default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<ErrorKind>,
    },
    /// The server is going away; the connection will be closed.
    ServerError { message: String },
}

impl ServerMessage {
    pub fn cell_updated(update: CellUpdate) -> Self {
        Self::CellUpdated {
            cell_name: update.cell_name,
            contents: update.content,
        }
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::ServerError {
            message: message.into(),
        }
    }

    /// Rejection for a request that never reached the engine (malformed line).
    pub fn malformed_request(detail: impl Into<String>) -> Self {
        Self::RequestError {
            cell_name: String::new(),
            message: detail.into(),
            error_kind: None,
        }
    }

    /// Translate an engine outcome for the requester.
    ///
    /// Returns `None` for successes; those are broadcast, not replied to.
    pub fn from_rejection(outcome: &Outcome) -> Option<Self> {
        if outcome.success {
            return None;
        }
        Some(Self::RequestError {
            cell_name: outcome.affected_cell.clone().unwrap_or_default(),
            message: outcome
                .message
                .clone()
                .unwrap_or_else(|| "Request rejected".to_string()),
            error_kind: outcome.error_kind,
        })
    }
}

// =============================================================================
// Line encoding
// =============================================================================

/// Decode one request line. Surrounding whitespace is ignored.
pub fn decode_request(line: &str) -> Result<ClientRequest, serde_json::Error> {
    serde_json::from_str(line.trim())
}

/// Encode a message as a single newline-terminated line.
pub fn encode_message(message: &ServerMessage) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Encode a request as a single newline-terminated line (client side).
pub fn encode_request(request: &ClientRequest) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    Ok(line)
}

// =============================================================================
// Handshake
// =============================================================================

/// Spreadsheet listing: one name per line, then an empty line.
pub fn spreadsheet_list<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for name in names {
        out.push_str(name.as_ref());
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Parse the listing sent in handshake step 2 (client side).
///
/// Stops at the first empty line.
pub fn parse_spreadsheet_list(text: &str) -> Vec<String> {
    text.lines()
        .take_while(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Final handshake line carrying the client's id.
pub fn client_id_line(client: ClientId) -> String {
    format!("{client}\n")
}

/// Clean up a handshake line (username or spreadsheet name).
///
/// Returns `None` when nothing remains after trimming.
pub fn handshake_field(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
