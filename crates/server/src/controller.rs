//! Multiplexes named spreadsheets across connected clients.
//!
//! Lock order: `Controller::inner`, then a sheet's `members`. The engine's
//! own lock is innermost and only ever held for one engine call.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use cellsync_engine::{CellSnapshot, CellUpdate, ClientId, HistoryPolicy, RequestKind, SpreadsheetState};
use cellsync_io::{validate_name, Storage, StorageError};
use cellsync_protocol::{ClientRequest, ServerMessage, SHUTDOWN_MESSAGE};

use crate::registry::ClientRegistry;

/// An open spreadsheet.
///
/// `members` doubles as the sheet's sequencer: every state change is applied
/// and queued for broadcast while it is held, so all clients see updates in
/// commit order.
struct OpenSheet {
    state: SpreadsheetState,
    members: Mutex<BTreeSet<ClientId>>,
}

struct ClientInfo {
    username: String,
    sheet: String,
}

#[derive(Default)]
struct ControllerInner {
    sheets: BTreeMap<String, Arc<OpenSheet>>,
    clients: FxHashMap<ClientId, ClientInfo>,
}

/// Result of joining a spreadsheet.
#[derive(Debug)]
pub struct Joined {
    /// Cells to send as the initial `cellUpdated` burst.
    pub cells: Vec<CellSnapshot>,
}

pub struct Controller {
    storage: Arc<dyn Storage>,
    registry: ClientRegistry,
    policy: HistoryPolicy,
    inner: Mutex<ControllerInner>,
}

impl Controller {
    pub fn new(storage: Arc<dyn Storage>, registry: ClientRegistry, policy: HistoryPolicy) -> Self {
        Self {
            storage,
            registry,
            policy,
            inner: Mutex::new(ControllerInner::default()),
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Stored and currently open spreadsheet names, sorted.
    pub fn spreadsheet_names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = match self.storage.list() {
            Ok(stored) => stored.into_iter().collect(),
            Err(e) => {
                log::error!("Failed to list stored spreadsheets: {}", e);
                BTreeSet::new()
            }
        };
        names.extend(self.inner.lock().sheets.keys().cloned());
        names.into_iter().collect()
    }

    pub fn open_spreadsheet_count(&self) -> usize {
        self.inner.lock().sheets.len()
    }

    /// Attach `client` to `sheet_name`, opening it from storage if needed.
    ///
    /// The returned snapshot is taken after the client joined the sheet's
    /// broadcast list, so every later change reaches the client and no
    /// earlier change is sent twice.
    pub fn connect(
        &self,
        client: ClientId,
        username: &str,
        sheet_name: &str,
    ) -> Result<Joined, StorageError> {
        validate_name(sheet_name)?;
        let mut inner = self.inner.lock();

        let sheet = match inner.sheets.get(sheet_name) {
            Some(sheet) => Arc::clone(sheet),
            None => {
                let stored = self.storage.load(sheet_name)?;
                log::info!(
                    "Opened spreadsheet {:?} ({} cells, {} edits)",
                    sheet_name,
                    stored.cells.len(),
                    stored.edits.len()
                );
                let sheet = Arc::new(OpenSheet {
                    state: SpreadsheetState::restore(stored, self.policy),
                    members: Mutex::new(BTreeSet::new()),
                });
                inner.sheets.insert(sheet_name.to_string(), Arc::clone(&sheet));
                sheet
            }
        };

        inner.clients.insert(
            client,
            ClientInfo {
                username: username.to_string(),
                sheet: sheet_name.to_string(),
            },
        );

        let mut members = sheet.members.lock();
        members.insert(client);
        let cells = sheet.state.populated_cells();
        log::info!(
            "Client {} ({}) joined {:?}, {} connected",
            client,
            username,
            sheet_name,
            members.len()
        );
        Ok(Joined { cells })
    }

    /// Apply a client's request and route the result.
    ///
    /// Selections and content changes are broadcast to everyone on the sheet,
    /// rejections go back to the requester only.
    pub fn handle(&self, client: ClientId, request: ClientRequest) {
        let Some((sheet, username)) = self.lookup(client) else {
            log::warn!("Request from client {} which is not attached to a sheet", client);
            return;
        };

        let request = request.into_request(client);
        let members = sheet.members.lock();
        let outcome = sheet.state.apply(&request);

        if let Some(rejection) = ServerMessage::from_rejection(&outcome) {
            self.registry.send_to(client, &rejection);
            return;
        }

        let cell_name = outcome.affected_cell.unwrap_or_default();
        let message = match request.kind {
            RequestKind::SelectCell => ServerMessage::CellSelected {
                cell_name,
                selector: client,
                selector_name: username,
            },
            RequestKind::EditCell | RequestKind::RevertCell | RequestKind::Undo => {
                ServerMessage::cell_updated(CellUpdate {
                    cell_name,
                    content: outcome.new_content.unwrap_or_default(),
                })
            }
        };
        self.registry.broadcast(members.iter(), &message);
    }

    /// Detach a client. The last client out saves and closes the sheet.
    pub fn disconnect(&self, client: ClientId) {
        let mut inner = self.inner.lock();
        let Some(info) = inner.clients.remove(&client) else {
            return;
        };
        let Some(sheet) = inner.sheets.get(&info.sheet).cloned() else {
            return;
        };

        let remaining = {
            let mut members = sheet.members.lock();
            members.remove(&client);
            sheet.state.deselect(client);
            self.registry
                .broadcast(members.iter(), &ServerMessage::Disconnected { user: client });
            members.len()
        };
        log::info!(
            "Client {} ({}) left {:?}, {} remaining",
            client,
            info.username,
            info.sheet,
            remaining
        );

        if remaining == 0 {
            inner.sheets.remove(&info.sheet);
            // Still under the controller lock so a concurrent join cannot
            // load the stale stored copy.
            self.save(&info.sheet, &sheet.state);
        }
    }

    /// Save every open sheet and tell every client the server is going away.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        for (name, sheet) in &inner.sheets {
            self.save(name, &sheet.state);
        }
        self.registry
            .broadcast_all(&ServerMessage::server_error(SHUTDOWN_MESSAGE));
        self.registry.unregister_all();
        inner.sheets.clear();
        inner.clients.clear();
        log::info!("Controller shut down");
    }

    fn lookup(&self, client: ClientId) -> Option<(Arc<OpenSheet>, String)> {
        let inner = self.inner.lock();
        let info = inner.clients.get(&client)?;
        let sheet = inner.sheets.get(&info.sheet)?;
        Some((Arc::clone(sheet), info.username.clone()))
    }

    fn save(&self, name: &str, state: &SpreadsheetState) {
        let snapshot = state.snapshot();
        match self.storage.save(name, &snapshot) {
            Ok(()) => log::info!("Saved spreadsheet {:?} ({} cells)", name, snapshot.cells.len()),
            Err(e) => log::error!("Failed to save spreadsheet {:?}: {}", name, e),
        }
    }
}
