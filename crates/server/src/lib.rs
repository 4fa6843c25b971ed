//! Collaborative spreadsheet server.
//!
//! [`Controller`] owns the open spreadsheets and routes requests,
//! [`ClientRegistry`] delivers messages to connections, and [`Server`] runs
//! the TCP front end.

pub mod controller;
pub mod registry;
pub mod server;

use std::sync::Arc;

use cellsync_config::{StorageBackend, StorageConfig};
use cellsync_io::{MemoryStorage, SqliteStorage, Storage, StorageError, TextStorage};

pub use controller::{Controller, Joined};
pub use registry::{ClientRegistry, OutboundLine};
pub use server::{Server, ServerMetrics, ShutdownHandle};

/// Open the configured storage backend.
pub fn open_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>, StorageError> {
    let storage: Arc<dyn Storage> = match config.backend {
        StorageBackend::Text => Arc::new(TextStorage::open(config.dir.clone())?),
        StorageBackend::Sqlite => Arc::new(SqliteStorage::open(&config.dir)?),
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
    };
    match config.backend {
        StorageBackend::Memory => log::warn!("Using memory storage, spreadsheets will not survive a restart"),
        backend => log::info!("Using {} storage in {}", backend, config.dir.display()),
    }
    Ok(storage)
}
