// Configuration loading

mod error;
pub mod server;

pub use error::ConfigError;
pub use server::{LimitsConfig, ServerConfig, StorageBackend, StorageConfig};
