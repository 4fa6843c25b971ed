use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use cellsync_engine::HistoryPolicy;

use crate::ConfigError;

pub const DEFAULT_PORT: u16 = 1100;

/// Where spreadsheets are kept between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One `.sprd` text file per spreadsheet
    #[default]
    Text,
    /// All spreadsheets in one SQLite database
    Sqlite,
    /// Nothing survives a restart
    Memory,
}

impl StorageBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::Invalid(format!(
                "unknown storage backend {other:?} (expected text, sqlite or memory)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            dir: ServerConfig::default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_connections: usize,
    /// Longest accepted request line, in bytes
    pub max_message_size: usize,
    /// Consecutive malformed lines before the client is dropped
    pub max_parse_failures: u32,
    /// Messages buffered per client before new ones are dropped
    pub outbound_queue_depth: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 64,
            max_message_size: 64 * 1024,
            max_parse_failures: 3,
            outbound_queue_depth: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub log_level: String,
    pub storage: StorageConfig,
    /// Absent caps mean unbounded
    pub history: HistoryPolicy,
    pub limits: LimitsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            log_level: "info".to_string(),
            storage: StorageConfig::default(),
            history: HistoryPolicy::unbounded(),
            limits: LimitsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// `<config_dir>/cellsync/server.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cellsync")
            .join("server.toml")
    }

    /// `<data_dir>/cellsync/spreadsheets`
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cellsync")
            .join("spreadsheets")
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind.trim().is_empty() {
            return Err(ConfigError::Invalid("bind address is empty".into()));
        }

        let limits = [
            ("limits.max_connections", self.limits.max_connections),
            ("limits.max_message_size", self.limits.max_message_size),
            ("limits.max_parse_failures", self.limits.max_parse_failures as usize),
            ("limits.outbound_queue_depth", self.limits.outbound_queue_depth),
        ];
        for (key, value) in limits {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{key} must be at least 1")));
            }
        }

        if self.history.max_cell_history == Some(0) {
            return Err(ConfigError::Invalid(
                "history.max_cell_history must be at least 1 (omit it for unbounded)".into(),
            ));
        }
        if self.history.max_edits == Some(0) {
            return Err(ConfigError::Invalid(
                "history.max_edits must be at least 1 (omit it for unbounded)".into(),
            ));
        }

        Ok(())
    }

    /// `bind:port`, ready for `TcpListener::bind`.
    pub fn listen_addr(&self) -> String {
        if self.bind.contains(':') && !self.bind.starts_with('[') {
            format!("[{}]:{}", self.bind, self.port)
        } else {
            format!("{}:{}", self.bind, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 1100);
        assert_eq!(config.storage.backend, StorageBackend::Text);
        assert_eq!(config.history, HistoryPolicy::unbounded());
        assert!(config.validate().is_ok());
        assert!(ServerConfig::default_path().ends_with("cellsync/server.toml"));
    }

    #[test]
    fn test_full_file() {
        let config = ServerConfig::from_toml(
            r#"
bind = "127.0.0.1"
port = 2200
log_level = "debug"

[storage]
backend = "sqlite"
dir = "/tmp/sheets"

[history]
max_cell_history = 64
max_edits = 1024

[limits]
max_connections = 8
max_message_size = 4096
max_parse_failures = 5
outbound_queue_depth = 16
"#,
        )
        .unwrap();

        assert_eq!(config.listen_addr(), "127.0.0.1:2200");
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.storage.dir, PathBuf::from("/tmp/sheets"));
        assert_eq!(config.history.max_cell_history, Some(64));
        assert_eq!(config.history.max_edits, Some(1024));
        assert_eq!(config.limits.max_parse_failures, 5);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = ServerConfig::from_toml("port = 9000\n[limits]\nmax_connections = 2\n").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.limits.max_connections, 2);
        assert_eq!(config.limits.outbound_queue_depth, 256);
        assert_eq!(config.history.max_edits, None);
    }

    #[test]
    fn test_validation_errors() {
        let err = ServerConfig::from_toml("[limits]\nmax_message_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("limits.max_message_size"), "{err}");

        let err = ServerConfig::from_toml("[history]\nmax_edits = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ServerConfig::from_toml("bind = \"  \"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ServerConfig::from_toml("[storage]\nbackend = \"redis\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_missing_and_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        assert_eq!(ServerConfig::load(&path).unwrap(), ServerConfig::default());

        fs::write(&path, "port = 1234\n").unwrap();
        assert_eq!(ServerConfig::load(&path).unwrap().port, 1234);

        fs::write(&path, "port = \"nope\"\n").unwrap();
        assert!(matches!(ServerConfig::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("SQLite".parse::<StorageBackend>().unwrap(), StorageBackend::Sqlite);
        assert!("csv".parse::<StorageBackend>().is_err());
        assert_eq!(StorageBackend::Memory.to_string(), "memory");
    }

    #[test]
    fn test_ipv6_listen_addr() {
        let config = ServerConfig {
            bind: "::1".into(),
            ..ServerConfig::default()
        };
        assert_eq!(config.listen_addr(), "[::1]:1100");
    }
}
