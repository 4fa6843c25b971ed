use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupt spreadsheet file at line {line}: {message}")]
    Corrupt { line: usize, message: String },

    #[error("Invalid spreadsheet name: {0:?}")]
    InvalidName(String),
}
