use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("search index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("tensor computation error: {0}")]
    Tensor(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot read {path} as text: {reason}")]
    Content { path: String, reason: String },

    #[error("embedding has dimension {actual}, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index out of sync: {0}")]
    Desync(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl From<candle_core::Error> for Error {
    fn from(e: candle_core::Error) -> Self {
        Error::Tensor(e.to_string())
    }
}
