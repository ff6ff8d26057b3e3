use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while chunking, embedding, storing or
/// searching.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot open index store: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("index store: {0}")]
    Redb(#[from] redb::Error),

    #[error("index store storage: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("index store transaction: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("index store table: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("index store commit: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("embedding inference: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot decode {} (tried {encoding})", path.display())]
    Decode { path: PathBuf, encoding: String },

    #[error("embedding model: {0}")]
    Model(String),

    #[error("embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index is corrupt: {0}")]
    CorruptIndex(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("cannot create data directory {}", .0.display())]
    DataDir(PathBuf),
}

impl Error {
    /// Build the error returned when a shared lock was poisoned by a
    /// panicking writer.
    pub(crate) fn poisoned(what: &str) -> Self {
        Self::Config(format!("{what} lock poisoned"))
    }
}
