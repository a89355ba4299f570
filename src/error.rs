use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

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

    #[error("full-text index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("embedding provider error: {0}")]
    Embedding(String),

    #[error("language model error: {0}")]
    Llm(String),

    /// A transient store failure (unreachable, timed out). Retryable.
    #[error("graph store unavailable: {0}")]
    Unavailable(String),

    #[error("graph store unreachable after {attempts} attempt(s): {message}")]
    Connectivity { attempts: u32, message: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    /// Whether this error means the store could not be reached at all.
    ///
    /// Connectivity failures are the only store errors that retrieval
    /// surfaces to its caller; everything else degrades to a weaker signal.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::Unavailable(_) | Error::Connectivity { .. })
    }
}
