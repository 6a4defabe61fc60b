use thiserror::Error;

/// Classifies identity-store errors to avoid ad-hoc strings.
#[derive(Error, Debug, Default)]
pub enum StorageError {
    #[error("store unavailable")]
    #[default]
    StoreUnavailable,

    #[error("database error: `{0}`")]
    Database(#[from] redb::DatabaseError),

    #[error("transaction error: `{0}`")]
    Transaction(#[from] redb::TransactionError),

    #[error("table error: `{0}`")]
    Table(#[from] redb::TableError),

    #[error("storage error: `{0}`")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: `{0}`")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: `{0}`")]
    Serialization(#[from] serde_json::Error),

    #[error("store task aborted: {0}")]
    TaskAborted(String),

    #[error("entry not found: {0}")]
    EntryNotFound(String),
}
