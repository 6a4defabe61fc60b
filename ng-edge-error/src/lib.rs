pub mod storage;

use anyhow::Error as AnyhowError;
use config::ConfigError;
use serde_json::Error as SerdeJsonError;
use std::{error::Error as StdError, io::Error as IoError};
use storage::StorageError;
use thiserror::Error;
use tokio::{task::JoinError, time::Duration};

pub type EdgeResult<T, E = EdgeError> = anyhow::Result<T, E>;
pub type StorageResult<T, E = StorageError> = Result<T, E>;

#[derive(Error, Debug, Default)]
pub enum EdgeError {
    #[error("service unavailable")]
    #[default]
    ServiceUnavailable,
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    JoinError(#[from] JoinError),
    #[error("{0}")]
    StdError(#[from] Box<dyn StdError + Send + Sync>),
    #[error("{0}")]
    Msg(String),
    #[error("{0}")]
    IoError(#[from] IoError),
    #[error("{0}")]
    Anyhow(#[from] AnyhowError),
    #[error("{0}")]
    Json(#[from] SerdeJsonError),
    #[error("{0}")]
    ConfigError(#[from] ConfigError),
    #[error("{0}")]
    StorageError(#[from] StorageError),
    #[error("identity not found: {0}")]
    IdentityNotFound(String),
    #[error("identity disabled: {0}")]
    IdentityDisabled(String),
    #[error("no connection registered for {0}")]
    ConnectionNotFound(String),
    #[error("cloud connection failed for {0}: {1}")]
    CloudConnectionFailed(String, String),
    #[error("authorization rejected for {0}")]
    AuthorizationRejected(String),
    #[error("invalid identity key: {0}")]
    InvalidIdentityKey(String),
    #[error("invalid state: {0}")]
    InvalidStateError(String),
    #[error("shutdown error: {0}")]
    ShutdownError(String),
}

impl From<String> for EdgeError {
    #[inline]
    fn from(e: String) -> Self {
        EdgeError::Msg(e)
    }
}

impl From<&str> for EdgeError {
    #[inline]
    fn from(e: &str) -> Self {
        EdgeError::Msg(e.to_string())
    }
}

impl From<Box<dyn StdError>> for EdgeError {
    #[inline]
    fn from(e: Box<dyn StdError>) -> Self {
        EdgeError::Msg(e.to_string())
    }
}
