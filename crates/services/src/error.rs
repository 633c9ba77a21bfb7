//! Shared error types for the services crate.

use thiserror::Error;

use learn_core::ProgressionError;
use learn_core::model::{CatalogError, ProgressError, SnapshotError};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

use crate::config::ConfigError;

/// Errors emitted by a session coordinator.
///
/// The coordinator leaves its state untouched whenever one of these is returned.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("the code runner stopped unexpectedly: {0}")]
    Worker(String),
    #[error("invalid session export: {0}")]
    Export(#[from] serde_json::Error),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SessionError {
    /// Text suitable for showing to the learner.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            SessionError::InvalidInput(reason) => reason.clone(),
            SessionError::NotFound(what) => format!("{what} does not exist."),
            SessionError::Worker(_) => {
                "The code runner stopped unexpectedly. Please run your code again.".to_string()
            }
            SessionError::Export(err) => format!("That progress file could not be read: {err}."),
            SessionError::Snapshot(err) => {
                format!("That saved progress does not match this course: {err}.")
            }
            SessionError::Storage(StorageError::NotFound) => {
                "No saved progress was found for that session.".to_string()
            }
            SessionError::Storage(_) => {
                "Your progress could not be saved or loaded right now. Please try again."
                    .to_string()
            }
        }
    }
}

impl From<ProgressionError> for SessionError {
    fn from(err: ProgressionError) -> Self {
        match err {
            ProgressionError::NotFound(id) => SessionError::NotFound(format!("Chapter {id}")),
            ProgressionError::Locked(id) => SessionError::InvalidInput(format!(
                "Chapter {id} is locked. Complete the chapters before it first."
            )),
            ProgressionError::InvalidAnswers { source, .. } => {
                SessionError::InvalidInput(format!("Those answers do not fit the quiz: {source}."))
            }
            other => SessionError::InvalidInput(other.to_string()),
        }
    }
}

impl From<ProgressError> for SessionError {
    fn from(err: ProgressError) -> Self {
        match err {
            ProgressError::NotFound(id) => SessionError::NotFound(format!("Chapter {id}")),
            other => SessionError::NotFound(other.to_string()),
        }
    }
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
