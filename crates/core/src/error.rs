use thiserror::Error;

use crate::model::{CatalogError, ChapterError, ProgressError, QuizError, SnapshotError};
use crate::progression::ProgressionError;

/// Any domain error raised by this crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Quiz(#[from] QuizError),
    #[error(transparent)]
    Chapter(#[from] ChapterError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Progression(#[from] ProgressionError),
}
