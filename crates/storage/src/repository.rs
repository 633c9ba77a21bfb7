use async_trait::async_trait;
use learn_core::model::{Chapter, ChapterId, SessionId, SessionSnapshot};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Read access to authored chapters, plus the upsert the seeding tools use.
#[async_trait]
pub trait ChapterRepository: Send + Sync {
    /// Persist or replace a chapter, keyed by its id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the chapter cannot be stored.
    async fn upsert_chapter(&self, chapter: &Chapter) -> Result<(), StorageError>;

    /// Fetch a single chapter.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown id, or other storage errors.
    async fn get_chapter(&self, id: &ChapterId) -> Result<Chapter, StorageError>;

    /// All chapters in ordinal order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the chapters cannot be read or decoded.
    async fn list_chapters(&self) -> Result<Vec<Chapter>, StorageError>;
}

/// Durable session progress, one snapshot per session id.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Insert or overwrite the snapshot stored for `snapshot.session_id`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be encoded or stored.
    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if nothing was saved for `id`.
    async fn load_snapshot(&self, id: SessionId) -> Result<SessionSnapshot, StorageError>;

    /// Most recently saved snapshots first, at most `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshots cannot be read or decoded.
    async fn list_snapshots(&self, limit: u32) -> Result<Vec<SessionSnapshot>, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    chapters: Arc<Mutex<HashMap<ChapterId, Chapter>>>,
    snapshots: Arc<Mutex<SnapshotSlots>>,
}

#[derive(Default)]
struct SnapshotSlots {
    next_seq: u64,
    by_session: HashMap<SessionId, (u64, SessionSnapshot)>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository preloaded with `chapters`.
    #[must_use]
    pub fn with_chapters(chapters: impl IntoIterator<Item = Chapter>) -> Self {
        let map = chapters
            .into_iter()
            .map(|chapter| (chapter.id().clone(), chapter))
            .collect();
        Self {
            chapters: Arc::new(Mutex::new(map)),
            snapshots: Arc::default(),
        }
    }
}

#[async_trait]
impl ChapterRepository for InMemoryRepository {
    async fn upsert_chapter(&self, chapter: &Chapter) -> Result<(), StorageError> {
        let mut guard = self
            .chapters
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(chapter.id().clone(), chapter.clone());
        Ok(())
    }

    async fn get_chapter(&self, id: &ChapterId) -> Result<Chapter, StorageError> {
        let guard = self
            .chapters
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.get(id).cloned().ok_or(StorageError::NotFound)
    }

    async fn list_chapters(&self) -> Result<Vec<Chapter>, StorageError> {
        let guard = self
            .chapters
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut chapters: Vec<Chapter> = guard.values().cloned().collect();
        chapters.sort_by_key(Chapter::ordinal);
        Ok(chapters)
    }
}

#[async_trait]
impl SnapshotRepository for InMemoryRepository {
    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.next_seq += 1;
        let seq = guard.next_seq;
        guard
            .by_session
            .insert(snapshot.session_id, (seq, snapshot.clone()));
        Ok(())
    }

    async fn load_snapshot(&self, id: SessionId) -> Result<SessionSnapshot, StorageError> {
        let guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard
            .by_session
            .get(&id)
            .map(|(_, snapshot)| snapshot.clone())
            .ok_or(StorageError::NotFound)
    }

    async fn list_snapshots(&self, limit: u32) -> Result<Vec<SessionSnapshot>, StorageError> {
        let guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut entries: Vec<&(u64, SessionSnapshot)> = guard.by_session.values().collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|(_, snapshot)| snapshot.clone())
            .collect())
    }
}

/// Aggregates chapter and snapshot repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub chapters: Arc<dyn ChapterRepository>,
    pub snapshots: Arc<dyn SnapshotRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_in_memory(InMemoryRepository::new())
    }

    /// In-memory storage holding `chapters`, typically the bundled course.
    #[must_use]
    pub fn in_memory_with_chapters(chapters: impl IntoIterator<Item = Chapter>) -> Self {
        Self::from_in_memory(InMemoryRepository::with_chapters(chapters))
    }

    fn from_in_memory(repo: InMemoryRepository) -> Self {
        let chapters: Arc<dyn ChapterRepository> = Arc::new(repo.clone());
        let snapshots: Arc<dyn SnapshotRepository> = Arc::new(repo);
        Self {
            chapters,
            snapshots,
        }
    }
}
