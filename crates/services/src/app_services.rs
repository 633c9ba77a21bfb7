use std::sync::Arc;

use learn_core::model::{ChapterCatalog, SessionId, SessionSnapshot, SessionState};
use learn_core::{Clock, Progression};
use sandbox::Sandbox;
use storage::repository::{ChapterRepository, SnapshotRepository, Storage};
use tracing::info;

use crate::config::SessionConfig;
use crate::error::{AppServicesError, SessionError};
use crate::events::{EventSink, LearningEvent, TracingEventSink};
use crate::sessions::SessionCoordinator;

/// Components shared by every learner session: the course, the sandbox, the
/// pass policy, snapshot storage, the event sink and the clock.
///
/// Cloning is cheap and every clone refers to the same components.
#[derive(Clone)]
pub struct AppServices {
    catalog: Arc<ChapterCatalog>,
    sandbox: Arc<Sandbox>,
    progression: Progression,
    snapshots: Arc<dyn SnapshotRepository>,
    events: Arc<dyn EventSink>,
    clock: Clock,
    config: SessionConfig,
}

impl AppServices {
    /// Events go to [`TracingEventSink`] until [`AppServices::with_events`] replaces it.
    #[must_use]
    pub fn new(
        catalog: ChapterCatalog,
        snapshots: Arc<dyn SnapshotRepository>,
        config: SessionConfig,
        clock: Clock,
    ) -> Self {
        Self {
            catalog: Arc::new(catalog),
            sandbox: Arc::new(Sandbox::new(config.sandbox.clone())),
            progression: Progression::new(config.pass_threshold),
            snapshots,
            events: Arc::new(TracingEventSink),
            clock,
            config,
        }
    }

    /// Services over `catalog` with in-memory snapshot storage.
    #[must_use]
    pub fn in_memory(catalog: ChapterCatalog, config: SessionConfig, clock: Clock) -> Self {
        let storage = Storage::in_memory();
        Self::new(catalog, storage.snapshots, config, clock)
    }

    /// Loads the course from `storage.chapters`.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::Storage` if the chapters cannot be read and
    /// `AppServicesError::Catalog` if they do not form a valid course (including
    /// an empty chapter table).
    pub async fn from_storage(
        storage: &Storage,
        config: SessionConfig,
        clock: Clock,
    ) -> Result<Self, AppServicesError> {
        let catalog = load_catalog(storage.chapters.as_ref()).await?;
        info!(chapters = catalog.len(), "course loaded");
        Ok(Self::new(
            catalog,
            Arc::clone(&storage.snapshots),
            config,
            clock,
        ))
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &ChapterCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub(crate) fn sandbox(&self) -> &Arc<Sandbox> {
        &self.sandbox
    }

    pub(crate) fn progression(&self) -> Progression {
        self.progression
    }

    pub(crate) fn snapshots(&self) -> &dyn SnapshotRepository {
        self.snapshots.as_ref()
    }

    pub(crate) fn emit(&self, event: LearningEvent) {
        self.events.emit(event);
    }

    /// Starts a fresh session with a new id.
    #[must_use]
    pub fn start_session(&self) -> SessionCoordinator {
        self.start_session_with_id(SessionId::generate())
    }

    /// Starts a fresh session under `session_id`.
    #[must_use]
    pub fn start_session_with_id(&self, session_id: SessionId) -> SessionCoordinator {
        let state = SessionState::start(session_id, &self.catalog, self.clock.now());
        info!(%session_id, current = %state.current_chapter(), "session started");
        self.emit(LearningEvent::SessionStarted { session_id });
        SessionCoordinator::new(self.clone(), state)
    }

    /// Continues a session saved earlier through [`SessionCoordinator::save`].
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if nothing was saved under `session_id` and
    /// `SessionError::Snapshot` if the saved progress does not fit the current course.
    pub async fn resume_session(
        &self,
        session_id: SessionId,
    ) -> Result<SessionCoordinator, SessionError> {
        let state = self.load_state(session_id).await?;
        info!(%session_id, current = %state.current_chapter(), "session restored");
        self.emit(LearningEvent::SessionRestored { session_id });
        Ok(SessionCoordinator::new(self.clone(), state))
    }

    /// Resumes `session_id` if it was saved before, otherwise starts it fresh.
    ///
    /// # Errors
    ///
    /// Same as [`AppServices::resume_session`], except that a missing snapshot is
    /// not an error.
    pub async fn resume_or_start(
        &self,
        session_id: SessionId,
    ) -> Result<SessionCoordinator, SessionError> {
        match self.resume_session(session_id).await {
            Err(SessionError::Storage(storage::repository::StorageError::NotFound)) => {
                Ok(self.start_session_with_id(session_id))
            }
            other => other,
        }
    }

    /// Recently saved sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` on repository failures.
    pub async fn recent_sessions(&self, limit: u32) -> Result<Vec<SessionSnapshot>, SessionError> {
        Ok(self.snapshots.list_snapshots(limit).await?)
    }

    pub(crate) async fn load_state(&self, session_id: SessionId) -> Result<SessionState, SessionError> {
        let snapshot = self.snapshots.load_snapshot(session_id).await?;
        let mut state = SessionState::from_snapshot(snapshot, &self.catalog)?;
        state.resume_at(self.clock.now());
        Ok(state)
    }
}

/// Reads every chapter and validates them as one course.
///
/// # Errors
///
/// Returns `AppServicesError` if the chapters cannot be read or are inconsistent.
pub async fn load_catalog(
    chapters: &dyn ChapterRepository,
) -> Result<ChapterCatalog, AppServicesError> {
    let chapters = chapters.list_chapters().await?;
    Ok(ChapterCatalog::new(chapters)?)
}
