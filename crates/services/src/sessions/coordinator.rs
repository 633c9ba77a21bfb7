use std::sync::Arc;

use learn_core::QuizOutcome;
use learn_core::model::{Chapter, ChapterCatalog, ChapterId, SessionId, SessionSnapshot, SessionState};
use sandbox::ExecutionResult;
use tracing::{debug, info, warn};

use super::view::ProgressView;
use crate::app_services::AppServices;
use crate::error::SessionError;
use crate::events::LearningEvent;

/// Owns one learner's progress and mediates every change to it.
///
/// Each operation either succeeds or returns a `SessionError` with the state left
/// exactly as it was, so the coordinator stays usable after any failure.
pub struct SessionCoordinator {
    services: AppServices,
    state: SessionState,
}

impl SessionCoordinator {
    pub(crate) fn new(services: AppServices, state: SessionState) -> Self {
        Self { services, state }
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.state.session_id()
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn catalog(&self) -> &ChapterCatalog {
        self.services.catalog()
    }

    /// The chapter the learner is currently on.
    #[must_use]
    pub fn current_chapter(&self) -> Option<&Chapter> {
        self.catalog().get(self.state.current_chapter())
    }

    //
    // ─── EXECUTION ─────────────────────────────────────────────────────────────
    //

    /// Runs `source` in the sandbox on behalf of `chapter_id`.
    ///
    /// Sandbox outcomes, including policy violations, faults and timeouts, are
    /// returned inside the `ExecutionResult`. Every run that got past the policy
    /// check counts once towards the chapter and session execution counters.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for an unknown chapter,
    /// `SessionError::InvalidInput` for a locked one and `SessionError::Worker` if
    /// the blocking worker could not deliver a result.
    pub async fn execute_snippet(
        &mut self,
        chapter_id: &ChapterId,
        source: &str,
    ) -> Result<ExecutionResult, SessionError> {
        self.require_unlocked(chapter_id)?;

        let sandbox = Arc::clone(self.services.sandbox());
        let source = source.to_owned();
        let result = tokio::task::spawn_blocking(move || sandbox.execute(&source))
            .await
            .map_err(|e| {
                warn!(error = %e, chapter = %chapter_id, "sandbox worker failed");
                SessionError::Worker(e.to_string())
            })?;

        if result.was_executed() {
            self.state.record_execution(chapter_id)?;
        }

        let error_kind = result.error_kind();
        debug!(
            session_id = %self.session_id(),
            chapter = %chapter_id,
            success = result.success,
            kind = error_kind.map(|k| k.as_str()),
            duration_ms = u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX),
            "snippet executed"
        );
        self.services.emit(LearningEvent::ExecutionAttempted {
            session_id: self.session_id(),
            chapter_id: chapter_id.clone(),
            success: result.success,
            error_kind,
            duration: result.duration,
        });

        Ok(result)
    }

    /// [`SessionCoordinator::execute_snippet`] for the current chapter.
    ///
    /// # Errors
    ///
    /// See [`SessionCoordinator::execute_snippet`].
    pub async fn run_current(&mut self, source: &str) -> Result<ExecutionResult, SessionError> {
        let chapter_id = self.state.current_chapter().clone();
        self.execute_snippet(&chapter_id, source).await
    }

    //
    // ─── QUIZ ──────────────────────────────────────────────────────────────────
    //

    /// Grades a quiz submission and applies completion and unlocks.
    ///
    /// `answers` holds one zero-based option index per question.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for an unknown chapter and
    /// `SessionError::InvalidInput` for a locked chapter, a wrong answer count or
    /// an option index out of range.
    pub fn submit_quiz(
        &mut self,
        chapter_id: &ChapterId,
        answers: &[usize],
    ) -> Result<QuizOutcome, SessionError> {
        let outcome = self.services.progression().submit_quiz(
            &mut self.state,
            self.services.catalog(),
            chapter_id,
            answers,
        )?;

        let session_id = self.session_id();
        info!(
            %session_id,
            chapter = %chapter_id,
            correct = outcome.score.correct,
            total = outcome.score.total,
            passed = outcome.passed,
            "quiz submitted"
        );
        self.services.emit(LearningEvent::QuizSubmitted {
            session_id,
            chapter_id: chapter_id.clone(),
            score: outcome.score,
            passed: outcome.passed,
        });
        if outcome.newly_completed {
            info!(%session_id, chapter = %chapter_id, "chapter completed");
            self.services.emit(LearningEvent::ChapterCompleted {
                session_id,
                chapter_id: chapter_id.clone(),
            });
        }
        for unlocked in &outcome.newly_unlocked {
            info!(%session_id, chapter = %unlocked, "chapter unlocked");
            self.services.emit(LearningEvent::ChapterUnlocked {
                session_id,
                chapter_id: unlocked.clone(),
            });
        }

        Ok(outcome)
    }

    /// [`SessionCoordinator::submit_quiz`] for the current chapter.
    ///
    /// # Errors
    ///
    /// See [`SessionCoordinator::submit_quiz`].
    pub fn submit_current_quiz(&mut self, answers: &[usize]) -> Result<QuizOutcome, SessionError> {
        let chapter_id = self.state.current_chapter().clone();
        self.submit_quiz(&chapter_id, answers)
    }

    //
    // ─── NAVIGATION ────────────────────────────────────────────────────────────
    //

    /// Makes `chapter_id` the current chapter and returns its content.
    ///
    /// Time since the previous chapter was opened is charged to that chapter.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotFound` for an unknown chapter and
    /// `SessionError::InvalidInput` for a locked one.
    pub fn open_chapter(&mut self, chapter_id: &ChapterId) -> Result<&Chapter, SessionError> {
        self.require_unlocked(chapter_id)?;
        let now = self.services.clock().now();
        let leaving = self.state.current_chapter().clone();
        self.state.move_to(chapter_id, now)?;
        debug!(session_id = %self.session_id(), from = %leaving, to = %chapter_id, "chapter opened");
        self.chapter(chapter_id)
    }

    /// Opens the chapter after the current one.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidInput` while the current chapter is not
    /// completed, on the last chapter, or when the next chapter is still locked.
    pub fn next_chapter(&mut self) -> Result<&Chapter, SessionError> {
        let current = self.state.current_chapter().clone();
        if !self.state.chapter(&current)?.is_completed() {
            return Err(SessionError::InvalidInput(format!(
                "Pass the quiz for chapter {current} before moving on."
            )));
        }
        let next = self
            .catalog()
            .next_after(&current)
            .map(|c| c.id().clone())
            .ok_or_else(|| SessionError::InvalidInput("This is the last chapter.".into()))?;
        self.open_chapter(&next)
    }

    /// Opens the chapter before the current one.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidInput` on the first chapter or when the
    /// previous chapter is locked.
    pub fn previous_chapter(&mut self) -> Result<&Chapter, SessionError> {
        let current = self.state.current_chapter().clone();
        let previous = self
            .catalog()
            .previous_before(&current)
            .map(|c| c.id().clone())
            .ok_or_else(|| SessionError::InvalidInput("This is the first chapter.".into()))?;
        self.open_chapter(&previous)
    }

    //
    // ─── PROGRESS ──────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn progress_snapshot(&self) -> ProgressView {
        ProgressView::from_state(&self.state, self.catalog())
    }

    /// Starts over under the same session id.
    pub fn reset(&mut self) {
        let session_id = self.session_id();
        self.state = SessionState::start(session_id, self.catalog(), self.services.clock().now());
        info!(%session_id, "session reset");
        self.services.emit(LearningEvent::SessionReset { session_id });
    }

    /// The whole session as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Export` if serialization fails.
    pub fn export(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string_pretty(&self.state.to_snapshot())?)
    }

    /// Replaces the session with one exported earlier.
    ///
    /// The imported session keeps its own id.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Export` for malformed JSON and `SessionError::Snapshot`
    /// for an unknown layout version, unknown chapters or broken invariants.
    pub fn import(&mut self, payload: &str) -> Result<(), SessionError> {
        let snapshot: SessionSnapshot = serde_json::from_str(payload)?;
        let state = SessionState::from_snapshot(snapshot, self.catalog())?;
        self.replace_state(state);
        Ok(())
    }

    //
    // ─── PERSISTENCE ───────────────────────────────────────────────────────────
    //

    /// Stores the session, charging time spent on the current chapter first.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the snapshot repository fails; the
    /// uncharged time then stays with the in-memory session.
    pub async fn save(&mut self) -> Result<(), SessionError> {
        let mut state = self.state.clone();
        state.charge_time(self.services.clock().now())?;
        let snapshot = state.to_snapshot();
        if let Err(err) = self.services.snapshots().save_snapshot(&snapshot).await {
            warn!(session_id = %self.session_id(), error = %err, "saving session failed");
            return Err(err.into());
        }
        self.state = state;
        info!(session_id = %self.session_id(), "session saved");
        Ok(())
    }

    /// Replaces the session with the one stored under `session_id`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if nothing was saved under that id and
    /// `SessionError::Snapshot` if it does not fit the current course.
    pub async fn restore(&mut self, session_id: SessionId) -> Result<(), SessionError> {
        let state = self.services.load_state(session_id).await?;
        self.replace_state(state);
        Ok(())
    }

    //
    // ─── HELPERS ───────────────────────────────────────────────────────────────
    //

    fn chapter(&self, chapter_id: &ChapterId) -> Result<&Chapter, SessionError> {
        self.catalog()
            .get(chapter_id)
            .ok_or_else(|| SessionError::NotFound(format!("Chapter {chapter_id}")))
    }

    fn require_unlocked(&self, chapter_id: &ChapterId) -> Result<(), SessionError> {
        self.chapter(chapter_id)?;
        if self.state.chapter(chapter_id)?.is_unlocked() {
            Ok(())
        } else {
            Err(SessionError::InvalidInput(format!(
                "Chapter {chapter_id} is locked. Complete the chapters before it first."
            )))
        }
    }

    fn replace_state(&mut self, state: SessionState) {
        let session_id = state.session_id();
        self.state = state;
        info!(%session_id, current = %self.state.current_chapter(), "session restored");
        self.services.emit(LearningEvent::SessionRestored { session_id });
    }
}
