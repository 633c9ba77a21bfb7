use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::chapter::ChapterCatalog;
use crate::model::ids::{ChapterId, SessionId};
use crate::model::progress::{ChapterProgress, ProgressError, ProgressStore};
use crate::model::quiz::QuizScore;
use crate::progression;

/// Layout version written into every exported snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error("unsupported snapshot version {found} (expected {SNAPSHOT_VERSION})")]
    UnsupportedVersion { found: u32 },

    #[error("snapshot references unknown chapter {0}")]
    UnknownChapter(ChapterId),

    #[error("chapter {0} is completed but not unlocked")]
    CompletedWhileLocked(ChapterId),

    #[error("chapter {chapter} is unlocked but prerequisite {prerequisite} is not completed")]
    UnmetPrerequisite {
        chapter: ChapterId,
        prerequisite: ChapterId,
    },

    #[error("chapter {0} has an invalid best score")]
    InvalidScore(ChapterId),

    #[error("current chapter {0} is not unlocked")]
    CurrentChapterLocked(ChapterId),

    #[error("chapter_opened_at is before start_timestamp")]
    InvalidTimeRange,
}

//
// ─── SESSION STATE ─────────────────────────────────────────────────────────────
//

/// Everything one learner session knows about progress.
///
/// Owned by exactly one session coordinator; there is no shared global store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    session_id: SessionId,
    started_at: DateTime<Utc>,
    current_chapter: ChapterId,
    chapter_opened_at: DateTime<Utc>,
    progress: ProgressStore,
    total_code_runs: u64,
    total_quiz_attempts: u64,
}

impl SessionState {
    /// Starts a fresh session: every chapter without prerequisites is unlocked,
    /// all others are locked, and the first chapter is current.
    #[must_use]
    pub fn start(session_id: SessionId, catalog: &ChapterCatalog, started_at: DateTime<Utc>) -> Self {
        let progress = ProgressStore::new(catalog.chapters().iter().map(|c| c.id().clone()));
        let mut state = Self {
            session_id,
            started_at,
            current_chapter: catalog.first().id().clone(),
            chapter_opened_at: started_at,
            progress,
            total_code_runs: 0,
            total_quiz_attempts: 0,
        };
        progression::unlock_eligible(&mut state, catalog);
        state
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn current_chapter(&self) -> &ChapterId {
        &self.current_chapter
    }

    #[must_use]
    pub fn chapter_opened_at(&self) -> DateTime<Utc> {
        self.chapter_opened_at
    }

    #[must_use]
    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    pub(crate) fn progress_mut(&mut self) -> &mut ProgressStore {
        &mut self.progress
    }

    #[must_use]
    pub fn total_code_runs(&self) -> u64 {
        self.total_code_runs
    }

    #[must_use]
    pub fn total_quiz_attempts(&self) -> u64 {
        self.total_quiz_attempts
    }

    /// # Errors
    ///
    /// Returns `ProgressError::NotFound` for unknown chapters.
    pub fn chapter(&self, id: &ChapterId) -> Result<&ChapterProgress, ProgressError> {
        self.progress.get(id)
    }

    /// Counts one sandbox run against `chapter` and the session total.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotFound` for unknown chapters; nothing is counted then.
    pub fn record_execution(&mut self, chapter: &ChapterId) -> Result<(), ProgressError> {
        self.progress.update(chapter, ChapterProgress::record_execution)?;
        self.total_code_runs = self.total_code_runs.saturating_add(1);
        Ok(())
    }

    pub(crate) fn count_quiz_attempt(&mut self) {
        self.total_quiz_attempts = self.total_quiz_attempts.saturating_add(1);
    }

    /// Charges the whole seconds since the current chapter was opened to that
    /// chapter and moves the timer forward by exactly that much, so a sub-second
    /// remainder carries over into the next charge.
    ///
    /// Returns the charged seconds. A clock that moved backwards charges nothing.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotFound` if the current chapter is missing from the
    /// store; nothing is charged then.
    pub fn charge_time(&mut self, now: DateTime<Utc>) -> Result<u64, ProgressError> {
        let elapsed = now
            .signed_duration_since(self.chapter_opened_at)
            .num_seconds()
            .max(0);
        let secs = u64::try_from(elapsed).unwrap_or(0);
        self.progress
            .update(&self.current_chapter, |p| p.add_time_spent(secs))?;
        self.chapter_opened_at += Duration::seconds(elapsed);
        Ok(secs)
    }

    /// Restarts the chapter timer at `now` without charging anything, so time spent
    /// away from a stored session is not counted.
    pub fn resume_at(&mut self, now: DateTime<Utc>) {
        if now > self.chapter_opened_at {
            self.chapter_opened_at = now;
        }
    }

    /// Moves the current-chapter pointer, charging elapsed time to the chapter being left.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotFound` for unknown chapters; the pointer does not move.
    pub fn move_to(&mut self, chapter: &ChapterId, now: DateTime<Utc>) -> Result<(), ProgressError> {
        self.progress.get(chapter)?;
        self.charge_time(now)?;
        self.current_chapter = chapter.clone();
        Ok(())
    }

    /// Exports the full state as a serializable record.
    #[must_use]
    pub fn to_snapshot(&self) -> SessionSnapshot {
        let chapters = self
            .progress
            .iter()
            .map(|(id, p)| {
                (
                    id.clone(),
                    ChapterProgressRecord {
                        unlocked: p.is_unlocked(),
                        completed: p.is_completed(),
                        best_quiz_score: p.best_quiz_score(),
                        attempt_count: p.quiz_attempts(),
                        exec_count: p.code_executions(),
                        time_spent_seconds: p.time_spent_secs(),
                    },
                )
            })
            .collect();

        SessionSnapshot {
            version: SNAPSHOT_VERSION,
            session_id: self.session_id,
            start_timestamp: self.started_at,
            current_chapter: self.current_chapter.clone(),
            chapter_opened_at: self.chapter_opened_at,
            total_code_runs: self.total_code_runs,
            total_quiz_attempts: self.total_quiz_attempts,
            chapters,
        }
    }

    /// Rebuilds a session from an exported record, checking it against `catalog`.
    ///
    /// Chapters added to the catalog after the export start locked and are then
    /// unlocked if their prerequisites are already completed.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError` if the record is from another layout version,
    /// names unknown chapters, or breaks a progression invariant.
    pub fn from_snapshot(
        snapshot: SessionSnapshot,
        catalog: &ChapterCatalog,
    ) -> Result<Self, SnapshotError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.version,
            });
        }
        if snapshot.chapter_opened_at < snapshot.start_timestamp {
            return Err(SnapshotError::InvalidTimeRange);
        }

        let mut entries = BTreeMap::new();
        for chapter in catalog.chapters() {
            entries.insert(chapter.id().clone(), ChapterProgress::locked());
        }
        for (id, record) in &snapshot.chapters {
            let slot = entries
                .get_mut(id)
                .ok_or_else(|| SnapshotError::UnknownChapter(id.clone()))?;
            if record.completed && !record.unlocked {
                return Err(SnapshotError::CompletedWhileLocked(id.clone()));
            }
            if let Some(score) = record.best_quiz_score {
                if score.total == 0 || score.correct > score.total {
                    return Err(SnapshotError::InvalidScore(id.clone()));
                }
            }
            *slot = ChapterProgress::from_persisted(
                record.unlocked,
                record.completed,
                record.best_quiz_score,
                record.attempt_count,
                record.exec_count,
                record.time_spent_seconds,
            );
        }

        for chapter in catalog.chapters() {
            let unlocked = entries
                .get(chapter.id())
                .is_some_and(ChapterProgress::is_unlocked);
            if !unlocked {
                continue;
            }
            for prerequisite in chapter.prerequisites() {
                let done = entries
                    .get(prerequisite)
                    .is_some_and(ChapterProgress::is_completed);
                if !done {
                    return Err(SnapshotError::UnmetPrerequisite {
                        chapter: chapter.id().clone(),
                        prerequisite: prerequisite.clone(),
                    });
                }
            }
        }

        if !catalog.contains(&snapshot.current_chapter) {
            return Err(SnapshotError::UnknownChapter(snapshot.current_chapter));
        }

        let mut state = Self {
            session_id: snapshot.session_id,
            started_at: snapshot.start_timestamp,
            current_chapter: snapshot.current_chapter,
            chapter_opened_at: snapshot.chapter_opened_at,
            progress: ProgressStore::from_entries(entries),
            total_code_runs: snapshot.total_code_runs,
            total_quiz_attempts: snapshot.total_quiz_attempts,
        };
        progression::unlock_eligible(&mut state, catalog);

        let current_unlocked = state
            .progress
            .get(&state.current_chapter)
            .is_ok_and(ChapterProgress::is_unlocked);
        if !current_unlocked {
            return Err(SnapshotError::CurrentChapterLocked(state.current_chapter));
        }
        Ok(state)
    }
}

//
// ─── SNAPSHOT LAYOUT ───────────────────────────────────────────────────────────
//

/// Exported per-chapter fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterProgressRecord {
    pub unlocked: bool,
    pub completed: bool,
    pub best_quiz_score: Option<QuizScore>,
    pub attempt_count: u32,
    pub exec_count: u32,
    pub time_spent_seconds: u64,
}

/// Opaque, versioned record of a whole session, used for export/import and
/// for snapshot persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub session_id: SessionId,
    pub start_timestamp: DateTime<Utc>,
    pub current_chapter: ChapterId,
    pub chapter_opened_at: DateTime<Utc>,
    pub total_code_runs: u64,
    pub total_quiz_attempts: u64,
    pub chapters: BTreeMap<ChapterId, ChapterProgressRecord>,
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::chapter::tests::{draft, id};
    use crate::model::progress::ChapterStatus;
    use crate::time::fixed_now;

    fn catalog() -> ChapterCatalog {
        ChapterCatalog::from_drafts(vec![
            draft("intro", 1, &[]),
            draft("variables", 2, &["intro"]),
            draft("extras", 3, &[]),
        ])
        .unwrap()
    }

    #[test]
    fn start_unlocks_chapters_without_prerequisites() {
        let state = SessionState::start(SessionId::generate(), &catalog(), fixed_now());
        assert_eq!(state.current_chapter(), &id("intro"));
        assert_eq!(
            state.chapter(&id("intro")).unwrap().status(),
            ChapterStatus::Unlocked
        );
        assert_eq!(
            state.chapter(&id("variables")).unwrap().status(),
            ChapterStatus::Locked
        );
        assert_eq!(
            state.chapter(&id("extras")).unwrap().status(),
            ChapterStatus::Unlocked
        );
    }

    #[test]
    fn record_execution_counts_chapter_and_total() {
        let mut state = SessionState::start(SessionId::generate(), &catalog(), fixed_now());
        state.record_execution(&id("intro")).unwrap();
        state.record_execution(&id("intro")).unwrap();
        assert_eq!(state.chapter(&id("intro")).unwrap().code_executions(), 2);
        assert_eq!(state.total_code_runs(), 2);

        assert!(state.record_execution(&id("ghost")).is_err());
        assert_eq!(state.total_code_runs(), 2);
    }

    #[test]
    fn move_to_charges_time_to_previous_chapter() {
        let now = fixed_now();
        let mut state = SessionState::start(SessionId::generate(), &catalog(), now);
        state
            .move_to(&id("extras"), now + chrono::Duration::seconds(90))
            .unwrap();
        assert_eq!(state.chapter(&id("intro")).unwrap().time_spent_secs(), 90);
        assert_eq!(state.current_chapter(), &id("extras"));
        assert_eq!(state.chapter_opened_at(), now + chrono::Duration::seconds(90));
    }

    #[test]
    fn backwards_clock_charges_nothing() {
        let now = fixed_now();
        let mut state = SessionState::start(SessionId::generate(), &catalog(), now);
        assert_eq!(state.charge_time(now - chrono::Duration::seconds(10)).unwrap(), 0);
        assert_eq!(state.chapter_opened_at(), now);
    }

    #[test]
    fn sub_second_remainders_carry_over() {
        let mut now = fixed_now();
        let mut state = SessionState::start(SessionId::generate(), &catalog(), now);
        for _ in 0..10 {
            now += chrono::Duration::milliseconds(900);
            state.charge_time(now).unwrap();
        }
        assert_eq!(state.chapter(&id("intro")).unwrap().time_spent_secs(), 9);
        assert_eq!(
            state.chapter_opened_at(),
            fixed_now() + chrono::Duration::seconds(9)
        );
    }

    #[test]
    fn resume_skips_time_away() {
        let now = fixed_now();
        let mut state = SessionState::start(SessionId::generate(), &catalog(), now);
        state.resume_at(now + chrono::Duration::hours(5));
        assert_eq!(state.charge_time(now + chrono::Duration::hours(5)).unwrap(), 0);
        assert_eq!(state.chapter(&id("intro")).unwrap().time_spent_secs(), 0);
    }

    #[test]
    fn snapshot_round_trips() {
        let catalog = catalog();
        let mut state = SessionState::start(SessionId::generate(), &catalog, fixed_now());
        state.record_execution(&id("extras")).unwrap();
        let restored = SessionState::from_snapshot(state.to_snapshot(), &catalog).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn snapshot_with_unknown_chapter_is_rejected() {
        let catalog = catalog();
        let state = SessionState::start(SessionId::generate(), &catalog, fixed_now());
        let mut snapshot = state.to_snapshot();
        let record = snapshot.chapters[&id("intro")].clone();
        snapshot.chapters.insert(id("ghost"), record);
        assert_eq!(
            SessionState::from_snapshot(snapshot, &catalog).unwrap_err(),
            SnapshotError::UnknownChapter(id("ghost"))
        );
    }

    #[test]
    fn snapshot_with_unmet_prerequisite_is_rejected() {
        let catalog = catalog();
        let state = SessionState::start(SessionId::generate(), &catalog, fixed_now());
        let mut snapshot = state.to_snapshot();
        snapshot
            .chapters
            .get_mut(&id("variables"))
            .unwrap()
            .unlocked = true;
        assert!(matches!(
            SessionState::from_snapshot(snapshot, &catalog).unwrap_err(),
            SnapshotError::UnmetPrerequisite { .. }
        ));
    }

    #[test]
    fn snapshot_with_completed_locked_chapter_is_rejected() {
        let catalog = catalog();
        let state = SessionState::start(SessionId::generate(), &catalog, fixed_now());
        let mut snapshot = state.to_snapshot();
        snapshot
            .chapters
            .get_mut(&id("variables"))
            .unwrap()
            .completed = true;
        assert_eq!(
            SessionState::from_snapshot(snapshot, &catalog).unwrap_err(),
            SnapshotError::CompletedWhileLocked(id("variables"))
        );
    }

    #[test]
    fn snapshot_version_is_checked() {
        let catalog = catalog();
        let mut snapshot =
            SessionState::start(SessionId::generate(), &catalog, fixed_now()).to_snapshot();
        snapshot.version = 99;
        assert_eq!(
            SessionState::from_snapshot(snapshot, &catalog).unwrap_err(),
            SnapshotError::UnsupportedVersion { found: 99 }
        );
    }

    #[test]
    fn missing_chapters_are_filled_in_on_import() {
        let catalog = catalog();
        let mut snapshot =
            SessionState::start(SessionId::generate(), &catalog, fixed_now()).to_snapshot();
        snapshot.chapters.remove(&id("extras"));
        let restored = SessionState::from_snapshot(snapshot, &catalog).unwrap();
        assert!(restored.chapter(&id("extras")).unwrap().is_unlocked());
    }
}
