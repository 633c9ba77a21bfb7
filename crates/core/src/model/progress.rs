use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::ChapterId;
use crate::model::quiz::QuizScore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("unknown chapter: {0}")]
    NotFound(ChapterId),
}

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Position of a chapter in the `Locked → Unlocked → Completed` lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterStatus {
    Locked,
    Unlocked,
    Completed,
}

//
// ─── CHAPTER PROGRESS ──────────────────────────────────────────────────────────
//

/// Per-chapter learner statistics.
///
/// Counters only grow. `unlocked` and `completed` can only be set from inside
/// this crate, by the progression state machine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChapterProgress {
    unlocked: bool,
    completed: bool,
    best_quiz_score: Option<QuizScore>,
    quiz_attempts: u32,
    code_executions: u32,
    time_spent_secs: u64,
}

impl ChapterProgress {
    #[must_use]
    pub fn locked() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    #[must_use]
    pub fn status(&self) -> ChapterStatus {
        if self.completed {
            ChapterStatus::Completed
        } else if self.unlocked {
            ChapterStatus::Unlocked
        } else {
            ChapterStatus::Locked
        }
    }

    #[must_use]
    pub fn best_quiz_score(&self) -> Option<QuizScore> {
        self.best_quiz_score
    }

    #[must_use]
    pub fn quiz_attempts(&self) -> u32 {
        self.quiz_attempts
    }

    #[must_use]
    pub fn code_executions(&self) -> u32 {
        self.code_executions
    }

    #[must_use]
    pub fn time_spent_secs(&self) -> u64 {
        self.time_spent_secs
    }

    pub fn record_execution(&mut self) {
        self.code_executions = self.code_executions.saturating_add(1);
    }

    pub fn add_time_spent(&mut self, secs: u64) {
        self.time_spent_secs = self.time_spent_secs.saturating_add(secs);
    }

    /// Counts one quiz attempt and keeps `score` if it beats the best so far.
    ///
    /// Returns `true` when the best score improved.
    pub fn record_quiz_attempt(&mut self, score: QuizScore) -> bool {
        self.quiz_attempts = self.quiz_attempts.saturating_add(1);
        let improved = self
            .best_quiz_score
            .is_none_or(|best| score.is_better_than(&best));
        if improved {
            self.best_quiz_score = Some(score);
        }
        improved
    }

    pub(crate) fn unlock(&mut self) -> bool {
        let changed = !self.unlocked;
        self.unlocked = true;
        changed
    }

    pub(crate) fn complete(&mut self) -> bool {
        debug_assert!(self.unlocked, "only unlocked chapters can be completed");
        let changed = !self.completed;
        self.completed = true;
        changed
    }

    /// Rebuilds progress from persisted fields without re-running transitions.
    ///
    /// Invariants across chapters are checked by the session import.
    pub(crate) fn from_persisted(
        unlocked: bool,
        completed: bool,
        best_quiz_score: Option<QuizScore>,
        quiz_attempts: u32,
        code_executions: u32,
        time_spent_secs: u64,
    ) -> Self {
        Self {
            unlocked,
            completed,
            best_quiz_score,
            quiz_attempts,
            code_executions,
            time_spent_secs,
        }
    }
}

//
// ─── STORE ─────────────────────────────────────────────────────────────────────
//

/// Per-session map of chapter id to progress.
///
/// The key set is fixed when the store is created from the chapter catalog;
/// unknown ids are rejected on both reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgressStore {
    chapters: BTreeMap<ChapterId, ChapterProgress>,
}

impl ProgressStore {
    /// Creates a store with every given chapter locked.
    pub fn new(ids: impl IntoIterator<Item = ChapterId>) -> Self {
        Self {
            chapters: ids
                .into_iter()
                .map(|id| (id, ChapterProgress::locked()))
                .collect(),
        }
    }

    pub(crate) fn from_entries(chapters: BTreeMap<ChapterId, ChapterProgress>) -> Self {
        Self { chapters }
    }

    /// # Errors
    ///
    /// Returns `ProgressError::NotFound` for ids outside the catalog.
    pub fn get(&self, id: &ChapterId) -> Result<&ChapterProgress, ProgressError> {
        self.chapters
            .get(id)
            .ok_or_else(|| ProgressError::NotFound(id.clone()))
    }

    /// Applies `mutator` to one chapter's progress.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotFound` for ids outside the catalog.
    pub fn update<T>(
        &mut self,
        id: &ChapterId,
        mutator: impl FnOnce(&mut ChapterProgress) -> T,
    ) -> Result<T, ProgressError> {
        let progress = self
            .chapters
            .get_mut(id)
            .ok_or_else(|| ProgressError::NotFound(id.clone()))?;
        Ok(mutator(progress))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ChapterId, &ChapterProgress)> {
        self.chapters.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.chapters.values().filter(|p| p.is_completed()).count()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ChapterId {
        ChapterId::new(s).unwrap()
    }

    #[test]
    fn unknown_chapter_is_not_found() {
        let mut store = ProgressStore::new([id("a")]);
        assert_eq!(
            store.get(&id("b")).unwrap_err(),
            ProgressError::NotFound(id("b"))
        );
        assert!(store.update(&id("b"), |p| p.record_execution()).is_err());
    }

    #[test]
    fn update_increments_counters() {
        let mut store = ProgressStore::new([id("a")]);
        store
            .update(&id("a"), |p| {
                p.record_execution();
                p.add_time_spent(30);
            })
            .unwrap();
        let progress = store.get(&id("a")).unwrap();
        assert_eq!(progress.code_executions(), 1);
        assert_eq!(progress.time_spent_secs(), 30);
        assert_eq!(progress.status(), ChapterStatus::Locked);
    }

    #[test]
    fn best_score_only_improves() {
        let mut progress = ChapterProgress::locked();
        assert!(progress.record_quiz_attempt(QuizScore::new(1, 3)));
        assert!(progress.record_quiz_attempt(QuizScore::new(3, 3)));
        assert!(!progress.record_quiz_attempt(QuizScore::new(2, 3)));
        assert_eq!(progress.best_quiz_score(), Some(QuizScore::new(3, 3)));
        assert_eq!(progress.quiz_attempts(), 3);
    }

    #[test]
    fn status_follows_flags() {
        let mut progress = ChapterProgress::locked();
        assert!(progress.unlock());
        assert!(!progress.unlock());
        assert_eq!(progress.status(), ChapterStatus::Unlocked);
        assert!(progress.complete());
        assert_eq!(progress.status(), ChapterStatus::Completed);
    }
}
