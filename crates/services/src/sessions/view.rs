use chrono::{DateTime, Utc};
use serde::Serialize;

use learn_core::model::{ChapterCatalog, ChapterId, ChapterStatus, QuizScore, SessionId, SessionState};

/// Presentation-agnostic progress row for one chapter.
///
/// Carries raw values only. The presentation layer decides how to format
/// durations, percentages and status labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterProgressItem {
    pub id: ChapterId,
    pub ordinal: u32,
    pub title: String,
    pub status: ChapterStatus,
    pub is_current: bool,
    pub best_quiz_score: Option<QuizScore>,
    pub quiz_attempts: u32,
    pub code_executions: u32,
    pub time_spent_secs: u64,
    pub estimated_minutes: u32,
}

/// Read-only view of a whole session, in course order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressView {
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    pub current_chapter: ChapterId,
    pub total_code_runs: u64,
    pub total_quiz_attempts: u64,
    pub completed_chapters: usize,
    pub total_chapters: usize,
    pub chapters: Vec<ChapterProgressItem>,
}

impl ProgressView {
    /// Builds the view; chapters missing from `state` are skipped.
    #[must_use]
    pub fn from_state(state: &SessionState, catalog: &ChapterCatalog) -> Self {
        let chapters: Vec<ChapterProgressItem> = catalog
            .chapters()
            .iter()
            .filter_map(|chapter| {
                let progress = state.chapter(chapter.id()).ok()?;
                Some(ChapterProgressItem {
                    id: chapter.id().clone(),
                    ordinal: chapter.ordinal(),
                    title: chapter.title().to_owned(),
                    status: progress.status(),
                    is_current: chapter.id() == state.current_chapter(),
                    best_quiz_score: progress.best_quiz_score(),
                    quiz_attempts: progress.quiz_attempts(),
                    code_executions: progress.code_executions(),
                    time_spent_secs: progress.time_spent_secs(),
                    estimated_minutes: chapter.estimated_minutes(),
                })
            })
            .collect();

        Self {
            session_id: state.session_id(),
            started_at: state.started_at(),
            current_chapter: state.current_chapter().clone(),
            total_code_runs: state.total_code_runs(),
            total_quiz_attempts: state.total_quiz_attempts(),
            completed_chapters: state.progress().completed_count(),
            total_chapters: chapters.len(),
            chapters,
        }
    }

    /// Whole-number share of completed chapters, 0..=100.
    #[must_use]
    pub fn percent_complete(&self) -> u32 {
        if self.total_chapters == 0 {
            return 0;
        }
        let pct = self.completed_chapters.saturating_mul(100) / self.total_chapters;
        u32::try_from(pct).unwrap_or(100)
    }

    #[must_use]
    pub fn chapter(&self, id: &ChapterId) -> Option<&ChapterProgressItem> {
        self.chapters.iter().find(|item| &item.id == id)
    }

    /// Mean best-score percentage over chapters that have a score.
    #[must_use]
    pub fn average_best_score(&self) -> Option<u32> {
        let scores: Vec<u32> = self
            .chapters
            .iter()
            .filter_map(|item| item.best_quiz_score.map(|s| s.percent()))
            .collect();
        if scores.is_empty() {
            return None;
        }
        let count = u32::try_from(scores.len()).unwrap_or(u32::MAX);
        Some(scores.iter().sum::<u32>() / count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use learn_core::time::fixed_now;
    use storage::catalog::bundled_catalog;

    #[test]
    fn fresh_session_view() {
        let catalog = bundled_catalog().unwrap();
        let state = SessionState::start(SessionId::generate(), &catalog, fixed_now());
        let view = ProgressView::from_state(&state, &catalog);

        assert_eq!(view.total_chapters, 5);
        assert_eq!(view.completed_chapters, 0);
        assert_eq!(view.percent_complete(), 0);
        assert_eq!(view.average_best_score(), None);
        assert_eq!(view.chapters[0].status, ChapterStatus::Unlocked);
        assert!(view.chapters[0].is_current);
        assert!(
            view.chapters[1..]
                .iter()
                .all(|item| item.status == ChapterStatus::Locked && !item.is_current)
        );
        let ordinals: Vec<u32> = view.chapters.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3, 4, 5]);
    }
}
