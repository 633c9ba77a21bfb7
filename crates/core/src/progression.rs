//! Chapter lifecycle: `Locked → Unlocked → Completed`.
//!
//! A chapter unlocks once every prerequisite is completed, and completes when a
//! quiz submission meets the pass threshold. Both transitions are one-way.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    ChapterCatalog, ChapterId, ChapterProgress, QuestionFeedback, QuizError, QuizScore,
    SessionState,
};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressionError {
    #[error("unknown chapter: {0}")]
    NotFound(ChapterId),

    #[error("chapter {0} is locked")]
    Locked(ChapterId),

    #[error("invalid answers for chapter {chapter}: {source}")]
    InvalidAnswers {
        chapter: ChapterId,
        #[source]
        source: QuizError,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid pass threshold `{raw}` (expected majority, all or percent:N with N in 1..=100)")]
pub struct ParseThresholdError {
    raw: String,
}

//
// ─── PASS THRESHOLD ────────────────────────────────────────────────────────────
//

/// Policy deciding whether a quiz score completes a chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassThreshold {
    /// More than half of the questions answered correctly.
    #[default]
    Majority,
    /// Every question answered correctly.
    All,
    /// At least the given percentage answered correctly.
    Percent(u8),
}

impl PassThreshold {
    #[must_use]
    pub fn passes(&self, score: QuizScore) -> bool {
        if score.total == 0 {
            return false;
        }
        let correct = u64::from(score.correct);
        let total = u64::from(score.total);
        match self {
            PassThreshold::Majority => correct * 2 > total,
            PassThreshold::All => correct == total,
            PassThreshold::Percent(pct) => correct * 100 >= u64::from(*pct) * total,
        }
    }
}

impl fmt::Display for PassThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassThreshold::Majority => f.write_str("majority"),
            PassThreshold::All => f.write_str("all"),
            PassThreshold::Percent(pct) => write!(f, "percent:{pct}"),
        }
    }
}

impl FromStr for PassThreshold {
    type Err = ParseThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().to_ascii_lowercase();
        let err = || ParseThresholdError { raw: s.to_string() };
        match raw.as_str() {
            "majority" => Ok(PassThreshold::Majority),
            "all" => Ok(PassThreshold::All),
            other => {
                let pct = other
                    .strip_prefix("percent:")
                    .and_then(|n| n.trim().parse::<u8>().ok())
                    .filter(|n| (1..=100).contains(n))
                    .ok_or_else(err)?;
                Ok(PassThreshold::Percent(pct))
            }
        }
    }
}

//
// ─── OUTCOME ───────────────────────────────────────────────────────────────────
//

/// Result of one quiz submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuizOutcome {
    pub chapter_id: ChapterId,
    pub score: QuizScore,
    pub passed: bool,
    /// The chapter moved to `Completed` because of this submission.
    pub newly_completed: bool,
    pub best_score_improved: bool,
    /// Chapters that moved to `Unlocked` because of this submission, in course order.
    pub newly_unlocked: Vec<ChapterId>,
    pub feedback: Vec<QuestionFeedback>,
}

//
// ─── STATE MACHINE ─────────────────────────────────────────────────────────────
//

/// Applies quiz submissions to a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct Progression {
    threshold: PassThreshold,
}

impl Progression {
    #[must_use]
    pub fn new(threshold: PassThreshold) -> Self {
        Self { threshold }
    }

    #[must_use]
    pub fn threshold(&self) -> PassThreshold {
        self.threshold
    }

    /// Grades `answers` for `chapter_id` and applies the resulting transitions.
    ///
    /// The attempt is counted whether or not the quiz is passed. A pass on a
    /// chapter that is not yet completed completes it and re-evaluates every
    /// chapter's unlock eligibility.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the chapter is not in the catalog
    /// - `Locked` if the chapter has not been unlocked yet
    /// - `InvalidAnswers` for a wrong answer count or an unknown option
    ///
    /// The session is left untouched on error.
    pub fn submit_quiz(
        &self,
        state: &mut SessionState,
        catalog: &ChapterCatalog,
        chapter_id: &ChapterId,
        answers: &[usize],
    ) -> Result<QuizOutcome, ProgressionError> {
        let chapter = catalog
            .get(chapter_id)
            .ok_or_else(|| ProgressionError::NotFound(chapter_id.clone()))?;
        let progress = state
            .chapter(chapter_id)
            .map_err(|_| ProgressionError::NotFound(chapter_id.clone()))?;
        if !progress.is_unlocked() {
            return Err(ProgressionError::Locked(chapter_id.clone()));
        }

        let graded =
            chapter
                .quiz()
                .grade(answers)
                .map_err(|source| ProgressionError::InvalidAnswers {
                    chapter: chapter_id.clone(),
                    source,
                })?;
        let passed = self.threshold.passes(graded.score);

        let (best_score_improved, newly_completed) = state
            .progress_mut()
            .update(chapter_id, |p| {
                let improved = p.record_quiz_attempt(graded.score);
                let completed = passed && p.complete();
                (improved, completed)
            })
            .map_err(|_| ProgressionError::NotFound(chapter_id.clone()))?;
        state.count_quiz_attempt();

        let newly_unlocked = if newly_completed {
            unlock_eligible(state, catalog)
        } else {
            Vec::new()
        };

        Ok(QuizOutcome {
            chapter_id: chapter_id.clone(),
            score: graded.score,
            passed,
            newly_completed,
            best_score_improved,
            newly_unlocked,
            feedback: graded.feedback,
        })
    }
}

/// Unlocks every locked chapter whose prerequisites are all completed.
///
/// Returns the chapters that changed, in course order.
pub(crate) fn unlock_eligible(state: &mut SessionState, catalog: &ChapterCatalog) -> Vec<ChapterId> {
    let eligible: Vec<ChapterId> = catalog
        .chapters()
        .iter()
        .filter(|chapter| {
            let locked = state
                .chapter(chapter.id())
                .is_ok_and(|p| !p.is_unlocked());
            locked
                && chapter.prerequisites().iter().all(|prerequisite| {
                    state
                        .chapter(prerequisite)
                        .is_ok_and(ChapterProgress::is_completed)
                })
        })
        .map(|chapter| chapter.id().clone())
        .collect();

    let store = state.progress_mut();
    eligible
        .into_iter()
        .filter(|id| store.update(id, ChapterProgress::unlock).unwrap_or(false))
        .collect()
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::chapter::tests::{draft, id, quiz};
    use crate::model::{ChapterStatus, SessionId};
    use crate::time::fixed_now;

    fn diamond() -> ChapterCatalog {
        // one → {two, three} → four (needs both)
        ChapterCatalog::from_drafts(vec![
            draft("one", 1, &[]),
            draft("two", 2, &["one"]),
            draft("three", 3, &["one"]),
            draft("four", 4, &["two", "three"]),
        ])
        .unwrap()
    }

    fn start(catalog: &ChapterCatalog) -> SessionState {
        SessionState::start(SessionId::generate(), catalog, fixed_now())
    }

    fn status(state: &SessionState, slug: &str) -> ChapterStatus {
        state.chapter(&id(slug)).unwrap().status()
    }

    #[test]
    fn majority_threshold() {
        let t = PassThreshold::Majority;
        assert!(t.passes(QuizScore::new(5, 5)));
        assert!(t.passes(QuizScore::new(3, 5)));
        assert!(!t.passes(QuizScore::new(1, 5)));
        assert!(!t.passes(QuizScore::new(1, 2)));
        assert!(t.passes(QuizScore::new(1, 1)));
        assert!(!t.passes(QuizScore::new(0, 0)));
    }

    #[test]
    fn percent_and_all_thresholds() {
        assert!(PassThreshold::Percent(50).passes(QuizScore::new(1, 2)));
        assert!(!PassThreshold::Percent(80).passes(QuizScore::new(3, 4)));
        assert!(PassThreshold::All.passes(QuizScore::new(4, 4)));
        assert!(!PassThreshold::All.passes(QuizScore::new(3, 4)));
    }

    #[test]
    fn threshold_parses_and_displays() {
        assert_eq!("majority".parse::<PassThreshold>().unwrap(), PassThreshold::Majority);
        assert_eq!(" ALL ".parse::<PassThreshold>().unwrap(), PassThreshold::All);
        assert_eq!(
            "percent:70".parse::<PassThreshold>().unwrap(),
            PassThreshold::Percent(70)
        );
        assert!("percent:0".parse::<PassThreshold>().is_err());
        assert!("percent:101".parse::<PassThreshold>().is_err());
        assert!("most".parse::<PassThreshold>().is_err());
        assert_eq!(PassThreshold::Percent(70).to_string(), "percent:70");
    }

    #[test]
    fn passing_completes_and_unlocks_dependents() {
        let catalog = diamond();
        let mut state = start(&catalog);
        let outcome = Progression::default()
            .submit_quiz(&mut state, &catalog, &id("one"), &[0])
            .unwrap();

        assert!(outcome.passed);
        assert!(outcome.newly_completed);
        assert_eq!(outcome.newly_unlocked, vec![id("two"), id("three")]);
        assert_eq!(status(&state, "one"), ChapterStatus::Completed);
        assert_eq!(status(&state, "four"), ChapterStatus::Locked);
        assert_eq!(state.total_quiz_attempts(), 1);
    }

    #[test]
    fn failing_counts_attempt_without_transition() {
        let catalog = diamond();
        let mut state = start(&catalog);
        let outcome = Progression::default()
            .submit_quiz(&mut state, &catalog, &id("one"), &[2])
            .unwrap();

        assert!(!outcome.passed);
        assert!(outcome.newly_unlocked.is_empty());
        let progress = state.chapter(&id("one")).unwrap();
        assert_eq!(progress.status(), ChapterStatus::Unlocked);
        assert_eq!(progress.quiz_attempts(), 1);
        assert_eq!(progress.best_quiz_score(), Some(QuizScore::new(0, 1)));
    }

    #[test]
    fn one_of_five_does_not_pass() {
        let mut first = draft("only", 1, &[]);
        first.quiz = quiz(&[0, 0, 0, 0, 0]);
        let catalog = ChapterCatalog::from_drafts(vec![first]).unwrap();
        let mut state = start(&catalog);

        let outcome = Progression::default()
            .submit_quiz(&mut state, &catalog, &id("only"), &[0, 1, 1, 1, 1])
            .unwrap();
        assert!(!outcome.passed);
        assert!(!state.chapter(&id("only")).unwrap().is_completed());

        let outcome = Progression::default()
            .submit_quiz(&mut state, &catalog, &id("only"), &[0, 0, 0, 0, 0])
            .unwrap();
        assert!(outcome.passed);
        assert!(state.chapter(&id("only")).unwrap().is_completed());
    }

    #[test]
    fn shared_prerequisites_unlock_in_either_order() {
        let catalog = diamond();
        let progression = Progression::default();

        for order in [["two", "three"], ["three", "two"]] {
            let mut state = start(&catalog);
            progression
                .submit_quiz(&mut state, &catalog, &id("one"), &[0])
                .unwrap();

            let first = progression
                .submit_quiz(&mut state, &catalog, &id(order[0]), &[0])
                .unwrap();
            assert!(first.newly_unlocked.is_empty());
            assert_eq!(status(&state, "four"), ChapterStatus::Locked);

            let second = progression
                .submit_quiz(&mut state, &catalog, &id(order[1]), &[0])
                .unwrap();
            assert_eq!(second.newly_unlocked, vec![id("four")]);
            assert_eq!(status(&state, "four"), ChapterStatus::Unlocked);
        }
    }

    #[test]
    fn resubmission_never_regresses() {
        let catalog = diamond();
        let mut state = start(&catalog);
        let progression = Progression::default();
        progression
            .submit_quiz(&mut state, &catalog, &id("one"), &[0])
            .unwrap();

        let outcome = progression
            .submit_quiz(&mut state, &catalog, &id("one"), &[1])
            .unwrap();
        assert!(!outcome.passed);
        assert!(!outcome.newly_completed);
        assert!(!outcome.best_score_improved);
        assert_eq!(status(&state, "one"), ChapterStatus::Completed);
        assert_eq!(state.chapter(&id("one")).unwrap().quiz_attempts(), 2);

        let again = progression
            .submit_quiz(&mut state, &catalog, &id("one"), &[0])
            .unwrap();
        assert!(again.passed);
        assert!(!again.newly_completed);
        assert!(again.newly_unlocked.is_empty());
    }

    #[test]
    fn invalid_submissions_do_not_mutate() {
        let catalog = diamond();
        let mut state = start(&catalog);
        let before = state.clone();
        let progression = Progression::default();

        let err = progression
            .submit_quiz(&mut state, &catalog, &id("one"), &[0, 0])
            .unwrap_err();
        assert!(matches!(err, ProgressionError::InvalidAnswers { .. }));

        let err = progression
            .submit_quiz(&mut state, &catalog, &id("one"), &[9])
            .unwrap_err();
        assert!(matches!(err, ProgressionError::InvalidAnswers { .. }));

        let err = progression
            .submit_quiz(&mut state, &catalog, &id("ghost"), &[0])
            .unwrap_err();
        assert_eq!(err, ProgressionError::NotFound(id("ghost")));

        let err = progression
            .submit_quiz(&mut state, &catalog, &id("four"), &[0])
            .unwrap_err();
        assert_eq!(err, ProgressionError::Locked(id("four")));

        assert_eq!(state, before);
    }

    mod monotonic {
        use super::*;
        use proptest::prelude::*;

        const SLUGS: [&str; 4] = ["one", "two", "three", "four"];

        proptest! {
            #[test]
            fn statuses_never_regress(
                submissions in prop::collection::vec((0usize..4, 0usize..3), 0..40)
            ) {
                let catalog = diamond();
                let mut state = start(&catalog);
                let progression = Progression::default();
                let mut previous: Vec<ChapterStatus> =
                    SLUGS.iter().map(|s| status(&state, s)).collect();

                for (chapter, answer) in submissions {
                    let _ = progression.submit_quiz(&mut state, &catalog, &id(SLUGS[chapter]), &[answer]);
                    let current: Vec<ChapterStatus> =
                        SLUGS.iter().map(|s| status(&state, s)).collect();
                    for (before, after) in previous.iter().zip(&current) {
                        prop_assert!(after >= before);
                    }
                    for chapter in catalog.chapters() {
                        let progress = state.chapter(chapter.id()).unwrap();
                        if progress.is_completed() {
                            prop_assert!(progress.is_unlocked());
                        }
                        if progress.is_unlocked() {
                            for prerequisite in chapter.prerequisites() {
                                prop_assert!(state.chapter(prerequisite).unwrap().is_completed());
                            }
                        }
                    }
                    previous = current;
                }
            }
        }
    }
}
