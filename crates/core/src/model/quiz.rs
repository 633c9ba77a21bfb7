use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuizError {
    #[error("quiz must contain at least one question")]
    NoQuestions,

    #[error("question {index} has an empty prompt")]
    EmptyPrompt { index: usize },

    #[error("question {index} needs at least two options, got {got}")]
    TooFewOptions { index: usize, got: usize },

    #[error("question {index} has an empty option")]
    EmptyOption { index: usize },

    #[error("question {index}: correct option {correct} is out of range ({options} options)")]
    CorrectOutOfRange {
        index: usize,
        correct: usize,
        options: usize,
    },

    #[error("expected {expected} answers, got {got}")]
    AnswerCountMismatch { expected: usize, got: usize },

    #[error("answer for question {index} selects unknown option {option}")]
    UnknownOption { index: usize, option: usize },
}

//
// ─── QUESTIONS ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

/// One multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawQuestion", into = "RawQuestion")]
pub struct QuizQuestion {
    prompt: String,
    options: Vec<String>,
    correct_index: usize,
    explanation: String,
    difficulty: Difficulty,
}

#[derive(Serialize, Deserialize)]
struct RawQuestion {
    prompt: String,
    options: Vec<String>,
    correct_index: usize,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    difficulty: Difficulty,
}

impl QuizQuestion {
    /// Builds a question, checking prompt, options and the correct index.
    ///
    /// `index` only feeds error messages.
    ///
    /// # Errors
    ///
    /// Returns `QuizError` if the prompt is blank, there are fewer than two options,
    /// an option is blank, or `correct_index` does not point at an option.
    pub fn new(
        index: usize,
        prompt: impl Into<String>,
        options: Vec<String>,
        correct_index: usize,
        explanation: impl Into<String>,
        difficulty: Difficulty,
    ) -> Result<Self, QuizError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(QuizError::EmptyPrompt { index });
        }
        if options.len() < 2 {
            return Err(QuizError::TooFewOptions {
                index,
                got: options.len(),
            });
        }
        if options.iter().any(|o| o.trim().is_empty()) {
            return Err(QuizError::EmptyOption { index });
        }
        if correct_index >= options.len() {
            return Err(QuizError::CorrectOutOfRange {
                index,
                correct: correct_index,
                options: options.len(),
            });
        }

        Ok(Self {
            prompt: prompt.trim().to_owned(),
            options,
            correct_index,
            explanation: explanation.into().trim().to_owned(),
            difficulty,
        })
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    #[must_use]
    pub fn correct_index(&self) -> usize {
        self.correct_index
    }

    #[must_use]
    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    #[must_use]
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }
}

impl TryFrom<RawQuestion> for QuizQuestion {
    type Error = QuizError;

    fn try_from(raw: RawQuestion) -> Result<Self, Self::Error> {
        Self::new(
            0,
            raw.prompt,
            raw.options,
            raw.correct_index,
            raw.explanation,
            raw.difficulty,
        )
    }
}

impl From<QuizQuestion> for RawQuestion {
    fn from(q: QuizQuestion) -> Self {
        Self {
            prompt: q.prompt,
            options: q.options,
            correct_index: q.correct_index,
            explanation: q.explanation,
            difficulty: q.difficulty,
        }
    }
}

//
// ─── QUIZ ──────────────────────────────────────────────────────────────────────
//

/// Ordered, non-empty list of questions closing a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<QuizQuestion>", into = "Vec<QuizQuestion>")]
pub struct QuizDefinition {
    questions: Vec<QuizQuestion>,
}

impl QuizDefinition {
    /// # Errors
    ///
    /// Returns `QuizError::NoQuestions` if `questions` is empty.
    pub fn new(questions: Vec<QuizQuestion>) -> Result<Self, QuizError> {
        if questions.is_empty() {
            return Err(QuizError::NoQuestions);
        }
        Ok(Self { questions })
    }

    #[must_use]
    pub fn questions(&self) -> &[QuizQuestion] {
        &self.questions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Checks that `answers` holds one in-range option index per question.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::AnswerCountMismatch` or `QuizError::UnknownOption`.
    pub fn validate_answers(&self, answers: &[usize]) -> Result<(), QuizError> {
        if answers.len() != self.questions.len() {
            return Err(QuizError::AnswerCountMismatch {
                expected: self.questions.len(),
                got: answers.len(),
            });
        }
        for (index, (question, &option)) in self.questions.iter().zip(answers).enumerate() {
            if option >= question.options.len() {
                return Err(QuizError::UnknownOption { index, option });
            }
        }
        Ok(())
    }

    /// Grades a submission.
    ///
    /// # Errors
    ///
    /// Same as [`QuizDefinition::validate_answers`].
    pub fn grade(&self, answers: &[usize]) -> Result<GradedQuiz, QuizError> {
        self.validate_answers(answers)?;

        let feedback: Vec<QuestionFeedback> = self
            .questions
            .iter()
            .zip(answers)
            .map(|(question, &chosen)| QuestionFeedback {
                chosen,
                correct_index: question.correct_index,
                is_correct: chosen == question.correct_index,
                explanation: question.explanation.clone(),
            })
            .collect();

        let correct = feedback.iter().filter(|f| f.is_correct).count();
        let score = QuizScore::new(to_u32(correct), to_u32(self.questions.len()));
        Ok(GradedQuiz { score, feedback })
    }
}

impl TryFrom<Vec<QuizQuestion>> for QuizDefinition {
    type Error = QuizError;

    fn try_from(questions: Vec<QuizQuestion>) -> Result<Self, Self::Error> {
        Self::new(questions)
    }
}

impl From<QuizDefinition> for Vec<QuizQuestion> {
    fn from(quiz: QuizDefinition) -> Self {
        quiz.questions
    }
}

fn to_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

//
// ─── SCORING ───────────────────────────────────────────────────────────────────
//

/// `correct` out of `total` questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizScore {
    pub correct: u32,
    pub total: u32,
}

impl QuizScore {
    #[must_use]
    pub fn new(correct: u32, total: u32) -> Self {
        Self {
            correct: correct.min(total),
            total,
        }
    }

    /// Compares two scores by their ratio, independent of quiz length.
    #[must_use]
    pub fn ratio_cmp(&self, other: &Self) -> Ordering {
        let lhs = u64::from(self.correct) * u64::from(other.total);
        let rhs = u64::from(other.correct) * u64::from(self.total);
        lhs.cmp(&rhs)
    }

    #[must_use]
    pub fn is_better_than(&self, other: &Self) -> bool {
        self.ratio_cmp(other) == Ordering::Greater
    }

    /// Whole-number percentage, rounded down.
    #[must_use]
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        let pct = u64::from(self.correct) * 100 / u64::from(self.total);
        u32::try_from(pct).unwrap_or(100)
    }
}

/// Per-question result shown back to the learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionFeedback {
    pub chosen: usize,
    pub correct_index: usize,
    pub is_correct: bool,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradedQuiz {
    pub score: QuizScore,
    pub feedback: Vec<QuestionFeedback>,
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn question(correct: usize) -> QuizQuestion {
        QuizQuestion::new(
            0,
            "What is 17 % 5?",
            vec!["3.4".into(), "2".into(), "3".into()],
            correct,
            "Remainder of the division.",
            Difficulty::Beginner,
        )
        .unwrap()
    }

    #[test]
    fn question_rejects_out_of_range_correct_index() {
        let err = QuizQuestion::new(
            2,
            "Q",
            vec!["a".into(), "b".into()],
            2,
            "",
            Difficulty::Beginner,
        )
        .unwrap_err();
        assert!(matches!(err, QuizError::CorrectOutOfRange { index: 2, .. }));
    }

    #[test]
    fn question_needs_two_options() {
        let err =
            QuizQuestion::new(0, "Q", vec!["a".into()], 0, "", Difficulty::Beginner).unwrap_err();
        assert_eq!(err, QuizError::TooFewOptions { index: 0, got: 1 });
    }

    #[test]
    fn empty_quiz_is_rejected() {
        assert_eq!(QuizDefinition::new(Vec::new()), Err(QuizError::NoQuestions));
    }

    #[test]
    fn grade_counts_correct_answers() {
        let quiz = QuizDefinition::new(vec![question(1), question(0), question(2)]).unwrap();
        let graded = quiz.grade(&[1, 1, 2]).unwrap();
        assert_eq!(graded.score, QuizScore::new(2, 3));
        assert!(graded.feedback[0].is_correct);
        assert!(!graded.feedback[1].is_correct);
        assert_eq!(graded.feedback[1].correct_index, 0);
    }

    #[test]
    fn grade_rejects_wrong_answer_count() {
        let quiz = QuizDefinition::new(vec![question(1), question(0)]).unwrap();
        let err = quiz.grade(&[1]).unwrap_err();
        assert_eq!(err, QuizError::AnswerCountMismatch { expected: 2, got: 1 });
    }

    #[test]
    fn grade_rejects_unknown_option() {
        let quiz = QuizDefinition::new(vec![question(1)]).unwrap();
        let err = quiz.grade(&[7]).unwrap_err();
        assert_eq!(err, QuizError::UnknownOption { index: 0, option: 7 });
    }

    #[test]
    fn score_ratio_ignores_quiz_length() {
        let half = QuizScore::new(1, 2);
        let two_quarters = QuizScore::new(2, 4);
        assert_eq!(half.ratio_cmp(&two_quarters), Ordering::Equal);
        assert!(QuizScore::new(3, 4).is_better_than(&half));
        assert_eq!(QuizScore::new(2, 3).percent(), 66);
    }

    #[test]
    fn question_deserialization_validates() {
        let json = r#"{"prompt":"Q","options":["a","b"],"correct_index":5}"#;
        assert!(serde_json::from_str::<QuizQuestion>(json).is_err());

        let json = r#"{"prompt":"Q","options":["a","b"],"correct_index":1}"#;
        let q: QuizQuestion = serde_json::from_str(json).unwrap();
        assert_eq!(q.difficulty(), Difficulty::Beginner);
        assert_eq!(q.explanation(), "");
    }
}
