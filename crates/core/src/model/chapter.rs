use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::ChapterId;
use crate::model::quiz::{QuizDefinition, QuizError};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChapterError {
    #[error("chapter {id}: title cannot be empty")]
    EmptyTitle { id: ChapterId },

    #[error("chapter {id}: theory text cannot be empty")]
    EmptyTheory { id: ChapterId },

    #[error("chapter {id}: ordinal must be >= 1")]
    InvalidOrdinal { id: ChapterId },

    #[error("chapter {id} lists itself as a prerequisite")]
    SelfPrerequisite { id: ChapterId },

    #[error("chapter {id}: invalid quiz: {source}")]
    Quiz {
        id: ChapterId,
        #[source]
        source: QuizError,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CatalogError {
    #[error("catalog contains no chapters")]
    Empty,

    #[error("duplicate chapter id: {0}")]
    DuplicateId(ChapterId),

    #[error("duplicate ordinal {ordinal} ({first} and {second})")]
    DuplicateOrdinal {
        ordinal: u32,
        first: ChapterId,
        second: ChapterId,
    },

    #[error("chapter {chapter} requires unknown chapter {missing}")]
    UnknownPrerequisite {
        chapter: ChapterId,
        missing: ChapterId,
    },

    #[error("chapter {chapter} requires {prerequisite}, which does not come before it")]
    PrerequisiteOrder {
        chapter: ChapterId,
        prerequisite: ChapterId,
    },

    #[error(transparent)]
    Chapter(#[from] ChapterError),
}

//
// ─── DRAFT ─────────────────────────────────────────────────────────────────────
//

/// Unvalidated chapter as authored in a catalog file or database row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterDraft {
    pub id: ChapterId,
    pub ordinal: u32,
    pub title: String,
    pub theory: String,
    pub example_code: String,
    #[serde(default)]
    pub starter_code: String,
    pub quiz: QuizDefinition,
    #[serde(default)]
    pub prerequisites: Vec<ChapterId>,
    #[serde(default = "default_estimated_minutes")]
    pub estimated_minutes: u32,
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn default_estimated_minutes() -> u32 {
    10
}

impl ChapterDraft {
    /// Validates the draft into an immutable `Chapter`.
    ///
    /// # Errors
    ///
    /// Returns `ChapterError` for blank title/theory, a zero ordinal or a
    /// self-referencing prerequisite.
    pub fn validate(self) -> Result<Chapter, ChapterError> {
        if self.title.trim().is_empty() {
            return Err(ChapterError::EmptyTitle { id: self.id });
        }
        if self.theory.trim().is_empty() {
            return Err(ChapterError::EmptyTheory { id: self.id });
        }
        if self.ordinal == 0 {
            return Err(ChapterError::InvalidOrdinal { id: self.id });
        }
        if self.prerequisites.contains(&self.id) {
            return Err(ChapterError::SelfPrerequisite { id: self.id });
        }

        let prerequisites: BTreeSet<ChapterId> = self.prerequisites.into_iter().collect();
        let keywords = self
            .keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        Ok(Chapter {
            id: self.id,
            ordinal: self.ordinal,
            title: self.title.trim().to_owned(),
            theory: self.theory.trim().to_owned(),
            example_code: self.example_code,
            starter_code: self.starter_code,
            quiz: self.quiz,
            prerequisites,
            estimated_minutes: self.estimated_minutes,
            keywords,
        })
    }
}

//
// ─── CHAPTER ───────────────────────────────────────────────────────────────────
//

/// One unit of instructional content. Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chapter {
    id: ChapterId,
    ordinal: u32,
    title: String,
    theory: String,
    example_code: String,
    starter_code: String,
    quiz: QuizDefinition,
    prerequisites: BTreeSet<ChapterId>,
    estimated_minutes: u32,
    keywords: Vec<String>,
}

impl Chapter {
    #[must_use]
    pub fn id(&self) -> &ChapterId {
        &self.id
    }

    /// 1-based position in the course.
    #[must_use]
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn theory(&self) -> &str {
        &self.theory
    }

    #[must_use]
    pub fn example_code(&self) -> &str {
        &self.example_code
    }

    /// Initial content of the editable code box.
    #[must_use]
    pub fn starter_code(&self) -> &str {
        &self.starter_code
    }

    #[must_use]
    pub fn quiz(&self) -> &QuizDefinition {
        &self.quiz
    }

    #[must_use]
    pub fn prerequisites(&self) -> &BTreeSet<ChapterId> {
        &self.prerequisites
    }

    #[must_use]
    pub fn estimated_minutes(&self) -> u32 {
        self.estimated_minutes
    }

    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Converts back into a draft, e.g. for persistence.
    #[must_use]
    pub fn to_draft(&self) -> ChapterDraft {
        ChapterDraft {
            id: self.id.clone(),
            ordinal: self.ordinal,
            title: self.title.clone(),
            theory: self.theory.clone(),
            example_code: self.example_code.clone(),
            starter_code: self.starter_code.clone(),
            quiz: self.quiz.clone(),
            prerequisites: self.prerequisites.iter().cloned().collect(),
            estimated_minutes: self.estimated_minutes,
            keywords: self.keywords.clone(),
        }
    }
}

//
// ─── CATALOG ───────────────────────────────────────────────────────────────────
//

/// The ordered, validated set of chapters a session runs against.
///
/// Prerequisites must point at chapters with a lower ordinal, which keeps the
/// prerequisite graph acyclic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterCatalog {
    chapters: Vec<Chapter>,
    index: HashMap<ChapterId, usize>,
}

impl ChapterCatalog {
    /// # Errors
    ///
    /// Returns `CatalogError` for an empty list, duplicate ids or ordinals, or
    /// prerequisites that are unknown or not earlier in the course.
    pub fn new(mut chapters: Vec<Chapter>) -> Result<Self, CatalogError> {
        if chapters.is_empty() {
            return Err(CatalogError::Empty);
        }
        chapters.sort_by_key(Chapter::ordinal);

        let mut index = HashMap::with_capacity(chapters.len());
        for (pos, chapter) in chapters.iter().enumerate() {
            if index.insert(chapter.id.clone(), pos).is_some() {
                return Err(CatalogError::DuplicateId(chapter.id.clone()));
            }
            if pos > 0 && chapters[pos - 1].ordinal == chapter.ordinal {
                return Err(CatalogError::DuplicateOrdinal {
                    ordinal: chapter.ordinal,
                    first: chapters[pos - 1].id.clone(),
                    second: chapter.id.clone(),
                });
            }
        }

        for (pos, chapter) in chapters.iter().enumerate() {
            for prerequisite in &chapter.prerequisites {
                match index.get(prerequisite) {
                    None => {
                        return Err(CatalogError::UnknownPrerequisite {
                            chapter: chapter.id.clone(),
                            missing: prerequisite.clone(),
                        });
                    }
                    Some(&p) if p >= pos => {
                        return Err(CatalogError::PrerequisiteOrder {
                            chapter: chapter.id.clone(),
                            prerequisite: prerequisite.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(Self { chapters, index })
    }

    /// Validates drafts and builds a catalog in one step.
    ///
    /// # Errors
    ///
    /// Returns the first `ChapterError` or `CatalogError` encountered.
    pub fn from_drafts(drafts: Vec<ChapterDraft>) -> Result<Self, CatalogError> {
        let chapters = drafts
            .into_iter()
            .map(ChapterDraft::validate)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(chapters)
    }

    #[must_use]
    pub fn get(&self, id: &ChapterId) -> Option<&Chapter> {
        self.index.get(id).map(|&pos| &self.chapters[pos])
    }

    #[must_use]
    pub fn contains(&self, id: &ChapterId) -> bool {
        self.index.contains_key(id)
    }

    /// Zero-based position of `id` in ordinal order.
    #[must_use]
    pub fn position(&self, id: &ChapterId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Chapters in ordinal order.
    #[must_use]
    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    #[must_use]
    pub fn first(&self) -> &Chapter {
        &self.chapters[0]
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
    pub fn next_after(&self, id: &ChapterId) -> Option<&Chapter> {
        self.position(id).and_then(|pos| self.chapters.get(pos + 1))
    }

    #[must_use]
    pub fn previous_before(&self, id: &ChapterId) -> Option<&Chapter> {
        self.position(id)
            .and_then(|pos| pos.checked_sub(1))
            .map(|pos| &self.chapters[pos])
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::quiz::{Difficulty, QuizQuestion};

    pub(crate) fn id(s: &str) -> ChapterId {
        ChapterId::new(s).unwrap()
    }

    pub(crate) fn quiz(correct: &[usize]) -> QuizDefinition {
        let questions = correct
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                QuizQuestion::new(
                    i,
                    format!("Question {i}"),
                    vec!["a".into(), "b".into(), "c".into()],
                    c,
                    "because",
                    Difficulty::Beginner,
                )
                .unwrap()
            })
            .collect();
        QuizDefinition::new(questions).unwrap()
    }

    pub(crate) fn draft(slug: &str, ordinal: u32, prerequisites: &[&str]) -> ChapterDraft {
        ChapterDraft {
            id: id(slug),
            ordinal,
            title: format!("Chapter {ordinal}"),
            theory: "Some theory.".into(),
            example_code: "print(1)".into(),
            starter_code: "print(2)".into(),
            quiz: quiz(&[0]),
            prerequisites: prerequisites.iter().map(|p| id(p)).collect(),
            estimated_minutes: 10,
            keywords: vec![" Python ".into(), String::new()],
        }
    }

    #[test]
    fn draft_validation_normalizes_keywords() {
        let chapter = draft("intro", 1, &[]).validate().unwrap();
        assert_eq!(chapter.keywords(), &["python".to_string()]);
        assert!(chapter.prerequisites().is_empty());
    }

    #[test]
    fn draft_rejects_self_prerequisite() {
        let err = draft("intro", 1, &["intro"]).validate().unwrap_err();
        assert!(matches!(err, ChapterError::SelfPrerequisite { .. }));
    }

    #[test]
    fn draft_rejects_blank_title() {
        let mut d = draft("intro", 1, &[]);
        d.title = "  ".into();
        assert!(matches!(
            d.validate().unwrap_err(),
            ChapterError::EmptyTitle { .. }
        ));
    }

    #[test]
    fn catalog_sorts_by_ordinal() {
        let catalog = ChapterCatalog::from_drafts(vec![
            draft("second", 2, &["first"]),
            draft("first", 1, &[]),
        ])
        .unwrap();
        assert_eq!(catalog.first().id(), &id("first"));
        assert_eq!(catalog.position(&id("second")), Some(1));
        assert_eq!(catalog.next_after(&id("first")).unwrap().id(), &id("second"));
        assert!(catalog.previous_before(&id("first")).is_none());
    }

    #[test]
    fn catalog_rejects_duplicates() {
        let err = ChapterCatalog::from_drafts(vec![draft("a", 1, &[]), draft("a", 2, &[])])
            .unwrap_err();
        assert_eq!(err, CatalogError::DuplicateId(id("a")));

        let err = ChapterCatalog::from_drafts(vec![draft("a", 1, &[]), draft("b", 1, &[])])
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateOrdinal { ordinal: 1, .. }));
    }

    #[test]
    fn catalog_rejects_unknown_or_later_prerequisites() {
        let err = ChapterCatalog::from_drafts(vec![draft("a", 1, &["ghost"])]).unwrap_err();
        assert!(matches!(err, CatalogError::UnknownPrerequisite { .. }));

        let err = ChapterCatalog::from_drafts(vec![draft("a", 1, &["b"]), draft("b", 2, &[])])
            .unwrap_err();
        assert!(matches!(err, CatalogError::PrerequisiteOrder { .. }));
    }

    #[test]
    fn empty_catalog_is_rejected() {
        assert_eq!(ChapterCatalog::new(Vec::new()), Err(CatalogError::Empty));
    }
}
