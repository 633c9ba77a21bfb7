//! Chapter catalogs authored as JSON.
//!
//! A catalog file is a JSON array of chapter drafts. Quiz questions, prerequisites and
//! keywords are nested inside each draft.

use learn_core::model::{CatalogError, ChapterCatalog, ChapterDraft};
use thiserror::Error;

/// The five-chapter introductory Python course shipped with the crate.
pub const BUNDLED_COURSE_JSON: &str = include_str!("../content/python_course.json");

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogLoadError {
    #[error("catalog is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] CatalogError),
}

/// Parses and validates a catalog from its JSON text.
///
/// # Errors
///
/// Returns `CatalogLoadError::Json` for malformed JSON or drafts that fail field-level
/// checks during decoding (for example a question whose correct index is out of range),
/// and `CatalogLoadError::Invalid` when the chapters do not form a valid course.
pub fn catalog_from_json(json: &str) -> Result<ChapterCatalog, CatalogLoadError> {
    let drafts: Vec<ChapterDraft> = serde_json::from_str(json)?;
    Ok(ChapterCatalog::from_drafts(drafts)?)
}

/// The bundled course as a validated catalog.
///
/// # Errors
///
/// Only fails if the embedded course file is broken.
pub fn bundled_catalog() -> Result<ChapterCatalog, CatalogLoadError> {
    catalog_from_json(BUNDLED_COURSE_JSON)
}

#[cfg(test)]
mod tests {
    use super::*;
    use learn_core::model::ChapterId;

    #[test]
    fn bundled_course_is_linear() {
        let catalog = bundled_catalog().unwrap();
        let ids: Vec<&str> = catalog.chapters().iter().map(|c| c.id().as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "python_intro",
                "variables_datatypes",
                "operations",
                "lists_collections",
                "control_flow",
            ]
        );
        assert!(catalog.first().prerequisites().is_empty());
        for pair in catalog.chapters().windows(2) {
            assert_eq!(pair[1].prerequisites().len(), 1);
            assert!(pair[1].prerequisites().contains(pair[0].id()));
        }
    }

    #[test]
    fn every_bundled_chapter_has_a_quiz_and_starter_code() {
        let catalog = bundled_catalog().unwrap();
        for chapter in catalog.chapters() {
            assert!(chapter.quiz().len() >= 3, "{}", chapter.id());
            assert!(!chapter.starter_code().trim().is_empty(), "{}", chapter.id());
            assert!(!chapter.keywords().is_empty(), "{}", chapter.id());
            assert!(chapter.estimated_minutes() > 0);
        }
    }

    #[test]
    fn custom_catalog_fills_defaults() {
        let json = r#"[
            {
                "id": "only",
                "ordinal": 1,
                "title": "Only chapter",
                "theory": "Some text.",
                "example_code": "print(1)",
                "quiz": [
                    {"prompt": "1 + 1?", "options": ["1", "2"], "correct_index": 1}
                ]
            }
        ]"#;
        let catalog = catalog_from_json(json).unwrap();
        assert_eq!(catalog.len(), 1);
        let chapter = catalog.get(&ChapterId::new("only").unwrap()).unwrap();
        assert_eq!(chapter.estimated_minutes(), 10);
        assert!(chapter.starter_code().is_empty());
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(
            catalog_from_json("[{"),
            Err(CatalogLoadError::Json(_))
        ));
    }

    #[test]
    fn unknown_prerequisite_is_rejected() {
        let json = r#"[
            {
                "id": "second",
                "ordinal": 2,
                "title": "Second",
                "theory": "Text.",
                "example_code": "",
                "quiz": [{"prompt": "?", "options": ["a", "b"], "correct_index": 0}],
                "prerequisites": ["first"]
            }
        ]"#;
        assert!(matches!(
            catalog_from_json(json),
            Err(CatalogLoadError::Invalid(
                CatalogError::UnknownPrerequisite { .. }
            ))
        ));
    }

    #[test]
    fn empty_catalog_is_rejected() {
        assert!(matches!(
            catalog_from_json("[]"),
            Err(CatalogLoadError::Invalid(CatalogError::Empty))
        ));
    }
}
