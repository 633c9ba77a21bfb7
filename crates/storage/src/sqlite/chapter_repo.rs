use chrono::Utc;
use learn_core::model::{Chapter, ChapterId};

use super::SqliteRepository;
use super::mapping::{map_chapter_row, to_json};
use crate::repository::{ChapterRepository, StorageError};

#[async_trait::async_trait]
impl ChapterRepository for SqliteRepository {
    async fn upsert_chapter(&self, chapter: &Chapter) -> Result<(), StorageError> {
        let prerequisites: Vec<&ChapterId> = chapter.prerequisites().iter().collect();

        sqlx::query(
            r"
                INSERT INTO chapters (
                    id, ordinal, title, theory, example_code, starter_code,
                    quiz, prerequisites, estimated_minutes, keywords, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(id) DO UPDATE SET
                    ordinal = excluded.ordinal,
                    title = excluded.title,
                    theory = excluded.theory,
                    example_code = excluded.example_code,
                    starter_code = excluded.starter_code,
                    quiz = excluded.quiz,
                    prerequisites = excluded.prerequisites,
                    estimated_minutes = excluded.estimated_minutes,
                    keywords = excluded.keywords,
                    updated_at = excluded.updated_at
            ",
        )
        .bind(chapter.id().as_str())
        .bind(i64::from(chapter.ordinal()))
        .bind(chapter.title())
        .bind(chapter.theory())
        .bind(chapter.example_code())
        .bind(chapter.starter_code())
        .bind(to_json(chapter.quiz())?)
        .bind(to_json(&prerequisites)?)
        .bind(i64::from(chapter.estimated_minutes()))
        .bind(to_json(chapter.keywords())?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }

    async fn get_chapter(&self, id: &ChapterId) -> Result<Chapter, StorageError> {
        let row = sqlx::query(
            r"
                SELECT
                    id, ordinal, title, theory, example_code, starter_code,
                    quiz, prerequisites, estimated_minutes, keywords
                FROM chapters
                WHERE id = ?1
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?
        .ok_or(StorageError::NotFound)?;

        map_chapter_row(&row)
    }

    async fn list_chapters(&self) -> Result<Vec<Chapter>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT
                    id, ordinal, title, theory, example_code, starter_code,
                    quiz, prerequisites, estimated_minutes, keywords
                FROM chapters
                ORDER BY ordinal ASC, id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        rows.iter().map(map_chapter_row).collect()
    }
}
