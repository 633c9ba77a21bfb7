use learn_core::model::{Chapter, ChapterDraft, ChapterId, QuizDefinition, SessionSnapshot};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(ser)
}

fn from_json<T: DeserializeOwned>(field: &'static str, text: &str) -> Result<T, StorageError> {
    serde_json::from_str(text)
        .map_err(|e| StorageError::Serialization(format!("invalid {field}: {e}")))
}

pub(crate) fn map_chapter_row(row: &sqlx::sqlite::SqliteRow) -> Result<Chapter, StorageError> {
    let id: ChapterId = row
        .try_get::<String, _>("id")
        .map_err(ser)?
        .parse()
        .map_err(ser)?;
    let quiz: QuizDefinition = from_json("quiz", &row.try_get::<String, _>("quiz").map_err(ser)?)?;
    let prerequisites: Vec<ChapterId> = from_json(
        "prerequisites",
        &row.try_get::<String, _>("prerequisites").map_err(ser)?,
    )?;
    let keywords: Vec<String> =
        from_json("keywords", &row.try_get::<String, _>("keywords").map_err(ser)?)?;

    ChapterDraft {
        id,
        ordinal: u32_from_i64("ordinal", row.try_get::<i64, _>("ordinal").map_err(ser)?)?,
        title: row.try_get("title").map_err(ser)?,
        theory: row.try_get("theory").map_err(ser)?,
        example_code: row.try_get("example_code").map_err(ser)?,
        starter_code: row.try_get("starter_code").map_err(ser)?,
        quiz,
        prerequisites,
        estimated_minutes: u32_from_i64(
            "estimated_minutes",
            row.try_get::<i64, _>("estimated_minutes").map_err(ser)?,
        )?,
        keywords,
    }
    .validate()
    .map_err(ser)
}

pub(crate) fn map_snapshot_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<SessionSnapshot, StorageError> {
    let payload: String = row.try_get("payload").map_err(ser)?;
    from_json("snapshot payload", &payload)
}
