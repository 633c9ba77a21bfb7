use chrono::Utc;
use learn_core::model::{SessionId, SessionSnapshot};

use super::SqliteRepository;
use super::mapping::{map_snapshot_row, to_json};
use crate::repository::{SnapshotRepository, StorageError};

#[async_trait::async_trait]
impl SnapshotRepository for SqliteRepository {
    async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<(), StorageError> {
        let payload = to_json(snapshot)?;

        sqlx::query(
            r"
                INSERT INTO session_snapshots (
                    session_id, version, current_chapter, payload, saved_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(session_id) DO UPDATE SET
                    version = excluded.version,
                    current_chapter = excluded.current_chapter,
                    payload = excluded.payload,
                    saved_at = excluded.saved_at
            ",
        )
        .bind(snapshot.session_id.to_string())
        .bind(i64::from(snapshot.version))
        .bind(snapshot.current_chapter.as_str())
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }

    async fn load_snapshot(&self, id: SessionId) -> Result<SessionSnapshot, StorageError> {
        let row = sqlx::query(
            r"
                SELECT payload
                FROM session_snapshots
                WHERE session_id = ?1
            ",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?
        .ok_or(StorageError::NotFound)?;

        map_snapshot_row(&row)
    }

    async fn list_snapshots(&self, limit: u32) -> Result<Vec<SessionSnapshot>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT payload
                FROM session_snapshots
                ORDER BY saved_at DESC, session_id ASC
                LIMIT ?1
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        rows.iter().map(map_snapshot_row).collect()
    }
}
