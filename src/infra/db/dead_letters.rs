use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{DeadLetterRepo, RepoError},
    domain::{entities::DeadLetter, types::ErrorKind},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    id: Uuid,
    capture_id: Uuid,
    owner_id: String,
    target_url: String,
    kind: String,
    message: String,
    attempts: i32,
    failed_at: OffsetDateTime,
}

impl TryFrom<DeadLetterRow> for DeadLetter {
    type Error = RepoError;

    fn try_from(row: DeadLetterRow) -> Result<Self, Self::Error> {
        let kind = ErrorKind::try_from(row.kind.as_str()).map_err(|()| RepoError::Integrity {
            message: format!("dead letter {}: unknown error kind `{}`", row.id, row.kind),
        })?;
        Ok(Self {
            id: row.id,
            capture_id: row.capture_id,
            owner_id: row.owner_id,
            target_url: row.target_url,
            kind,
            message: row.message,
            attempts: u32::try_from(row.attempts).unwrap_or_default(),
            failed_at: row.failed_at,
        })
    }
}

#[async_trait]
impl DeadLetterRepo for PostgresRepositories {
    async fn push(&self, letter: &DeadLetter) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO capture_dead_letters
                (id, capture_id, owner_id, target_url, kind, message, attempts, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(letter.id)
        .bind(letter.capture_id)
        .bind(&letter.owner_id)
        .bind(&letter.target_url)
        .bind(letter.kind.as_str())
        .bind(&letter.message)
        .bind(i32::try_from(letter.attempts).unwrap_or(i32::MAX))
        .bind(letter.failed_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<DeadLetter>, RepoError> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(
            r#"
            SELECT id, capture_id, owner_id, target_url, kind, message, attempts, failed_at
            FROM capture_dead_letters
            ORDER BY failed_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit.clamp(1, 200)))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(DeadLetter::try_from).collect()
    }
}
