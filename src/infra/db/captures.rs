use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::{
        pagination::{CaptureCursor, CursorPage, PageRequest},
        repos::{Admission, CaptureLedger, RecordWrite, RepoError, TimeRange},
    },
    domain::{
        digest::ContentDigest,
        entities::{CaptureFailure, CaptureRecord},
        types::{ArtifactFormat, CaptureStatus, ErrorKind},
    },
};

use super::{
    PostgresRepositories, map_sqlx_error,
    util::{to_i64, to_u64},
};

const CAPTURE_COLUMNS: &str = "id, owner_id, schedule_id, target_url, format, dedupe_key, \
    object_key, digest, size_bytes, status, requested_at, completed_at, duration_ms, \
    error_kind, error_message, attempts, retention_tier, stale_after, updated_at";

/// Admission retries when the conflicting row fails between insert and select.
const ADMIT_MAX_ROUNDS: usize = 5;

#[derive(sqlx::FromRow)]
struct CaptureRow {
    id: Uuid,
    owner_id: String,
    schedule_id: Option<String>,
    target_url: String,
    format: ArtifactFormat,
    dedupe_key: String,
    object_key: Option<String>,
    digest: Option<String>,
    size_bytes: Option<i64>,
    status: CaptureStatus,
    requested_at: OffsetDateTime,
    completed_at: Option<OffsetDateTime>,
    duration_ms: Option<i64>,
    error_kind: Option<String>,
    error_message: Option<String>,
    attempts: i32,
    retention_tier: String,
    stale_after: Option<OffsetDateTime>,
    updated_at: OffsetDateTime,
}

impl TryFrom<CaptureRow> for CaptureRecord {
    type Error = RepoError;

    fn try_from(row: CaptureRow) -> Result<Self, Self::Error> {
        let digest = row
            .digest
            .as_deref()
            .map(ContentDigest::parse)
            .transpose()
            .map_err(|err| RepoError::Integrity {
                message: format!("capture {}: {err}", row.id),
            })?;

        let error = match row.error_kind.as_deref() {
            Some(kind) => {
                let kind = ErrorKind::try_from(kind).map_err(|()| RepoError::Integrity {
                    message: format!("capture {}: unknown error kind `{kind}`", row.id),
                })?;
                Some(CaptureFailure::new(kind, row.error_message.unwrap_or_default()))
            }
            None => None,
        };

        Ok(Self {
            id: row.id,
            owner_id: row.owner_id,
            schedule_id: row.schedule_id,
            target_url: row.target_url,
            format: row.format,
            dedupe_key: row.dedupe_key,
            object_key: row.object_key,
            digest,
            size_bytes: row.size_bytes.map(to_u64).transpose()?,
            status: row.status,
            requested_at: row.requested_at,
            completed_at: row.completed_at,
            duration_ms: row.duration_ms.map(to_u64).transpose()?,
            error,
            attempts: u32::try_from(row.attempts).unwrap_or_default(),
            retention_tier: row.retention_tier,
            stale_after: row.stale_after,
            updated_at: row.updated_at,
        })
    }
}

impl PostgresRepositories {
    async fn fetch_live_by_dedupe_key(
        &self,
        dedupe_key: &str,
    ) -> Result<Option<CaptureRecord>, RepoError> {
        let row = sqlx::query_as::<_, CaptureRow>(&format!(
            "SELECT {CAPTURE_COLUMNS} FROM captures \
             WHERE dedupe_key = $1 AND status <> 'failed'::capture_status"
        ))
        .bind(dedupe_key)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(CaptureRecord::try_from).transpose()
    }

    fn push_time_range(qb: &mut QueryBuilder<'_, Postgres>, range: TimeRange) {
        if let Some(from) = range.from {
            qb.push(" AND requested_at >= ");
            qb.push_bind(from);
        }
        if let Some(to) = range.to {
            qb.push(" AND requested_at < ");
            qb.push_bind(to);
        }
    }
}

#[async_trait]
impl CaptureLedger for PostgresRepositories {
    async fn admit(&self, candidate: CaptureRecord) -> Result<Admission, RepoError> {
        candidate
            .check_invariants()
            .map_err(|err| RepoError::InvalidInput {
                message: err.to_string(),
            })?;

        for _ in 0..ADMIT_MAX_ROUNDS {
            let inserted: Option<Uuid> = sqlx::query_scalar(
                r#"
                INSERT INTO captures (
                    id, owner_id, schedule_id, target_url, format, dedupe_key,
                    status, status_rank, requested_at, attempts, retention_tier,
                    stale_after, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (dedupe_key) WHERE status <> 'failed'::capture_status
                DO NOTHING
                RETURNING id
                "#,
            )
            .bind(candidate.id)
            .bind(&candidate.owner_id)
            .bind(&candidate.schedule_id)
            .bind(&candidate.target_url)
            .bind(candidate.format)
            .bind(&candidate.dedupe_key)
            .bind(candidate.status)
            .bind(candidate.status.rank())
            .bind(candidate.requested_at)
            .bind(i32::try_from(candidate.attempts).unwrap_or(i32::MAX))
            .bind(&candidate.retention_tier)
            .bind(candidate.stale_after)
            .bind(candidate.updated_at)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

            if inserted.is_some() {
                return Ok(Admission::Admitted(candidate));
            }

            if let Some(existing) = self.fetch_live_by_dedupe_key(&candidate.dedupe_key).await? {
                return Ok(Admission::Existing(existing));
            }
        }

        Err(RepoError::Integrity {
            message: format!(
                "dedupe key `{}` kept changing hands during admission",
                candidate.dedupe_key
            ),
        })
    }

    async fn put_record(&self, record: &CaptureRecord) -> Result<RecordWrite, RepoError> {
        let (error_kind, error_message) = match &record.error {
            Some(failure) => (Some(failure.kind.as_str()), Some(failure.message.as_str())),
            None => (None, None),
        };

        let result = sqlx::query(
            r#"
            UPDATE captures
            SET status = $2,
                status_rank = $3,
                object_key = $4,
                digest = $5,
                size_bytes = $6,
                completed_at = $7,
                duration_ms = $8,
                error_kind = $9,
                error_message = $10,
                attempts = $11,
                stale_after = $12,
                updated_at = $13
            WHERE id = $1
              AND status NOT IN ('succeeded'::capture_status, 'failed'::capture_status)
              AND status_rank <= $3
            "#,
        )
        .bind(record.id)
        .bind(record.status)
        .bind(record.status.rank())
        .bind(&record.object_key)
        .bind(record.digest.as_ref().map(ContentDigest::as_str))
        .bind(record.size_bytes.map(to_i64))
        .bind(record.completed_at)
        .bind(record.duration_ms.map(to_i64))
        .bind(error_kind)
        .bind(error_message)
        .bind(i32::try_from(record.attempts).unwrap_or(i32::MAX))
        .bind(record.stale_after)
        .bind(record.updated_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 1 {
            return Ok(RecordWrite::Written);
        }

        match self.get_record(record.id).await? {
            Some(current) => Ok(RecordWrite::Superseded(current)),
            None => Err(RepoError::NotFound),
        }
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<CaptureRecord>, RepoError> {
        let row = sqlx::query_as::<_, CaptureRow>(&format!(
            "SELECT {CAPTURE_COLUMNS} FROM captures WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(CaptureRecord::try_from).transpose()
    }

    async fn list_by_owner(
        &self,
        owner_id: &str,
        range: TimeRange,
        page: PageRequest<CaptureCursor>,
    ) -> Result<CursorPage<CaptureRecord>, RepoError> {
        let limit = page.limit.max(1) as usize;
        let mut qb = QueryBuilder::new(format!(
            "SELECT {CAPTURE_COLUMNS} FROM captures WHERE owner_id = "
        ));
        qb.push_bind(owner_id);
        Self::push_time_range(&mut qb, range);

        if let Some(cursor) = page.cursor {
            qb.push(" AND (requested_at, id) < (");
            qb.push_bind(cursor.requested_at());
            qb.push(", ");
            qb.push_bind(cursor.id());
            qb.push(")");
        }

        qb.push(" ORDER BY requested_at DESC, id DESC LIMIT ");
        qb.push_bind((limit + 1) as i64);

        let rows = qb
            .build_query_as::<CaptureRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let mut items = rows
            .into_iter()
            .map(CaptureRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items
                .last()
                .map(|last| CaptureCursor::new(last.requested_at, last.id).encode())
                .transpose()?
        } else {
            None
        };

        Ok(CursorPage::new(items, next_cursor))
    }

    async fn find_by_digest(
        &self,
        owner_id: &str,
        digest: &ContentDigest,
    ) -> Result<Vec<CaptureRecord>, RepoError> {
        let rows = sqlx::query_as::<_, CaptureRow>(&format!(
            "SELECT {CAPTURE_COLUMNS} FROM captures \
             WHERE owner_id = $1 AND digest = $2 AND status = 'succeeded'::capture_status \
             ORDER BY requested_at DESC, id DESC"
        ))
        .bind(owner_id)
        .bind(digest.as_str())
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(CaptureRecord::try_from).collect()
    }

    async fn list_stale(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<CaptureRecord>, RepoError> {
        let rows = sqlx::query_as::<_, CaptureRow>(&format!(
            "SELECT {CAPTURE_COLUMNS} FROM captures \
             WHERE stale_after IS NOT NULL AND stale_after <= $1 \
               AND status NOT IN ('succeeded'::capture_status, 'failed'::capture_status) \
             ORDER BY stale_after ASC, id ASC \
             LIMIT $2"
        ))
        .bind(now)
        .bind(i64::from(limit.clamp(1, 1_000)))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(CaptureRecord::try_from).collect()
    }
}
