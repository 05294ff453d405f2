use sqlx::error::ErrorKind;

use crate::application::repos::RepoError;

/// `query_canceled`, raised when `statement_timeout` fires.
const SQLSTATE_QUERY_CANCELED: &str = "57014";
/// `invalid_text_representation`, e.g. a status string the enum cast rejects.
const SQLSTATE_INVALID_TEXT: &str = "22P02";

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        sqlx::Error::Database(db) => {
            let code = db.code();
            match db.kind() {
                ErrorKind::UniqueViolation => RepoError::Duplicate {
                    constraint: db.constraint().unwrap_or("unknown").to_string(),
                },
                ErrorKind::ForeignKeyViolation => RepoError::InvalidInput {
                    message: db.message().to_string(),
                },
                ErrorKind::NotNullViolation | ErrorKind::CheckViolation => {
                    RepoError::Integrity {
                        message: db.message().to_string(),
                    }
                }
                _ if code.as_deref() == Some(SQLSTATE_QUERY_CANCELED) => RepoError::Timeout,
                _ if code.as_deref() == Some(SQLSTATE_INVALID_TEXT) => RepoError::InvalidInput {
                    message: db.message().to_string(),
                },
                _ => RepoError::from_persistence(db.message()),
            }
        }
        other => RepoError::from_persistence(other),
    }
}

/// Postgres has no unsigned integers; counters are stored as `BIGINT`.
pub fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub fn to_u64(value: i64) -> Result<u64, RepoError> {
    u64::try_from(value).map_err(|_| RepoError::Integrity {
        message: format!("negative value {value} in unsigned column"),
    })
}
