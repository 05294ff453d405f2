//! Write-once object storage port.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::{digest::ContentDigest, entities::StoredObjectMetadata};

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// The key already holds bytes with a different fingerprint.
    #[error("object `{key}` already exists with digest {existing}, refusing digest {attempted}")]
    Conflict {
        key: String,
        existing: ContentDigest,
        attempted: ContentDigest,
    },
    #[error("object `{key}` not found")]
    NotFound { key: String },
    #[error("invalid object key `{key}`")]
    InvalidKey { key: String },
    #[error("metadata for object `{key}` is unreadable: {message}")]
    Metadata { key: String, message: String },
    #[error("object store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

impl ObjectStoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ObjectStoreError::Io(_) | ObjectStoreError::Unavailable(_))
    }
}

/// Acknowledgement of a successful `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    /// Same key, same digest: nothing was written.
    Replayed,
}

/// Short-lived reference to stored bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLink {
    pub url: String,
    pub expires_at: OffsetDateTime,
}

/// Backing store offering create-if-absent-or-matching-digest writes.
///
/// Once `put` acknowledges a key, the bytes under it are never replaced or
/// removed through this interface.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        metadata: &StoredObjectMetadata,
    ) -> Result<PutOutcome, ObjectStoreError>;

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;

    /// Metadata attached at write time, `None` when the key is empty.
    async fn head(&self, key: &str) -> Result<Option<StoredObjectMetadata>, ObjectStoreError>;

    /// Issue an access reference to `key` valid until `expires_at`.
    async fn presign(
        &self,
        key: &str,
        expires_at: OffsetDateTime,
    ) -> Result<DownloadLink, ObjectStoreError>;
}
