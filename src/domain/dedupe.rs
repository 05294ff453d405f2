//! Deduplication key derivation.
//!
//! A key is a pure function of the owner, the artifact format and either a
//! caller-supplied request id or the normalized target URL plus the time
//! bucket the request falls into. Every call site goes through
//! [`DedupeKey::derive`]; nothing else concatenates key material.

use std::fmt;
use std::num::NonZeroU64;

use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use url::Url;

use crate::domain::{error::DomainError, types::ArtifactFormat};

/// Longest caller-supplied request id accepted.
pub const MAX_REQUEST_ID_LEN: usize = 128;

/// Default bucket width: one calendar day (UTC).
pub const DEFAULT_BUCKET_SECONDS: u64 = 86_400;

/// Parse and canonicalize a capture target.
///
/// Only absolute `http`/`https` URLs with a host are accepted. Scheme and
/// host are lowercased, default ports dropped, and the fragment removed;
/// path and query are kept verbatim because they select page content.
pub fn normalize_target_url(raw: &str) -> Result<Url, DomainError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("target url must not be empty"));
    }

    let mut url = Url::parse(trimmed)
        .map_err(|err| DomainError::validation(format!("malformed target url: {err}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(DomainError::validation(format!(
            "unsupported url scheme `{}`",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(DomainError::validation("target url must include a host"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(DomainError::validation(
            "target url must not embed credentials",
        ));
    }

    url.set_fragment(None);
    Ok(url)
}

/// Width of the coarse time window inside which equal targets dedupe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketWidth(NonZeroU64);

impl BucketWidth {
    pub fn from_seconds(seconds: NonZeroU64) -> Self {
        Self(seconds)
    }

    pub fn seconds(self) -> u64 {
        self.0.get()
    }

    /// Start of the bucket containing `at`, in unix seconds.
    pub fn bucket_start(self, at: OffsetDateTime) -> i64 {
        let width = i64::try_from(self.0.get()).unwrap_or(i64::MAX);
        at.unix_timestamp().div_euclid(width) * width
    }
}

impl Default for BucketWidth {
    fn default() -> Self {
        Self(NonZeroU64::new(DEFAULT_BUCKET_SECONDS).unwrap_or(NonZeroU64::MIN))
    }
}

/// Identity of an intended capture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupeKey(String);

/// Inputs to [`DedupeKey::derive`].
#[derive(Debug, Clone, Copy)]
pub struct DedupeInput<'a> {
    pub owner_id: &'a str,
    pub format: ArtifactFormat,
    pub target: &'a Url,
    pub request_id: Option<&'a str>,
    pub requested_at: OffsetDateTime,
}

impl DedupeKey {
    /// Derive the key. An explicit request id wins over URL bucketing.
    pub fn derive(input: DedupeInput<'_>, width: BucketWidth) -> Result<Self, DomainError> {
        if input.owner_id.trim().is_empty() {
            return Err(DomainError::validation("owner id must not be empty"));
        }

        let request_id = match input.request_id.map(str::trim) {
            Some("") | None => None,
            Some(id) if id.len() > MAX_REQUEST_ID_LEN => {
                return Err(DomainError::validation(format!(
                    "request id exceeds {MAX_REQUEST_ID_LEN} characters"
                )));
            }
            Some(id) => Some(id),
        };

        let key = match request_id {
            Some(id) => format!(
                "r:{}",
                fingerprint(&[input.owner_id, input.format.as_str(), id])
            ),
            None => {
                let bucket = width.bucket_start(input.requested_at).to_string();
                format!(
                    "u:{}",
                    fingerprint(&[
                        input.owner_id,
                        input.format.as_str(),
                        input.target.as_str(),
                        &bucket,
                    ])
                )
            }
        };

        Ok(Self(key))
    }

    /// Rehydrate a key read back from persistence.
    pub fn from_persisted(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Length-prefixed so no pair of distinct component lists can collide.
fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..])
}
