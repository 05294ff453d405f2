//! Cursor pagination for owner-scoped capture listings.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Largest page a caller may request.
pub const MAX_PAGE_LIMIT: u32 = 200;
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct CaptureCursorPayload {
    requested_at: OffsetDateTime,
    id: Uuid,
}

/// Position after the last record of a newest-first page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureCursor {
    requested_at: OffsetDateTime,
    id: Uuid,
}

impl CaptureCursor {
    pub fn new(requested_at: OffsetDateTime, id: Uuid) -> Self {
        Self { requested_at, id }
    }

    pub fn requested_at(&self) -> OffsetDateTime {
        self.requested_at
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn encode(&self) -> Result<String, PaginationError> {
        let payload = CaptureCursorPayload {
            requested_at: self.requested_at,
            id: self.id,
        };
        let serialized = serde_json::to_vec(&payload)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(serialized))
    }

    pub fn decode(cursor: &str) -> Result<Self, PaginationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        let payload: CaptureCursorPayload = serde_json::from_slice(&bytes)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        Ok(Self {
            requested_at: payload.requested_at,
            id: payload.id,
        })
    }

    /// Whether a record sorts strictly after this cursor in newest-first order.
    pub fn precedes(&self, requested_at: OffsetDateTime, id: Uuid) -> bool {
        (requested_at, id) < (self.requested_at, self.id)
    }
}

/// Cursor-aware pagination request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<C> {
    pub limit: u32,
    pub cursor: Option<C>,
}

impl<C> PageRequest<C> {
    pub fn new(limit: u32, cursor: Option<C>) -> Self {
        Self {
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
            cursor,
        }
    }
}

/// Cursor-aware page result.
#[derive(Debug, Clone, Serialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> CursorPage<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }

    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }
}

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn capture_cursor_survives_encoding() {
        let id = Uuid::now_v7();
        let when = datetime!(2026-03-02 08:00:00.123 UTC);
        let encoded = CaptureCursor::new(when, id).encode().expect("encode");
        let decoded = CaptureCursor::decode(&encoded).expect("decoded cursor");

        assert_eq!(decoded.requested_at(), when);
        assert_eq!(decoded.id(), id);
    }

    #[test]
    fn garbage_cursor_is_rejected() {
        assert!(CaptureCursor::decode("not-a-cursor!").is_err());
        assert!(CaptureCursor::decode(&URL_SAFE_NO_PAD.encode(b"{}")).is_err());
    }

    #[test]
    fn newest_first_ordering_breaks_ties_on_id() {
        let when = datetime!(2026-03-02 08:00 UTC);
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        let cursor = CaptureCursor::new(when, high);

        assert!(cursor.precedes(when, low));
        assert!(!cursor.precedes(when, high));
        assert!(cursor.precedes(datetime!(2026-03-01 08:00 UTC), high));
        assert!(!cursor.precedes(datetime!(2026-03-03 08:00 UTC), low));
    }

    #[test]
    fn page_limit_is_clamped() {
        assert_eq!(PageRequest::<CaptureCursor>::new(0, None).limit, 1);
        assert_eq!(PageRequest::<CaptureCursor>::new(10_000, None).limit, MAX_PAGE_LIMIT);
    }
}
