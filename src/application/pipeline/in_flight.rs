use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

/// Captures currently being driven by this process.
///
/// Keeps a reconciler pass from re-driving a record whose original execution
/// is still running in the same process.
#[derive(Debug, Default, Clone)]
pub struct InFlightCaptures {
    captures: Arc<DashMap<Uuid, ()>>,
}

#[derive(Debug, Error)]
pub enum InFlightError {
    #[error("capture {capture_id} is already being processed")]
    AlreadyRunning { capture_id: Uuid },
}

impl InFlightCaptures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, capture_id: Uuid) -> Result<CaptureGuard, InFlightError> {
        use dashmap::mapref::entry::Entry;

        match self.captures.entry(capture_id) {
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Ok(CaptureGuard {
                    capture_id,
                    captures: Arc::clone(&self.captures),
                })
            }
            Entry::Occupied(_) => Err(InFlightError::AlreadyRunning { capture_id }),
        }
    }

    pub fn contains(&self, capture_id: Uuid) -> bool {
        self.captures.contains_key(&capture_id)
    }

    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }
}

pub struct CaptureGuard {
    capture_id: Uuid,
    captures: Arc<DashMap<Uuid, ()>>,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.captures.remove(&self.capture_id);
    }
}
