use std::sync::Arc;
use std::time::Duration;

use crate::application::captures::CaptureService;
use crate::application::storage::ObjectStore;
use crate::infra::links::LinkSigner;

/// Shared handles for the capture API.
#[derive(Clone)]
pub struct ApiState {
    pub captures: Arc<CaptureService>,
    pub store: Arc<dyn ObjectStore>,
    pub signer: LinkSigner,
    /// Budget for the ledger round-trip behind `/health`.
    pub health_timeout: Duration,
}

/// Tenant on whose behalf a request runs, as asserted by the upstream gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
