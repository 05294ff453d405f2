//! Capture pipeline: state machine execution with bounded retries.

mod in_flight;
mod orchestrator;
mod retry;

pub use in_flight::{CaptureGuard, InFlightCaptures, InFlightError};
pub use orchestrator::{CaptureOrchestrator, PipelineError, PipelineSettings};
pub use retry::RetryPolicy;
