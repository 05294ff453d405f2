//! Application services: ports, the capture pipeline and the operations built on it.

pub mod captures;
pub mod error;
pub mod idempotency;
pub mod pagination;
pub mod pipeline;
pub mod renderer;
pub mod repos;
pub mod storage;
pub mod verify;
