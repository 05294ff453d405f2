//! Domain layer types and invariants.

pub mod dedupe;
pub mod digest;
pub mod entities;
pub mod error;
pub mod retention;
pub mod types;
