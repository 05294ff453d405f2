//! Infrastructure adapters and runtime bootstrap.

pub mod db;
pub mod error;
pub mod http;
pub mod links;
pub mod memory;
pub mod object_store;
pub mod render;
pub mod telemetry;
