//! Tamper-evident capture of web pages into write-once storage.
//!
//! A capture request is admitted once per dedupe key, rendered, fingerprinted
//! with SHA-256, written to a store that refuses to replace bytes, and recorded
//! in a ledger. Any recorded capture can later be re-hashed and compared.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
