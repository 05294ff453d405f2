use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Failures while bringing up the process-level adapters.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("object store root `{}` is unusable: {source}", path.display())]
    StoreRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("capture ledger database error: {message}")]
    Database { message: String },
    #[error("ledger migrations failed: {message}")]
    Migration { message: String },
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("invalid {component} setup: {message}")]
    Configuration {
        component: &'static str,
        message: String,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl InfraError {
    pub fn database(err: impl std::fmt::Display) -> Self {
        Self::Database {
            message: err.to_string(),
        }
    }

    pub fn migration(err: impl std::fmt::Display) -> Self {
        Self::Migration {
            message: err.to_string(),
        }
    }

    pub fn configuration(component: &'static str, message: impl Into<String>) -> Self {
        Self::Configuration {
            component,
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}
