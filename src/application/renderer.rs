//! Port to the external headless rendering engine.
//!
//! Rendering settings are deterministic; page content is not. Two renders of
//! the same URL with identical options may yield different bytes, so a digest
//! attests to what was rendered at that instant only.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::domain::types::{ArtifactFormat, WaitStrategy};

pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 800;
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: DEFAULT_VIEWPORT_WIDTH,
            height: DEFAULT_VIEWPORT_HEIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub format: ArtifactFormat,
    pub viewport: Viewport,
    pub wait_until: WaitStrategy,
    /// Hard upper bound for one render call.
    pub timeout: Duration,
}

impl RenderOptions {
    pub fn for_format(format: ArtifactFormat) -> Self {
        Self {
            format,
            viewport: Viewport::default(),
            wait_until: WaitStrategy::default(),
            timeout: DEFAULT_RENDER_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// Timeouts, navigation failures, engine hiccups. Retried.
    #[error("transient render failure: {0}")]
    Transient(String),
    /// The page cannot be rendered as requested. Not retried.
    #[error("permanent render failure: {0}")]
    Permanent(String),
}

impl RenderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RenderError::Transient(_))
    }
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &Url, options: &RenderOptions) -> Result<Bytes, RenderError>;
}
