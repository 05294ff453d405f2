use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::application::renderer::{RenderError, RenderOptions, Renderer, Viewport};
use crate::domain::types::{ArtifactFormat, WaitStrategy};
use crate::infra::render::has_format_signature;

/// Longest slice of an engine error body copied into a failure message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
struct RenderCall<'a> {
    url: &'a str,
    format: ArtifactFormat,
    viewport: Viewport,
    wait_until: WaitStrategy,
    timeout_ms: u64,
}

/// Client for an external headless-render service.
///
/// The service receives a JSON job and answers with the artifact bytes.
#[derive(Debug, Clone)]
pub struct HttpRenderer {
    client: Client,
    endpoint: Url,
}

impl HttpRenderer {
    pub fn new(endpoint: Url) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("evidentia/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn classify_status(status: StatusCode, body: &str) -> RenderError {
    let detail = if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        &body[..cut]
    } else {
        body
    };
    let message = format!("render service answered {status}: {}", detail.trim());
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        RenderError::Transient(message)
    } else {
        RenderError::Permanent(message)
    }
}

fn classify_transport(err: &reqwest::Error) -> RenderError {
    if err.is_timeout() {
        RenderError::Transient("render service timed out".to_string())
    } else if err.is_connect() {
        RenderError::Transient(format!("render service unreachable: {err}"))
    } else if err.is_builder() {
        RenderError::Permanent(format!("render request could not be built: {err}"))
    } else {
        RenderError::Transient(format!("render transport failed: {err}"))
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(&self, url: &Url, options: &RenderOptions) -> Result<Bytes, RenderError> {
        let call = RenderCall {
            url: url.as_str(),
            format: options.format,
            viewport: options.viewport,
            wait_until: options.wait_until,
            timeout_ms: u64::try_from(options.timeout.as_millis()).unwrap_or(u64::MAX),
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .timeout(options.timeout)
            .json(&call)
            .send()
            .await
            .map_err(|err| classify_transport(&err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| classify_transport(&err))?;

        if bytes.is_empty() {
            return Err(RenderError::Transient(
                "render service returned an empty body".to_string(),
            ));
        }
        if !has_format_signature(options.format, &bytes) {
            return Err(RenderError::Permanent(format!(
                "render service returned bytes that are not {}",
                options.format.as_str()
            )));
        }

        debug!(
            target = "infra::render::http",
            url = %url,
            format = options.format.as_str(),
            size_bytes = bytes.len(),
            "render completed"
        );
        Ok(bytes)
    }
}
