use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::application::renderer::{RenderError, RenderOptions, Renderer};
use crate::domain::types::ArtifactFormat;

/// 1x1 transparent PNG.
const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

const PLACEHOLDER_PDF_BODY: &str = "1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n\
3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >> endobj\n\
trailer << /Root 1 0 R >>\n\
%%EOF\n";

/// Engine that never leaves the process.
///
/// PDFs name the target URL in a header comment, so distinct targets hash
/// differently while repeated renders of one target are byte-identical.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticRenderer;

impl StaticRenderer {
    pub fn artifact(url: &Url, format: ArtifactFormat) -> Bytes {
        match format {
            ArtifactFormat::Pdf => Bytes::from(format!(
                "%PDF-1.4\n% evidentia placeholder for {url}\n{PLACEHOLDER_PDF_BODY}"
            )),
            ArtifactFormat::Png => Bytes::from_static(PLACEHOLDER_PNG),
        }
    }
}

#[async_trait]
impl Renderer for StaticRenderer {
    async fn render(&self, url: &Url, options: &RenderOptions) -> Result<Bytes, RenderError> {
        Ok(Self::artifact(url, options.format))
    }
}
