//! Renderer engines behind the `Renderer` port.

mod fixed;
mod http;

pub use fixed::StaticRenderer;
pub use http::HttpRenderer;

use crate::domain::types::ArtifactFormat;

const PDF_MAGIC: &[u8] = b"%PDF-";
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Whether `bytes` start with the signature expected for `format`.
pub(crate) fn has_format_signature(format: ArtifactFormat, bytes: &[u8]) -> bool {
    match format {
        ArtifactFormat::Pdf => bytes.starts_with(PDF_MAGIC),
        ArtifactFormat::Png => bytes.starts_with(PNG_MAGIC),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_distinguish_formats() {
        assert!(has_format_signature(ArtifactFormat::Pdf, b"%PDF-1.7\n"));
        assert!(!has_format_signature(ArtifactFormat::Png, b"%PDF-1.7\n"));
        assert!(has_format_signature(ArtifactFormat::Png, PNG_MAGIC));
        assert!(!has_format_signature(ArtifactFormat::Pdf, b""));
    }
}
