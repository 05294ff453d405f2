//! Content fingerprints over raw artifact bytes.
//!
//! The same function runs at write time and at verify time, so the output
//! depends only on the byte sequence: lowercase hex SHA-256, always 64 chars.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::error::DomainError;

/// Length of the hex-encoded fingerprint.
pub const DIGEST_HEX_LEN: usize = 64;

/// Hex-encoded SHA-256 fingerprint of stored bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Fingerprint the provided bytes.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..]))
    }

    /// Parse a previously recorded fingerprint.
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        let normalized = value.trim().to_ascii_lowercase();
        if normalized.len() != DIGEST_HEX_LEN
            || !normalized.bytes().all(|byte| byte.is_ascii_hexdigit())
        {
            return Err(DomainError::validation(format!(
                "digest must be {DIGEST_HEX_LEN} hex characters"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Byte-for-byte comparison of the hex form.
    pub fn matches(&self, other: &ContentDigest) -> bool {
        self.0.as_bytes() == other.0.as_bytes()
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentDigest> for String {
    fn from(value: ContentDigest) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_of_empty_input_matches_known_vector() {
        assert_eq!(
            ContentDigest::of(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digest_of_abc_matches_known_vector() {
        assert_eq!(
            ContentDigest::of(b"abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn identical_bytes_produce_identical_digests() {
        let first = ContentDigest::of(b"%PDF-1.4 evidence");
        let second = ContentDigest::of(b"%PDF-1.4 evidence");
        assert!(first.matches(&second));
        assert_eq!(first.as_str().len(), DIGEST_HEX_LEN);
    }

    #[test]
    fn parse_rejects_wrong_length_and_non_hex() {
        assert!(ContentDigest::parse("abc").is_err());
        assert!(ContentDigest::parse(&"g".repeat(DIGEST_HEX_LEN)).is_err());
        let upper = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";
        assert_eq!(
            ContentDigest::parse(upper).expect("uppercase hex").as_str(),
            upper.to_ascii_lowercase()
        );
    }
}
