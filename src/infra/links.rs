//! Expiring, signed download links for stored objects.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::OffsetDateTime;

use crate::application::storage::DownloadLink;

/// Route prefix under which signed objects are served.
pub const OBJECTS_ROUTE_PREFIX: &str = "/v1/objects";

const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("download link expired")]
    Expired,
    #[error("download link signature is invalid")]
    BadSignature,
    #[error("link secret must be at least {MIN_SECRET_LEN} bytes")]
    WeakSecret,
}

#[derive(Clone)]
pub struct LinkSigner {
    secret: Vec<u8>,
    base_url: String,
}

impl std::fmt::Debug for LinkSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSigner")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl LinkSigner {
    /// `base_url` is prepended to the route; empty yields relative links.
    pub fn new(secret: impl Into<Vec<u8>>, base_url: impl Into<String>) -> Result<Self, LinkError> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LEN {
            return Err(LinkError::WeakSecret);
        }
        Ok(Self {
            secret,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn sign(&self, key: &str, expires_at: OffsetDateTime) -> DownloadLink {
        let expires = expires_at.unix_timestamp();
        let signature = hex::encode(self.tag(key, expires));
        DownloadLink {
            url: format!(
                "{}{OBJECTS_ROUTE_PREFIX}/{key}?expires={expires}&signature={signature}",
                self.base_url
            ),
            expires_at,
        }
    }

    pub fn verify(
        &self,
        key: &str,
        expires: i64,
        signature: &str,
        now: OffsetDateTime,
    ) -> Result<(), LinkError> {
        let provided = hex::decode(signature).map_err(|_| LinkError::BadSignature)?;
        let expected = self.tag(key, expires);
        if expected.ct_eq(&provided).unwrap_u8() == 0 {
            return Err(LinkError::BadSignature);
        }
        if now.unix_timestamp() >= expires {
            return Err(LinkError::Expired);
        }
        Ok(())
    }

    fn tag(&self, key: &str, expires: i64) -> Vec<u8> {
        let mut hasher = Sha256::new();
        for part in [self.secret.as_slice(), key.as_bytes(), &expires.to_be_bytes()[..]] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        hasher.finalize().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use time::{Duration, macros::datetime};

    use super::*;

    fn signer() -> LinkSigner {
        LinkSigner::new(vec![7u8; 32], "https://evidence.example").expect("signer")
    }

    fn query_param<'a>(url: &'a str, name: &str) -> &'a str {
        url.split(['?', '&'])
            .find_map(|pair| pair.strip_prefix(name)?.strip_prefix('='))
            .expect("query parameter present")
    }

    #[test]
    fn signed_link_verifies_until_expiry() {
        let signer = signer();
        let now = datetime!(2026-03-02 08:00 UTC);
        let key = "captures/2026/03/02/abc.pdf";
        let link = signer.sign(key, now + Duration::minutes(15));

        assert!(
            link.url
                .starts_with("https://evidence.example/v1/objects/captures/2026/03/02/abc.pdf?")
        );
        let expires: i64 = query_param(&link.url, "expires").parse().expect("expires");
        let signature = query_param(&link.url, "signature");

        assert_eq!(signer.verify(key, expires, signature, now), Ok(()));
        assert_eq!(
            signer.verify(key, expires, signature, now + Duration::minutes(15)),
            Err(LinkError::Expired)
        );
    }

    #[test]
    fn tampered_links_are_rejected() {
        let signer = signer();
        let now = datetime!(2026-03-02 08:00 UTC);
        let link = signer.sign("captures/a.pdf", now + Duration::minutes(5));
        let expires: i64 = query_param(&link.url, "expires").parse().expect("expires");
        let signature = query_param(&link.url, "signature");

        assert_eq!(
            signer.verify("captures/b.pdf", expires, signature, now),
            Err(LinkError::BadSignature)
        );
        assert_eq!(
            signer.verify("captures/a.pdf", expires + 3_600, signature, now),
            Err(LinkError::BadSignature)
        );
        assert_eq!(
            signer.verify("captures/a.pdf", expires, "zz", now),
            Err(LinkError::BadSignature)
        );
    }

    #[test]
    fn short_secrets_are_refused() {
        assert_eq!(
            LinkSigner::new(b"short".to_vec(), "").err(),
            Some(LinkError::WeakSecret)
        );
    }
}
