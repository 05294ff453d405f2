//! Filesystem-backed write-once object store.
//!
//! Each object is a read-only file committed with a no-clobber rename, so a
//! key can be created once and never replaced through this adapter. The
//! metadata attached at write time lives next to it in `<key>.meta.json`.

use std::io::{self, Write as _};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use tokio::{fs, task};
use tracing::{debug, warn};

use crate::application::storage::{DownloadLink, ObjectStore, ObjectStoreError, PutOutcome};
use crate::domain::{digest::ContentDigest, entities::StoredObjectMetadata};
use crate::infra::links::LinkSigner;

const META_SUFFIX: &str = ".meta.json";

#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    root: Arc<PathBuf>,
    signer: LinkSigner,
}

impl FilesystemObjectStore {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf, signer: LinkSigner) -> Result<Self, io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root: Arc::new(root),
            signer,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of an object; used by operators inspecting the store.
    pub fn absolute_path(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        resolve(&self.root, key)
    }
}

fn resolve(root: &Path, key: &str) -> Result<PathBuf, ObjectStoreError> {
    let relative = Path::new(key);
    // `components()` folds away interior `.` segments, so check the raw segments too.
    let invalid = key.is_empty()
        || key.ends_with(META_SUFFIX)
        || relative.is_absolute()
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        || relative.components().any(|component| {
            !matches!(component, Component::Normal(_))
        });
    if invalid {
        return Err(ObjectStoreError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(root.join(relative))
}

fn metadata_path(object: &Path) -> PathBuf {
    let mut name = object.as_os_str().to_owned();
    name.push(META_SUFFIX);
    PathBuf::from(name)
}

/// Write `contents` to `target` only if nothing exists there yet.
///
/// Returns `false` when the target already existed.
fn create_once(target: &Path, contents: &[u8]) -> Result<bool, io::Error> {
    let parent = target.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "object path has no parent")
    })?;
    std::fs::create_dir_all(parent)?;

    let mut staged = NamedTempFile::new_in(parent)?;
    staged.write_all(contents)?;
    staged.as_file().sync_all()?;
    let mut permissions = staged.as_file().metadata()?.permissions();
    permissions.set_readonly(true);
    staged.as_file().set_permissions(permissions)?;

    match staged.persist_noclobber(target) {
        Ok(_) => Ok(true),
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err.error),
    }
}

fn put_blocking(
    object: &Path,
    key: &str,
    bytes: &[u8],
    metadata: &StoredObjectMetadata,
) -> Result<PutOutcome, ObjectStoreError> {
    let outcome = if create_once(object, bytes)? {
        PutOutcome::Created
    } else {
        let existing = ContentDigest::of(&std::fs::read(object)?);
        if !existing.matches(&metadata.digest) {
            return Err(ObjectStoreError::Conflict {
                key: key.to_string(),
                existing,
                attempted: metadata.digest.clone(),
            });
        }
        PutOutcome::Replayed
    };

    let encoded = serde_json::to_vec_pretty(metadata).map_err(|err| ObjectStoreError::Metadata {
        key: key.to_string(),
        message: err.to_string(),
    })?;
    // A replay may find the sidecar from the first write; that one stays.
    create_once(&metadata_path(object), &encoded)?;

    Ok(outcome)
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        metadata: &StoredObjectMetadata,
    ) -> Result<PutOutcome, ObjectStoreError> {
        let object = resolve(&self.root, key)?;
        if !ContentDigest::of(&bytes).matches(&metadata.digest) {
            return Err(ObjectStoreError::Metadata {
                key: key.to_string(),
                message: "attached digest does not describe the payload".to_string(),
            });
        }

        let owned_key = key.to_string();
        let metadata = metadata.clone();
        let outcome = task::spawn_blocking(move || {
            put_blocking(&object, &owned_key, &bytes, &metadata)
        })
        .await
        .map_err(|err| ObjectStoreError::Unavailable(format!("store worker failed: {err}")))??;

        debug!(
            target = "infra::object_store::put",
            key,
            outcome = ?outcome,
            "object write acknowledged"
        );
        Ok(outcome)
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let object = resolve(&self.root, key)?;
        match fs::read(&object).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(ObjectStoreError::NotFound {
                key: key.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn head(&self, key: &str) -> Result<Option<StoredObjectMetadata>, ObjectStoreError> {
        let object = resolve(&self.root, key)?;
        if !fs::try_exists(&object).await? {
            return Ok(None);
        }

        let raw = match fs::read(metadata_path(&object)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(
                    target = "infra::object_store::head",
                    key,
                    "object present without metadata"
                );
                return Err(ObjectStoreError::Metadata {
                    key: key.to_string(),
                    message: "metadata sidecar missing".to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|err| ObjectStoreError::Metadata {
                key: key.to_string(),
                message: err.to_string(),
            })
    }

    async fn presign(
        &self,
        key: &str,
        expires_at: OffsetDateTime,
    ) -> Result<DownloadLink, ObjectStoreError> {
        let object = resolve(&self.root, key)?;
        if !fs::try_exists(&object).await? {
            return Err(ObjectStoreError::NotFound {
                key: key.to_string(),
            });
        }
        Ok(self.signer.sign(key, expires_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_cannot_escape_the_root() {
        let root = Path::new("/srv/evidence");
        for key in [
            "",
            "/etc/passwd",
            "../outside.pdf",
            "captures/../../outside.pdf",
            "captures/./a.pdf",
            "captures/a.pdf.meta.json",
            "captures/",
        ] {
            assert!(
                matches!(resolve(root, key), Err(ObjectStoreError::InvalidKey { .. })),
                "{key} should be rejected"
            );
        }
        assert_eq!(
            resolve(root, "captures/2026/03/02/a.pdf").expect("valid key"),
            PathBuf::from("/srv/evidence/captures/2026/03/02/a.pdf")
        );
    }

    #[test]
    fn sidecar_sits_next_to_object() {
        assert_eq!(
            metadata_path(Path::new("/srv/captures/a.pdf")),
            PathBuf::from("/srv/captures/a.pdf.meta.json")
        );
    }
}
