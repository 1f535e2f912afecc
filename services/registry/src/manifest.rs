//! Manifest persistence, keyed by repository and digest.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use storage::StorageBucket;

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult, not_found_as};
use crate::reference::Repository;

/// Media type assumed when a client does not send one.
pub const DEFAULT_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

const META_SUFFIX: &str = ".meta";

#[derive(Debug, Serialize, Deserialize)]
struct ManifestMeta {
    #[serde(rename = "mediaType")]
    media_type: String,
}

/// A stored manifest document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Digest of `data`.
    pub digest: Digest,
    /// Media type recorded when the manifest was pushed.
    pub media_type: String,
    /// Raw manifest bytes, exactly as pushed.
    pub data: Vec<u8>,
}

/// Size and media type of a stored manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestInfo {
    /// Size of the manifest in bytes.
    pub size: u64,
    /// Media type recorded when the manifest was pushed.
    pub media_type: String,
}

/// Directory holding the manifests of `repository`.
///
/// `manifests` and `tags` are reserved segments under
/// `repositories/<name>/`: a repository named `<name>/manifests` stores its
/// own keys inside this directory, so only single-segment digest keys here
/// count as manifests of `<name>`.
pub(crate) fn manifests_dir(repository: &Repository) -> Utf8PathBuf {
    Utf8PathBuf::from("repositories")
        .join(repository.as_path())
        .join("manifests")
}

fn manifest_path(repository: &Repository, digest: &Digest) -> Utf8PathBuf {
    manifests_dir(repository).join(digest.as_str())
}

fn meta_path(repository: &Repository, digest: &Digest) -> Utf8PathBuf {
    manifests_dir(repository).join(format!("{digest}{META_SUFFIX}"))
}

/// Manifest storage.
///
/// Each manifest is stored as two objects, the raw document and a small JSON
/// sidecar with its media type. The sidecar is written first, so a manifest
/// that can be read always has its media type recorded.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    bucket: StorageBucket,
}

impl ManifestStore {
    /// Create a manifest store over a storage bucket.
    pub fn new(bucket: StorageBucket) -> Self {
        Self { bucket }
    }

    /// Store a manifest under `digest`.
    ///
    /// Storing identical bytes again only rewrites the media type.
    #[tracing::instrument(skip(self, data), fields(%repository, %digest, len = data.len()))]
    pub async fn put(
        &self,
        repository: &Repository,
        digest: &Digest,
        data: &[u8],
        media_type: Option<&str>,
    ) -> RegistryResult<()> {
        digest.verify(data)?;

        let meta = ManifestMeta {
            media_type: media_type.unwrap_or(DEFAULT_MEDIA_TYPE).to_string(),
        };
        let meta = serde_json::to_vec(&meta)
            .map_err(|err| RegistryError::InvalidManifest(err.to_string()))?;

        self.bucket
            .write(&meta_path(repository, digest), &meta)
            .await?;
        self.bucket
            .write(&manifest_path(repository, digest), data)
            .await?;
        tracing::debug!("Stored manifest");
        Ok(())
    }

    /// Read a manifest and its media type.
    #[tracing::instrument(skip(self), fields(%repository, %digest))]
    pub async fn get(&self, repository: &Repository, digest: &Digest) -> RegistryResult<Manifest> {
        let data = self
            .bucket
            .read(&manifest_path(repository, digest))
            .await
            .map_err(not_found_as(|| missing(repository, digest)))?;
        let media_type = self.media_type(repository, digest).await?;

        Ok(Manifest {
            digest: digest.clone(),
            media_type,
            data,
        })
    }

    /// Size and media type of a manifest, without reading it.
    #[tracing::instrument(skip(self), fields(%repository, %digest))]
    pub async fn get_info(
        &self,
        repository: &Repository,
        digest: &Digest,
    ) -> RegistryResult<ManifestInfo> {
        let metadata = self
            .bucket
            .metadata(&manifest_path(repository, digest))
            .await
            .map_err(not_found_as(|| missing(repository, digest)))?;
        let media_type = self.media_type(repository, digest).await?;

        Ok(ManifestInfo {
            size: metadata.size,
            media_type,
        })
    }

    async fn media_type(&self, repository: &Repository, digest: &Digest) -> RegistryResult<String> {
        let raw = match self.bucket.read(&meta_path(repository, digest)).await {
            Ok(raw) => raw,
            Err(err) if err.is_not_found() => return Ok(DEFAULT_MEDIA_TYPE.to_string()),
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_slice::<ManifestMeta>(&raw) {
            Ok(meta) => Ok(meta.media_type),
            Err(err) => {
                tracing::warn!(%repository, %digest, "Unreadable manifest metadata: {err}");
                Ok(DEFAULT_MEDIA_TYPE.to_string())
            }
        }
    }

    /// Whether a manifest is stored.
    pub async fn exists(&self, repository: &Repository, digest: &Digest) -> RegistryResult<bool> {
        match self.get_info(repository, digest).await {
            Ok(_) => Ok(true),
            Err(RegistryError::ManifestNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Delete a manifest. Tags pointing at it are left alone.
    #[tracing::instrument(skip(self), fields(%repository, %digest))]
    pub async fn delete(&self, repository: &Repository, digest: &Digest) -> RegistryResult<()> {
        self.bucket
            .delete(&manifest_path(repository, digest))
            .await
            .map_err(not_found_as(|| missing(repository, digest)))?;

        match self.bucket.delete(&meta_path(repository, digest)).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => tracing::warn!("Failed to remove manifest metadata: {err}"),
        }
        tracing::debug!("Deleted manifest");
        Ok(())
    }

    /// Digests of every manifest in a repository, sorted.
    pub async fn list(&self, repository: &Repository) -> RegistryResult<Vec<Digest>> {
        let dir = manifests_dir(repository);
        let mut digests: Vec<Digest> = self
            .bucket
            .list(Some(&dir))
            .await?
            .iter()
            .filter_map(|key| camino::Utf8Path::new(key).strip_prefix(&dir).ok())
            .filter(|name| name.components().count() == 1)
            .filter_map(|name| Digest::parse(name.as_str()).ok())
            .collect();
        digests.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(digests)
    }
}

fn missing(repository: &Repository, digest: &Digest) -> RegistryError {
    RegistryError::ManifestNotFound(format!("{repository}@{digest}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::{MemoryStorage, Storage};

    fn store() -> ManifestStore {
        let storage: Storage = MemoryStorage::new().into();
        ManifestStore::new(storage.bucket("test"))
    }

    fn repo(name: &str) -> Repository {
        Repository::parse(name).unwrap()
    }

    const OCI: &str = "application/vnd.oci.image.manifest.v1+json";

    #[tokio::test]
    async fn put_then_get() {
        let manifests = store();
        let repository = repo("library/alpine");
        let data = br#"{"schemaVersion":2}"#;
        let digest = Digest::compute(data);

        manifests
            .put(&repository, &digest, data, Some(OCI))
            .await
            .unwrap();

        let manifest = manifests.get(&repository, &digest).await.unwrap();
        assert_eq!(manifest.data, data);
        assert_eq!(manifest.media_type, OCI);
        assert_eq!(manifest.digest, digest);

        let info = manifests.get_info(&repository, &digest).await.unwrap();
        assert_eq!(info.size, data.len() as u64);
        assert_eq!(info.media_type, OCI);
    }

    #[tokio::test]
    async fn media_type_defaults() {
        let manifests = store();
        let repository = repo("app");
        let data = b"{}";
        let digest = Digest::compute(data);

        manifests.put(&repository, &digest, data, None).await.unwrap();
        let manifest = manifests.get(&repository, &digest).await.unwrap();
        assert_eq!(manifest.media_type, DEFAULT_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn re_put_rewrites_media_type() {
        let manifests = store();
        let repository = repo("app");
        let data = b"{}";
        let digest = Digest::compute(data);

        manifests.put(&repository, &digest, data, None).await.unwrap();
        manifests
            .put(&repository, &digest, data, Some(OCI))
            .await
            .unwrap();

        let info = manifests.get_info(&repository, &digest).await.unwrap();
        assert_eq!(info.media_type, OCI);
        assert_eq!(manifests.list(&repository).await.unwrap(), vec![digest]);
    }

    #[tokio::test]
    async fn scoped_by_repository() {
        let manifests = store();
        let data = b"{}";
        let digest = Digest::compute(data);

        manifests.put(&repo("a"), &digest, data, None).await.unwrap();
        assert!(manifests.exists(&repo("a"), &digest).await.unwrap());
        assert!(!manifests.exists(&repo("b"), &digest).await.unwrap());
    }

    #[tokio::test]
    async fn delete() {
        let manifests = store();
        let repository = repo("app");
        let data = b"{}";
        let digest = Digest::compute(data);

        manifests.put(&repository, &digest, data, None).await.unwrap();
        manifests.delete(&repository, &digest).await.unwrap();

        assert!(matches!(
            manifests.get(&repository, &digest).await.unwrap_err(),
            RegistryError::ManifestNotFound(_)
        ));
        assert!(matches!(
            manifests.delete(&repository, &digest).await.unwrap_err(),
            RegistryError::ManifestNotFound(_)
        ));
        assert!(manifests.list(&repository).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_mismatched_digest() {
        let manifests = store();
        let digest = Digest::compute(b"one");
        let err = manifests
            .put(&repo("app"), &digest, b"two", None)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "DIGEST_INVALID");
    }

    #[tokio::test]
    async fn list_is_sorted() {
        let manifests = store();
        let repository = repo("app");
        let mut expected = Vec::new();
        for body in [&b"{\"a\":1}"[..], b"{\"b\":2}", b"{\"c\":3}"] {
            let digest = Digest::compute(body);
            manifests.put(&repository, &digest, body, None).await.unwrap();
            expected.push(digest);
        }
        expected.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(manifests.list(&repository).await.unwrap(), expected);
    }
}
