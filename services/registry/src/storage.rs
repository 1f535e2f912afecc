//! Storage layer for the registry

use crate::blob::BlobStore;
use crate::catalog::Catalog;
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::manifest::{Manifest, ManifestInfo, ManifestStore};
use crate::reference::{Reference, Repository};
use crate::tag::TagIndex;
use crate::upload::UploadSessions;

/// Registry storage backend.
///
/// Bundles the individual stores over one storage bucket, and implements the
/// operations which span more than one of them.
#[derive(Clone, Debug)]
pub struct RegistryStorage {
    blobs: BlobStore,
    uploads: UploadSessions,
    manifests: ManifestStore,
    tags: TagIndex,
    catalog: Catalog,
}

impl RegistryStorage {
    /// Create registry storage in `bucket`.
    pub fn new(storage: storage::Storage, bucket: impl Into<String>) -> Self {
        let bucket = storage.bucket(bucket);
        Self {
            blobs: BlobStore::new(bucket.clone()),
            uploads: UploadSessions::new(bucket.clone()),
            manifests: ManifestStore::new(bucket.clone()),
            tags: TagIndex::new(bucket.clone()),
            catalog: Catalog::new(bucket),
        }
    }

    /// Blob store.
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Upload sessions.
    pub fn uploads(&self) -> &UploadSessions {
        &self.uploads
    }

    /// Manifest store.
    pub fn manifests(&self) -> &ManifestStore {
        &self.manifests
    }

    /// Tag index.
    pub fn tags(&self) -> &TagIndex {
        &self.tags
    }

    /// Repository catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Resolve a manifest reference to a digest.
    ///
    /// Digests are used as they are, tags go through the tag index.
    pub async fn resolve(
        &self,
        repository: &Repository,
        reference: &Reference,
    ) -> RegistryResult<Digest> {
        match reference {
            Reference::Digest(digest) => Ok(digest.clone()),
            Reference::Tag(tag) => self.tags.get(repository, tag).await,
        }
    }

    /// Read a manifest by tag or digest.
    pub async fn get_manifest(
        &self,
        repository: &Repository,
        reference: &Reference,
    ) -> RegistryResult<Manifest> {
        let digest = self.resolve(repository, reference).await?;
        self.manifests.get(repository, &digest).await
    }

    /// Digest, size and media type of a manifest, by tag or digest.
    pub async fn manifest_info(
        &self,
        repository: &Repository,
        reference: &Reference,
    ) -> RegistryResult<(Digest, ManifestInfo)> {
        let digest = self.resolve(repository, reference).await?;
        let info = self.manifests.get_info(repository, &digest).await?;
        Ok((digest, info))
    }

    /// Store a manifest, and point the tag at it when `reference` is a tag.
    ///
    /// The document must be well formed JSON. When pushed by digest, the digest
    /// must match the content. The tag is only written once the manifest is
    /// stored.
    #[tracing::instrument(skip(self, data), fields(%repository, %reference, len = data.len()))]
    pub async fn put_manifest(
        &self,
        repository: &Repository,
        reference: &Reference,
        data: &[u8],
        media_type: Option<&str>,
    ) -> RegistryResult<Digest> {
        serde_json::from_slice::<serde_json::Value>(data)
            .map_err(|err| RegistryError::InvalidManifest(err.to_string()))?;

        let digest = match reference {
            Reference::Digest(declared) => {
                let actual = Digest::compute_with(declared.algorithm(), data);
                declared.matches(&actual)?;
                actual
            }
            Reference::Tag(_) => Digest::compute(data),
        };

        self.manifests
            .put(repository, &digest, data, media_type)
            .await?;

        if let Reference::Tag(tag) = reference {
            self.tags.put(repository, tag, &digest).await?;
        }

        Ok(digest)
    }

    /// Delete by reference.
    ///
    /// Deleting a tag removes only the tag. Deleting a digest removes only the
    /// manifest, tags still pointing at it stop resolving.
    #[tracing::instrument(skip(self), fields(%repository, %reference))]
    pub async fn delete_manifest(
        &self,
        repository: &Repository,
        reference: &Reference,
    ) -> RegistryResult<()> {
        match reference {
            Reference::Tag(tag) => self.tags.delete(repository, tag).await,
            Reference::Digest(digest) => self.manifests.delete(repository, digest).await,
        }
    }
}
