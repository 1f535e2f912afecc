//! Mutable tag to digest mapping.

use camino::{Utf8Path, Utf8PathBuf};
use storage::StorageBucket;

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult, not_found_as};
use crate::manifest::ManifestStore;
use crate::reference::{Repository, Tag};

/// Directory holding the tags of `repository`.
///
/// Tags share the `repositories/<name>/` prefix with nested repositories, so
/// a tag named `tags` or `manifests` and a repository `<name>/tags/...` map
/// onto the same keys. The filesystem driver reports that clash as an
/// internal error.
pub(crate) fn tags_dir(repository: &Repository) -> Utf8PathBuf {
    Utf8PathBuf::from("repositories")
        .join(repository.as_path())
        .join("tags")
}

fn tag_path(repository: &Repository, tag: &Tag) -> Utf8PathBuf {
    tags_dir(repository).join(tag.as_str())
}

/// Tag index, one small object per tag containing the digest it points at.
#[derive(Debug, Clone)]
pub struct TagIndex {
    bucket: StorageBucket,
}

impl TagIndex {
    /// Create a tag index over a storage bucket.
    pub fn new(bucket: StorageBucket) -> Self {
        Self { bucket }
    }

    /// Point `tag` at `digest`, replacing any previous target.
    #[tracing::instrument(skip(self), fields(%repository, %tag, %digest))]
    pub async fn put(&self, repository: &Repository, tag: &Tag, digest: &Digest) -> RegistryResult<()> {
        self.bucket
            .write(&tag_path(repository, tag), digest.as_str().as_bytes())
            .await?;
        tracing::debug!("Tagged manifest");
        Ok(())
    }

    /// The digest a tag currently points at.
    #[tracing::instrument(skip(self), fields(%repository, %tag))]
    pub async fn get(&self, repository: &Repository, tag: &Tag) -> RegistryResult<Digest> {
        let raw = self
            .bucket
            .read(&tag_path(repository, tag))
            .await
            .map_err(not_found_as(|| missing(repository, tag)))?;

        let text = String::from_utf8_lossy(&raw);
        Digest::parse(text.trim()).inspect_err(|err| {
            tracing::error!("Tag contains an invalid digest: {err}");
        })
    }

    /// Remove a tag. The manifest it pointed at is kept.
    #[tracing::instrument(skip(self), fields(%repository, %tag))]
    pub async fn delete(&self, repository: &Repository, tag: &Tag) -> RegistryResult<()> {
        self.bucket
            .delete(&tag_path(repository, tag))
            .await
            .map_err(not_found_as(|| missing(repository, tag)))?;
        tracing::debug!("Deleted tag");
        Ok(())
    }

    /// Sorted tag names of a repository.
    ///
    /// A repository with manifests but no tags has an empty list. A repository
    /// with neither is unknown.
    #[tracing::instrument(skip(self), fields(%repository))]
    pub async fn list(&self, repository: &Repository) -> RegistryResult<Vec<String>> {
        let dir = tags_dir(repository);
        let mut tags: Vec<String> = self
            .bucket
            .list(Some(&dir))
            .await?
            .iter()
            .filter_map(|key| Utf8Path::new(key).strip_prefix(&dir).ok())
            .filter(|name| name.components().count() == 1)
            .map(|name| name.to_string())
            .collect();

        if tags.is_empty() {
            let manifests = ManifestStore::new(self.bucket.clone());
            if manifests.list(repository).await?.is_empty() {
                return Err(RegistryError::RepositoryNotFound(repository.to_string()));
            }
        }

        tags.sort();
        Ok(tags)
    }
}

fn missing(repository: &Repository, tag: &Tag) -> RegistryError {
    RegistryError::ManifestNotFound(format!("{repository}:{tag}"))
}
