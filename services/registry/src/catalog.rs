//! The set of known repositories, derived from stored manifests.

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use storage::StorageBucket;

use crate::digest::Digest;
use crate::error::RegistryResult;
use crate::reference::Repository;
use crate::tag::TagIndex;

const REPOSITORIES: &str = "repositories";
const MANIFESTS_SEGMENT: &str = "/manifests/";

/// Prefixes counted by [`RegistryStats::total_size`].
const STORED_CONTENT: [&str; 2] = ["blobs", REPOSITORIES];

fn description_path(repository: &Repository) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("descriptions/{repository}.md"))
}

/// A repository and how many tags it has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositorySummary {
    /// Repository name.
    pub name: String,
    /// Number of tags in the repository.
    pub tag_count: usize,
}

/// Registry wide totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Number of repositories with at least one manifest.
    pub repository_count: usize,
    /// Number of tags across all repositories.
    pub total_tags: usize,
    /// Bytes held by committed blobs and by repository data (manifests with
    /// their media type records, and tags). In-progress uploads and
    /// descriptions are not counted.
    pub total_size: u64,
}

/// Repository catalog.
///
/// There is no separate list of repositories to keep in sync: a repository
/// exists exactly when the manifest namespace contains a manifest for it.
#[derive(Debug, Clone)]
pub struct Catalog {
    bucket: StorageBucket,
    tags: TagIndex,
}

impl Catalog {
    /// Create a catalog over a storage bucket.
    pub fn new(bucket: StorageBucket) -> Self {
        let tags = TagIndex::new(bucket.clone());
        Self { bucket, tags }
    }

    /// Sorted names of every repository holding at least one manifest.
    #[tracing::instrument(skip(self))]
    pub async fn list(&self) -> RegistryResult<Vec<String>> {
        let keys = self.bucket.list(Some(Utf8Path::new(REPOSITORIES))).await?;

        let names: BTreeSet<String> = keys
            .iter()
            .filter_map(|key| repository_of_manifest(key))
            .map(str::to_string)
            .collect();

        tracing::trace!("Found {} repositories", names.len());
        Ok(names.into_iter().collect())
    }

    /// Every repository with its tag count.
    pub async fn summaries(&self) -> RegistryResult<Vec<RepositorySummary>> {
        let mut summaries = Vec::new();
        for name in self.list().await? {
            let tag_count = self.tag_count(&name).await?;
            summaries.push(RepositorySummary { name, tag_count });
        }
        Ok(summaries)
    }

    /// Registry wide totals.
    #[tracing::instrument(skip(self))]
    pub async fn stats(&self) -> RegistryResult<RegistryStats> {
        let summaries = self.summaries().await?;

        let mut total_size = 0;
        for prefix in STORED_CONTENT {
            for key in self.bucket.list(Some(Utf8Path::new(prefix))).await? {
                match self.bucket.metadata(Utf8Path::new(&key)).await {
                    Ok(metadata) => total_size += metadata.size,
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }

        Ok(RegistryStats {
            repository_count: summaries.len(),
            total_tags: summaries.iter().map(|summary| summary.tag_count).sum(),
            total_size,
        })
    }

    async fn tag_count(&self, name: &str) -> RegistryResult<usize> {
        let Ok(repository) = Repository::parse(name) else {
            tracing::warn!(%name, "Skipping tags of repository with an invalid name");
            return Ok(0);
        };
        Ok(self.tags.list(&repository).await?.len())
    }

    /// Free-form description of a repository, empty when none was set.
    pub async fn description(&self, repository: &Repository) -> RegistryResult<String> {
        match self.bucket.read(&description_path(repository)).await {
            Ok(raw) => Ok(String::from_utf8_lossy(&raw).into_owned()),
            Err(err) if err.is_not_found() => Ok(String::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Replace the description of a repository.
    #[tracing::instrument(skip(self, description), fields(%repository))]
    pub async fn set_description(
        &self,
        repository: &Repository,
        description: &str,
    ) -> RegistryResult<()> {
        self.bucket
            .write(&description_path(repository), description.as_bytes())
            .await?;
        Ok(())
    }
}

/// The repository a manifest key belongs to, for keys of the form
/// `repositories/<name>/manifests/<digest>`.
fn repository_of_manifest(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(REPOSITORIES)?.strip_prefix('/')?;
    let split = rest.rfind(MANIFESTS_SEGMENT)?;
    let (name, file) = (&rest[..split], &rest[split + MANIFESTS_SEGMENT.len()..]);
    (!name.is_empty() && Digest::is_valid(file)).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestStore;
    use crate::reference::Tag;
    use storage::{MemoryStorage, Storage};

    fn setup() -> (Catalog, ManifestStore, TagIndex) {
        let storage: Storage = MemoryStorage::new().into();
        let bucket = storage.bucket("test");
        (
            Catalog::new(bucket.clone()),
            ManifestStore::new(bucket.clone()),
            TagIndex::new(bucket),
        )
    }

    fn repo(name: &str) -> Repository {
        Repository::parse(name).unwrap()
    }

    #[test]
    fn manifest_keys() {
        let digest = Digest::compute(b"{}");
        assert_eq!(
            repository_of_manifest(&format!("repositories/library/app/manifests/{digest}")),
            Some("library/app")
        );
        assert_eq!(
            repository_of_manifest(&format!("repositories/app/manifests/{digest}.meta")),
            None
        );
        assert_eq!(repository_of_manifest("repositories/app/tags/latest"), None);
        assert_eq!(
            repository_of_manifest("repositories/a/manifests/b/tags/latest"),
            None
        );
        assert_eq!(repository_of_manifest("descriptions/app.md"), None);
    }

    #[tokio::test]
    async fn empty_catalog() {
        let (catalog, _, _) = setup();
        assert!(catalog.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repositories_appear_with_their_first_manifest() {
        let (catalog, manifests, tags) = setup();
        let digest = Digest::compute(b"{}");

        tags.put(&repo("tag-only"), &Tag::parse("latest").unwrap(), &digest)
            .await
            .unwrap();
        assert!(catalog.list().await.unwrap().is_empty());

        for name in ["zeta", "library/alpine", "alpha"] {
            manifests.put(&repo(name), &digest, b"{}", None).await.unwrap();
        }
        assert_eq!(
            catalog.list().await.unwrap(),
            vec!["alpha", "library/alpine", "zeta"]
        );

        manifests.delete(&repo("zeta"), &digest).await.unwrap();
        assert_eq!(catalog.list().await.unwrap(), vec!["alpha", "library/alpine"]);
    }

    #[tokio::test]
    async fn summaries_and_stats() {
        let (catalog, manifests, tags) = setup();
        let digest = Digest::compute(b"{}");

        manifests.put(&repo("one"), &digest, b"{}", None).await.unwrap();
        manifests.put(&repo("two"), &digest, b"{}", None).await.unwrap();
        for name in ["latest", "v1"] {
            tags.put(&repo("one"), &Tag::parse(name).unwrap(), &digest)
                .await
                .unwrap();
        }

        assert_eq!(
            catalog.summaries().await.unwrap(),
            vec![
                RepositorySummary {
                    name: "one".into(),
                    tag_count: 2
                },
                RepositorySummary {
                    name: "two".into(),
                    tag_count: 0
                },
            ]
        );

        let stats = catalog.stats().await.unwrap();
        assert_eq!(stats.repository_count, 2);
        assert_eq!(stats.total_tags, 2);
        assert!(stats.total_size >= 4);
    }

    #[tokio::test]
    async fn stats_count_stored_content_only() {
        let storage: Storage = MemoryStorage::new().into();
        let bucket = storage.bucket("test");
        let catalog = Catalog::new(bucket.clone());
        let manifests = ManifestStore::new(bucket.clone());
        let digest = Digest::compute(b"{}");

        manifests.put(&repo("app"), &digest, b"{}", None).await.unwrap();
        let before = catalog.stats().await.unwrap().total_size;

        bucket
            .write(Utf8Path::new("uploads/abandoned"), &[0; 1024])
            .await
            .unwrap();
        catalog
            .set_description(&repo("app"), "A description")
            .await
            .unwrap();
        assert_eq!(catalog.stats().await.unwrap().total_size, before);

        bucket
            .write(Utf8Path::new("blobs/sha256/00/00/layer"), &[0; 16])
            .await
            .unwrap();
        assert_eq!(catalog.stats().await.unwrap().total_size, before + 16);
    }

    #[tokio::test]
    async fn descriptions() {
        let (catalog, _, _) = setup();
        let repository = repo("library/app");

        assert_eq!(catalog.description(&repository).await.unwrap(), "");
        catalog
            .set_description(&repository, "# App\nSmall image.")
            .await
            .unwrap();
        assert_eq!(
            catalog.description(&repository).await.unwrap(),
            "# App\nSmall image."
        );
    }
}
