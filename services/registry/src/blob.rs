//! Content-addressed blob persistence.

use std::fmt;

use camino::Utf8PathBuf;
use storage::{ReadStream, StorageBucket};

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult, not_found_as};

/// Storage key for a blob.
///
/// Blobs are sharded by the first two pairs of hex characters so that no
/// directory grows without bound: `blobs/sha256/ab/cd/abcd...`.
pub(crate) fn blob_path(digest: &Digest) -> Utf8PathBuf {
    let hex = digest.hex();
    Utf8PathBuf::from(format!(
        "blobs/{}/{}/{}/{}",
        digest.algorithm(),
        &hex[..2],
        &hex[2..4],
        hex
    ))
}

/// An open blob, ready to be streamed to a client.
pub struct BlobReader {
    /// Size of the blob in bytes.
    pub size: u64,

    /// Blob content.
    pub stream: ReadStream,
}

impl fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobReader")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Blob storage, keyed purely by digest.
///
/// Blobs are global to the registry: the repository in a blob request only
/// scopes the URL, not the content.
#[derive(Debug, Clone)]
pub struct BlobStore {
    bucket: StorageBucket,
}

impl BlobStore {
    /// Create a blob store over a storage bucket.
    pub fn new(bucket: StorageBucket) -> Self {
        Self { bucket }
    }

    /// Verify `data` against `digest`, then persist it.
    ///
    /// Nothing is written when the content does not hash to `digest`. Storing
    /// the same digest twice is harmless, the driver replaces the object
    /// atomically with identical bytes.
    #[tracing::instrument(skip(self, data), fields(%digest, len = data.len()))]
    pub async fn put(&self, digest: &Digest, data: &[u8]) -> RegistryResult<()> {
        if let Err(err) = digest.verify(data) {
            tracing::warn!("Rejected blob: {err}");
            return Err(err);
        }

        self.bucket.write(&blob_path(digest), data).await?;
        tracing::debug!("Stored blob");
        Ok(())
    }

    /// Open a blob for reading.
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn get(&self, digest: &Digest) -> RegistryResult<BlobReader> {
        let path = blob_path(digest);
        let missing = || RegistryError::BlobNotFound(digest.to_string());

        let size = self
            .bucket
            .metadata(&path)
            .await
            .map_err(not_found_as(missing))?
            .size;
        let stream = self.bucket.open(&path).await.map_err(not_found_as(missing))?;

        Ok(BlobReader { size, stream })
    }

    /// Size of a stored blob.
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn size(&self, digest: &Digest) -> RegistryResult<u64> {
        let metadata = self
            .bucket
            .metadata(&blob_path(digest))
            .await
            .map_err(not_found_as(|| RegistryError::BlobNotFound(digest.to_string())))?;
        Ok(metadata.size)
    }

    /// Whether a blob is stored.
    pub async fn exists(&self, digest: &Digest) -> RegistryResult<bool> {
        match self.size(digest).await {
            Ok(_) => Ok(true),
            Err(RegistryError::BlobNotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Delete a blob.
    ///
    /// Manifests referring to the blob are not checked.
    #[tracing::instrument(skip(self), fields(%digest))]
    pub async fn delete(&self, digest: &Digest) -> RegistryResult<()> {
        self.bucket
            .delete(&blob_path(digest))
            .await
            .map_err(not_found_as(|| RegistryError::BlobNotFound(digest.to_string())))?;
        tracing::debug!("Deleted blob");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::MemoryStorage;
    use storage::Storage;
    use tokio::io::AsyncReadExt;

    fn store() -> BlobStore {
        let storage: Storage = MemoryStorage::new().into();
        BlobStore::new(storage.bucket("test"))
    }

    #[test]
    fn paths_are_sharded() {
        let digest = Digest::compute(b"");
        assert_eq!(
            blob_path(&digest).as_str(),
            "blobs/sha256/e3/b0/e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn put_then_get() {
        let blobs = store();
        let data = b"test data";
        let digest = Digest::compute(data);

        blobs.put(&digest, data).await.unwrap();
        assert!(blobs.exists(&digest).await.unwrap());
        assert_eq!(blobs.size(&digest).await.unwrap(), data.len() as u64);

        let mut reader = blobs.get(&digest).await.unwrap();
        assert_eq!(reader.size, data.len() as u64);
        let mut content = Vec::new();
        reader.stream.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, data);
    }

    #[tokio::test]
    async fn put_twice_is_idempotent() {
        let blobs = store();
        let digest = Digest::compute(b"same");

        blobs.put(&digest, b"same").await.unwrap();
        blobs.put(&digest, b"same").await.unwrap();
        assert_eq!(blobs.size(&digest).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn mismatched_content_is_not_stored() {
        let blobs = store();
        let digest = Digest::compute(b"expected");

        let err = blobs.put(&digest, b"actual").await.unwrap_err();
        assert_eq!(err.error_code(), "DIGEST_INVALID");
        assert!(!blobs.exists(&digest).await.unwrap());
        assert!(!blobs.exists(&Digest::compute(b"actual")).await.unwrap());
    }

    #[tokio::test]
    async fn missing_blobs() {
        let blobs = store();
        let digest = Digest::compute(b"never stored");

        assert!(matches!(
            blobs.get(&digest).await.unwrap_err(),
            RegistryError::BlobNotFound(_)
        ));
        assert!(matches!(
            blobs.delete(&digest).await.unwrap_err(),
            RegistryError::BlobNotFound(_)
        ));
    }

    #[tokio::test]
    async fn delete_removes_blob() {
        let blobs = store();
        let digest = Digest::compute(b"gone");

        blobs.put(&digest, b"gone").await.unwrap();
        blobs.delete(&digest).await.unwrap();
        assert!(!blobs.exists(&digest).await.unwrap());
    }
}
