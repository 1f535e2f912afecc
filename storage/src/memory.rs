use std::collections::HashMap;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::{io::AsyncWriteExt, sync::RwLock};

use storage_driver::{
    Driver, Metadata, ReadStream, Reader, StorageError, StorageErrorKind, Writer,
};

const ENGINE: &str = "memory";

fn bucket_not_found(bucket: &str) -> StorageError {
    StorageError::builder(
        ENGINE,
        StorageErrorKind::NotFound,
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("Bucket not found: {bucket}"),
        ),
    )
    .bucket(bucket)
    .context("bucket not found")
    .build()
}

fn path_not_found(bucket: &str, remote: &Utf8Path) -> StorageError {
    StorageError::builder(
        ENGINE,
        StorageErrorKind::NotFound,
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("Path not found: {remote}"),
        ),
    )
    .bucket(bucket)
    .path(remote.as_str())
    .context("path not found")
    .build()
}

#[derive(Debug)]
struct MemoryFileItem {
    created: DateTime<Utc>,
    data: Vec<u8>,
}

impl From<Vec<u8>> for MemoryFileItem {
    fn from(data: Vec<u8>) -> Self {
        Self {
            created: Utc::now(),
            data,
        }
    }
}

impl From<&MemoryFileItem> for Metadata {
    fn from(value: &MemoryFileItem) -> Self {
        Self {
            created: value.created,
            size: value.data.len() as u64,
        }
    }
}

type Bucket = HashMap<Utf8PathBuf, MemoryFileItem>;

/// Storage driver that stores files in memory.
///
/// Every mutation happens under a single write lock, so uploads, appends and
/// renames are trivially atomic with respect to readers.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryStorage {
    /// Create a new `MemoryStorage` instance, with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `MemoryStorage` instance, with the given buckets.
    pub fn with_buckets(buckets: &[&str]) -> Self {
        let map = buckets
            .iter()
            .map(|bucket| (bucket.to_string(), HashMap::new()))
            .collect();

        Self {
            buckets: RwLock::new(map),
        }
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        Ok(bucket_map
            .get(remote)
            .ok_or_else(|| path_not_found(bucket, remote))?
            .into())
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets
            .get_mut(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?;
        bucket_map
            .remove(remote)
            .ok_or_else(|| path_not_found(bucket, remote))?;

        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let mut buf = Vec::new();

        tokio::io::copy_buf(local, &mut buf)
            .await
            .map_err(|err| StorageError::io(ENGINE, err).at(bucket, remote.as_str()))?;

        buf.shutdown()
            .await
            .map_err(|err| StorageError::io(ENGINE, err).at(bucket, remote.as_str()))?;

        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets.entry(bucket.to_string()).or_default();
        bucket_map.insert(remote.to_owned(), buf.into());

        Ok(())
    }

    async fn open(&self, bucket: &str, remote: &Utf8Path) -> Result<ReadStream, StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        let item = bucket_map
            .get(remote)
            .ok_or_else(|| path_not_found(bucket, remote))?;

        Ok(Box::new(io::Cursor::new(item.data.clone())))
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let buckets = self.buckets.read().await;
        let bucket_map = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        let item = bucket_map
            .get(remote)
            .ok_or_else(|| path_not_found(bucket, remote))?;

        local
            .write_all(&item.data)
            .await
            .map_err(|err| StorageError::io(ENGINE, err).at(bucket, remote.as_str()))?;

        local
            .flush()
            .await
            .map_err(|err| StorageError::io(ENGINE, err).at(bucket, remote.as_str()))?;

        Ok(())
    }

    async fn append(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        data: &[u8],
    ) -> Result<u64, StorageError> {
        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets.entry(bucket.to_string()).or_default();
        let item = bucket_map
            .entry(remote.to_owned())
            .or_insert_with(|| Vec::new().into());
        item.data.extend_from_slice(data);
        Ok(item.data.len() as u64)
    }

    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        let bucket_map = buckets
            .get_mut(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?;
        let item = bucket_map
            .remove(from)
            .ok_or_else(|| path_not_found(bucket, from))?;
        bucket_map.insert(to.to_owned(), item);
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        tracing::trace!(%bucket, ?prefix, "list memory bucket");

        let buckets = self.buckets.read().await;
        let Some(bucket_map) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };

        Ok(bucket_map
            .keys()
            .filter(|path| prefix.map_or(true, |prefix| path.starts_with(prefix)))
            .map(|path| path.to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_open_roundtrip() {
        let storage = MemoryStorage::with_buckets(&["test"]);
        let remote = Utf8Path::new("dir/file");
        storage
            .upload("test", remote, &mut &b"contents"[..])
            .await
            .unwrap();

        let mut reader = storage.open("test", remote).await.unwrap();
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf)
            .await
            .unwrap();
        assert_eq!(buf, b"contents");
    }

    #[tokio::test]
    async fn append_creates_and_extends() {
        let storage = MemoryStorage::new();
        let remote = Utf8Path::new("uploads/id");
        assert_eq!(storage.append("test", remote, b"ab").await.unwrap(), 2);
        assert_eq!(storage.append("test", remote, b"cde").await.unwrap(), 5);
        assert_eq!(storage.metadata("test", remote).await.unwrap().size, 5);
    }

    #[tokio::test]
    async fn rename_moves_object() {
        let storage = MemoryStorage::new();
        storage
            .append("test", Utf8Path::new("uploads/id"), b"data")
            .await
            .unwrap();
        storage
            .rename("test", Utf8Path::new("uploads/id"), Utf8Path::new("blobs/x"))
            .await
            .unwrap();

        assert!(storage
            .metadata("test", Utf8Path::new("uploads/id"))
            .await
            .unwrap_err()
            .is_not_found());
        assert_eq!(
            storage
                .metadata("test", Utf8Path::new("blobs/x"))
                .await
                .unwrap()
                .size,
            4
        );
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let storage = MemoryStorage::with_buckets(&["test"]);
        let err = storage
            .delete("test", Utf8Path::new("missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_matches_whole_components() {
        let storage = MemoryStorage::new();
        for remote in ["repositories/a/tags/latest", "repositories/ab/tags/latest"] {
            storage
                .append("test", Utf8Path::new(remote), b"x")
                .await
                .unwrap();
        }

        let items = storage
            .list("test", Some(Utf8Path::new("repositories/a")))
            .await
            .unwrap();
        assert_eq!(items, vec!["repositories/a/tags/latest"]);

        let missing = storage.list("nope", None).await.unwrap();
        assert!(missing.is_empty());
    }
}
