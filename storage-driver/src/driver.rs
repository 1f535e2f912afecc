use std::{fmt, ops::Deref, sync::Arc};

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use eyre::WrapErr;
use tokio::io::{self, AsyncWriteExt};

use crate::error::{StorageError, StorageErrorKind};

/// A reader stream for file contents.
pub type Reader<'r> = dyn io::AsyncBufRead + Unpin + Send + Sync + 'r;

/// A writer stream for file contents.
pub type Writer<'w> = dyn io::AsyncWrite + Unpin + Send + Sync + 'w;

/// An owned reader stream, returned when opening an object for streaming.
pub type ReadStream = Box<Reader<'static>>;

/// File object metadata, which will be generically provided by the driver.
///
/// This struct only provides common metadata fields, and drivers may provide more specific
/// metadata fields directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    /// The size of the file in bytes.
    pub size: u64,

    /// The creation timestamp of the file.
    pub created: DateTime<Utc>,
}

/// A storage driver, which provides the ability to interact with a storage backend.
///
/// Every driver must provide read-after-write consistency within a single process:
/// once `upload`, `append` or `rename` returns, every later read observes the change.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// The name of the driver.
    fn name(&self) -> &'static str;

    /// Delete a file from the storage, by path.
    ///
    /// Missing files are reported with [`StorageErrorKind::NotFound`].
    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError>;

    /// Get the metadata for a file, by path.
    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError>;

    /// Upload a file to the storage, using a reader stream to provide the contents.
    ///
    /// Uploads replace the destination atomically: a concurrent reader sees either
    /// the previous contents or the complete new contents, never a prefix.
    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError>;

    /// Open a file for streaming reads.
    async fn open(&self, bucket: &str, remote: &Utf8Path) -> Result<ReadStream, StorageError>;

    /// Download a file from storage, into a writer stream.
    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let mut reader = self.open(bucket, remote).await?;
        tokio::io::copy_buf(&mut reader, writer)
            .await
            .wrap_err("copy into writer")
            .map_err(StorageError::with(self.name(), StorageErrorKind::Io))?;
        writer
            .flush()
            .await
            .wrap_err("flush writer")
            .map_err(StorageError::with(self.name(), StorageErrorKind::Io))?;
        Ok(())
    }

    /// Append bytes to the end of a file, creating it if it does not exist.
    ///
    /// Returns the size of the file after the append.
    async fn append(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        data: &[u8],
    ) -> Result<u64, StorageError>;

    /// Move a file to a new path, replacing anything already stored there.
    ///
    /// The destination never holds partial contents.
    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError>;

    /// List the files in a bucket, optionally filtered by a prefix.
    ///
    /// Paths are returned relative to the bucket root. A prefix that does not
    /// exist yields an empty list.
    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError>;
}

#[async_trait::async_trait]
impl<D> Driver for Arc<D>
where
    D: ?Sized + Driver + Sync + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        self.deref().delete(bucket, remote).await
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.deref().metadata(bucket, remote).await
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        self.deref().upload(bucket, remote, reader).await
    }

    async fn open(&self, bucket: &str, remote: &Utf8Path) -> Result<ReadStream, StorageError> {
        self.deref().open(bucket, remote).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        self.deref().download(bucket, remote, writer).await
    }

    async fn append(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        data: &[u8],
    ) -> Result<u64, StorageError> {
        self.deref().append(bucket, remote, data).await
    }

    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.deref().rename(bucket, from, to).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.deref().list(bucket, prefix).await
    }
}
