use std::io;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use eyre::WrapErr;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use storage_driver::{
    Driver, Metadata, ReadStream, Reader, StorageError, StorageErrorKind, Writer,
};

const ENGINE: &str = "local";

/// Directory (under the driver root) holding partially written uploads.
const STAGING: &str = ".staging";

/// Storage driver backed by a directory on the local filesystem.
///
/// Objects live at `<root>/<bucket>/<path>`. Uploads are written to a staging
/// file under `<root>/.staging` and renamed into place, so the destination is
/// replaced atomically.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at `root`. The directory is created lazily.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    /// The root directory of this driver.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Result<Utf8PathBuf, StorageError> {
        let escapes = |p: &Utf8Path| {
            p.components()
                .any(|c| !matches!(c, Utf8Component::Normal(_)))
        };

        if bucket.is_empty() || escapes(Utf8Path::new(bucket)) || escapes(remote) {
            return Err(StorageError::builder(
                ENGINE,
                StorageErrorKind::InvalidRequest,
                format!("path escapes the storage root: {bucket}/{remote}"),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build());
        }

        let mut path = self.root.join(bucket);
        path.push(remote);
        Ok(path)
    }

    fn staging_path(&self) -> Utf8PathBuf {
        self.root
            .join(STAGING)
            .join(uuid::Uuid::new_v4().simple().to_string())
    }
}

fn io_error<'a>(
    bucket: &'a str,
    remote: &'a Utf8Path,
    context: &'static str,
) -> impl FnOnce(io::Error) -> StorageError + 'a {
    move |err| {
        StorageError::builder(ENGINE, err.kind().into(), err)
            .bucket(bucket)
            .path(remote.as_str())
            .context(context)
            .build()
    }
}

async fn create_parent(path: &Utf8Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => tokio::fs::create_dir_all(parent).await,
        None => Ok(()),
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        ENGINE
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let path = self.path(bucket, remote)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(io_error(bucket, remote, "metadata"))?;

        if !metadata.is_file() {
            return Err(StorageError::builder(
                ENGINE,
                StorageErrorKind::NotFound,
                format!("not a file: {path}"),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build());
        }

        // Not every filesystem records a birth time.
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map_err(io_error(bucket, remote, "metadata timestamp"))?;

        Ok(Metadata {
            size: metadata.len(),
            created: created.into(),
        })
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(io_error(bucket, remote, "remove_file"))?;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;
        let staging = self.staging_path();

        create_parent(&staging)
            .await
            .map_err(io_error(bucket, remote, "create staging directory"))?;

        let written = async {
            let mut writer = tokio::io::BufWriter::new(tokio::fs::File::create(&staging).await?);
            tokio::io::copy_buf(local, &mut writer).await?;
            writer.flush().await?;
            writer.into_inner().sync_all().await?;
            create_parent(&path).await?;
            tokio::fs::rename(&staging, &path).await
        }
        .await;

        if let Err(err) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&staging).await {
                tracing::trace!(%staging, "staging cleanup failed: {cleanup}");
            }
            return Err(io_error(bucket, remote, "upload")(err));
        }

        Ok(())
    }

    async fn open(&self, bucket: &str, remote: &Utf8Path) -> Result<ReadStream, StorageError> {
        let path = self.path(bucket, remote)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(io_error(bucket, remote, "open remote file"))?;
        Ok(Box::new(tokio::io::BufReader::new(file)))
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let mut reader = self.open(bucket, remote).await?;

        tokio::io::copy_buf(&mut reader, local)
            .await
            .map_err(io_error(bucket, remote, "copy"))?;

        local
            .flush()
            .await
            .map_err(io_error(bucket, remote, "flush writer"))?;

        Ok(())
    }

    async fn append(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        data: &[u8],
    ) -> Result<u64, StorageError> {
        let path = self.path(bucket, remote)?;

        create_parent(&path)
            .await
            .map_err(io_error(bucket, remote, "create_dir_all"))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_error(bucket, remote, "open for append"))?;

        file.write_all(data)
            .await
            .map_err(io_error(bucket, remote, "append"))?;
        file.sync_data()
            .await
            .map_err(io_error(bucket, remote, "sync"))?;

        let size = file
            .metadata()
            .await
            .map_err(io_error(bucket, remote, "metadata after append"))?
            .len();
        Ok(size)
    }

    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        let source = self.path(bucket, from)?;
        let target = self.path(bucket, to)?;

        create_parent(&target)
            .await
            .map_err(io_error(bucket, to, "create_dir_all"))?;

        tokio::fs::rename(&source, &target)
            .await
            .map_err(io_error(bucket, from, "rename"))?;
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        let base = self.root.join(bucket);
        let target = match prefix {
            Some(part) => self.path(bucket, part)?,
            None => base.clone(),
        };

        let items = tokio::task::spawn_blocking(move || collect_list(&base, &target))
            .in_current_span()
            .await
            .wrap_err("local driver: list task")
            .map_err(StorageError::with(ENGINE, StorageErrorKind::Other))?
            .map_err(|err| {
                let prefix = prefix.map(Utf8Path::as_str).unwrap_or_default();
                StorageError::io(ENGINE, err).at(bucket, prefix)
            })?;

        tracing::debug!("Found {} entries", items.len());

        Ok(items.into_iter().map(|p| p.into_string()).collect())
    }
}

#[tracing::instrument(level = "trace")]
fn collect_list(base: &Utf8Path, target: &Utf8Path) -> io::Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();

    match target.metadata() {
        Ok(meta) if meta.is_dir() => visit(target, &mut files)?,
        Ok(_) => files.push(target.to_owned()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    }

    Ok(files
        .into_iter()
        .filter_map(|p| p.strip_prefix(base).ok().map(|p| p.to_owned()))
        .collect())
}

fn visit(path: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> io::Result<()> {
    for entry in path.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            visit(entry.path(), files)?;
        } else {
            files.push(entry.path().to_owned())
        }
    }

    Ok(())
}
