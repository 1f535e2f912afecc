//! Resumable, chunked blob uploads.
//!
//! An upload session accumulates bytes in a backing object under `uploads/<id>`
//! until the client completes it with the digest it expects. Completion hashes
//! everything that was received, and only when the hash matches is the backing
//! object renamed into its content-addressed location. Nothing a client sends
//! is visible as a blob before that check passes.
//!
//! ```text
//!            append
//!           +------+
//!           v      |
//! start -> Active -+-- complete --> Committing --> Completed
//!           |  ^                        |
//!           |  +------ digest mismatch -+
//!           |
//!           +-- cancel --> Canceled
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use dashmap::DashMap;
use storage::StorageBucket;
use tokio::io::AsyncBufReadExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::blob::blob_path;
use crate::digest::{Digest, Digester};
use crate::error::{RegistryError, RegistryResult, not_found_as};

/// Identifier of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadId(Uuid);

impl UploadId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id supplied by a client.
    ///
    /// Anything which could not have been issued by this registry is reported
    /// as an unknown upload.
    pub fn parse(value: &str) -> RegistryResult<Self> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|_| RegistryError::BlobUploadUnknown(value.to_string()))
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

/// Lifecycle state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Accepting chunks.
    Active,
    /// Verifying and committing content.
    Committing,
    /// Content was committed as a blob.
    Completed,
    /// Content was discarded.
    Canceled,
}

impl UploadState {
    fn is_terminal(self) -> bool {
        matches!(self, UploadState::Completed | UploadState::Canceled)
    }
}

/// Server side record of one upload.
#[derive(Debug)]
pub struct UploadSession {
    id: UploadId,
    offset: u64,
    started: Instant,
    state: UploadState,
}

impl UploadSession {
    fn new(id: UploadId) -> Self {
        Self {
            id,
            offset: 0,
            started: Instant::now(),
            state: UploadState::Active,
        }
    }

    /// Session id.
    pub fn id(&self) -> UploadId {
        self.id
    }

    /// Number of bytes received so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Current state.
    pub fn state(&self) -> UploadState {
        self.state
    }

    fn path(&self) -> Utf8PathBuf {
        upload_path(self.id)
    }

    fn ensure_active(&self) -> RegistryResult<()> {
        if self.state == UploadState::Active {
            Ok(())
        } else {
            Err(RegistryError::BlobUploadUnknown(self.id.to_string()))
        }
    }
}

fn upload_path(id: UploadId) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("uploads/{id}"))
}

/// Shared handle to a session. Operations on one session serialize on its lock.
pub type SessionHandle = Arc<Mutex<UploadSession>>;

/// The table of live upload sessions.
///
/// Only the table itself needs to be concurrent: every session carries its own
/// lock, so unrelated uploads never wait on each other.
pub trait SessionTable: fmt::Debug + Send + Sync {
    /// Track a new session.
    fn insert(&self, session: UploadSession) -> SessionHandle;

    /// Look up a live session.
    fn get(&self, id: &UploadId) -> Option<SessionHandle>;

    /// Stop tracking a session.
    fn remove(&self, id: &UploadId) -> Option<SessionHandle>;

    /// Number of live sessions.
    fn len(&self) -> usize;

    /// Whether there are no live sessions.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Session table backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct DashMapSessions {
    sessions: DashMap<UploadId, SessionHandle>,
}

impl SessionTable for DashMapSessions {
    fn insert(&self, session: UploadSession) -> SessionHandle {
        let id = session.id;
        let handle = Arc::new(Mutex::new(session));
        self.sessions.insert(id, handle.clone());
        handle
    }

    fn get(&self, id: &UploadId) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    fn remove(&self, id: &UploadId) -> Option<SessionHandle> {
        self.sessions.remove(id).map(|(_, handle)| handle)
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}

/// Progress of a live upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadStatus {
    /// Bytes received so far.
    pub offset: u64,
    /// Time since the session was started.
    pub age: Duration,
}

/// Manages upload sessions and commits finished uploads as blobs.
#[derive(Debug, Clone)]
pub struct UploadSessions {
    bucket: StorageBucket,
    table: Arc<dyn SessionTable>,
}

impl UploadSessions {
    /// Create a session manager using the default session table.
    pub fn new(bucket: StorageBucket) -> Self {
        Self::with_table(bucket, Arc::new(DashMapSessions::default()))
    }

    /// Create a session manager with a custom session table.
    pub fn with_table(bucket: StorageBucket, table: Arc<dyn SessionTable>) -> Self {
        Self { bucket, table }
    }

    /// Number of live sessions.
    pub fn active(&self) -> usize {
        self.table.len()
    }

    fn handle(&self, id: UploadId) -> RegistryResult<SessionHandle> {
        self.table
            .get(&id)
            .ok_or_else(|| RegistryError::BlobUploadUnknown(id.to_string()))
    }

    /// Begin a new upload with empty backing storage.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> RegistryResult<UploadId> {
        let id = UploadId::generate();
        self.bucket.write(&upload_path(id), &[]).await?;
        self.table.insert(UploadSession::new(id));
        tracing::debug!(%id, "Started upload");
        Ok(id)
    }

    /// Append a chunk, returning the new offset.
    ///
    /// When `expected_start` is given it must equal the current offset,
    /// otherwise nothing is written.
    #[tracing::instrument(skip(self, chunk), fields(%id, len = chunk.len()))]
    pub async fn append(
        &self,
        id: UploadId,
        chunk: &[u8],
        expected_start: Option<u64>,
    ) -> RegistryResult<u64> {
        let handle = self.handle(id)?;
        let mut session = handle.lock().await;
        session.ensure_active()?;

        if let Some(start) = expected_start {
            if start != session.offset {
                return Err(RegistryError::RangeInvalid {
                    expected: session.offset,
                    actual: start,
                });
            }
        }

        if !chunk.is_empty() {
            session.offset = self
                .bucket
                .append(&session.path(), chunk)
                .await
                .map_err(not_found_as(|| RegistryError::BlobUploadUnknown(id.to_string())))?;
        }
        tracing::trace!(offset = session.offset, "Appended chunk");
        Ok(session.offset)
    }

    /// Current progress of an upload.
    pub async fn status(&self, id: UploadId) -> RegistryResult<UploadStatus> {
        let handle = self.handle(id)?;
        let session = handle.lock().await;
        if session.state.is_terminal() {
            return Err(RegistryError::BlobUploadUnknown(id.to_string()));
        }
        Ok(UploadStatus {
            offset: session.offset,
            age: session.started.elapsed(),
        })
    }

    /// Finish an upload, committing it as a blob under `declared`.
    ///
    /// On a digest mismatch no blob is created, `final_chunk` is dropped and the
    /// session goes back to accepting chunks at its previous offset.
    #[tracing::instrument(skip(self, final_chunk), fields(%id, %declared, len = final_chunk.len()))]
    pub async fn complete(
        &self,
        id: UploadId,
        declared: &Digest,
        final_chunk: &[u8],
    ) -> RegistryResult<u64> {
        let handle = self.handle(id)?;
        let mut session = handle.lock().await;
        session.ensure_active()?;
        session.state = UploadState::Committing;

        match self.commit(&mut session, declared, final_chunk).await {
            Ok(()) => {
                session.state = UploadState::Completed;
                self.table.remove(&id);
                tracing::debug!(size = session.offset, "Completed upload");
                Ok(session.offset)
            }
            Err(err) => {
                session.state = UploadState::Active;
                Err(err)
            }
        }
    }

    async fn commit(
        &self,
        session: &mut UploadSession,
        declared: &Digest,
        final_chunk: &[u8],
    ) -> RegistryResult<()> {
        let path = session.path();
        let id = session.id;
        let unknown = move || RegistryError::BlobUploadUnknown(id.to_string());

        let mut digester = Digester::new(declared.algorithm());
        let mut reader = self.bucket.open(&path).await.map_err(not_found_as(unknown))?;
        loop {
            let buf = reader.fill_buf().await?;
            let len = buf.len();
            if len == 0 {
                break;
            }
            digester.update(buf);
            reader.consume(len);
        }
        digester.update(final_chunk);

        if let Err(err) = declared.matches(&digester.finish()) {
            tracing::warn!("Upload content does not match: {err}");
            return Err(err);
        }

        if !final_chunk.is_empty() {
            session.offset = self
                .bucket
                .append(&path, final_chunk)
                .await
                .map_err(not_found_as(unknown))?;
        }
        self.bucket.rename(&path, &blob_path(declared)).await?;
        Ok(())
    }

    /// Abandon an upload and discard everything it received.
    #[tracing::instrument(skip(self), fields(%id))]
    pub async fn cancel(&self, id: UploadId) -> RegistryResult<()> {
        let handle = self.handle(id)?;
        let mut session = handle.lock().await;
        if session.state.is_terminal() {
            return Err(RegistryError::BlobUploadUnknown(id.to_string()));
        }

        match self.bucket.delete(&session.path()).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }

        session.state = UploadState::Canceled;
        self.table.remove(&id);
        tracing::debug!("Canceled upload");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::blob::BlobStore;
    use storage::{MemoryStorage, Storage};

    fn setup() -> (UploadSessions, BlobStore) {
        let storage: Storage = MemoryStorage::new().into();
        let bucket = storage.bucket("test");
        (UploadSessions::new(bucket.clone()), BlobStore::new(bucket))
    }

    #[tokio::test]
    async fn chunked_upload() {
        let (uploads, blobs) = setup();
        let id = uploads.start().await.unwrap();

        assert_eq!(uploads.append(id, b"ab", None).await.unwrap(), 2);
        assert_eq!(uploads.append(id, b"cd", None).await.unwrap(), 4);
        assert_eq!(uploads.status(id).await.unwrap().offset, 4);

        let digest = Digest::compute(b"abcd");
        assert!(!blobs.exists(&digest).await.unwrap());

        assert_eq!(uploads.complete(id, &digest, b"").await.unwrap(), 4);
        assert_eq!(blobs.size(&digest).await.unwrap(), 4);
        assert_eq!(uploads.active(), 0);
    }

    #[tokio::test]
    async fn final_chunk_is_part_of_the_blob() {
        let (uploads, blobs) = setup();
        let id = uploads.start().await.unwrap();
        uploads.append(id, b"hello ", None).await.unwrap();

        let digest = Digest::compute(b"hello world");
        uploads.complete(id, &digest, b"world").await.unwrap();
        assert_eq!(blobs.size(&digest).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn empty_upload() {
        let (uploads, blobs) = setup();
        let id = uploads.start().await.unwrap();
        assert_eq!(uploads.status(id).await.unwrap().offset, 0);

        let digest = Digest::compute(b"");
        uploads.complete(id, &digest, b"").await.unwrap();
        assert_eq!(blobs.size(&digest).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mismatch_reverts_to_active() {
        let (uploads, blobs) = setup();
        let id = uploads.start().await.unwrap();
        uploads.append(id, b"abc", None).await.unwrap();

        let wrong = Digest::compute(b"something else");
        let err = uploads.complete(id, &wrong, b"d").await.unwrap_err();
        assert_eq!(err.error_code(), "DIGEST_INVALID");

        assert!(!blobs.exists(&wrong).await.unwrap());
        assert!(!blobs.exists(&Digest::compute(b"abcd")).await.unwrap());
        assert_eq!(uploads.status(id).await.unwrap().offset, 3);

        uploads.append(id, b"d", Some(3)).await.unwrap();
        let digest = Digest::compute(b"abcd");
        uploads.complete(id, &digest, b"").await.unwrap();
        assert!(blobs.exists(&digest).await.unwrap());
    }

    #[tokio::test]
    async fn declared_algorithm_is_used() {
        let (uploads, blobs) = setup();
        let id = uploads.start().await.unwrap();
        uploads.append(id, b"payload", None).await.unwrap();

        let digest = Digest::compute_with(crate::digest::Algorithm::Sha512, b"payload");
        uploads.complete(id, &digest, b"").await.unwrap();
        assert!(blobs.exists(&digest).await.unwrap());
    }

    #[tokio::test]
    async fn range_must_continue_from_offset() {
        let (uploads, _) = setup();
        let id = uploads.start().await.unwrap();
        uploads.append(id, b"abc", Some(0)).await.unwrap();

        let err = uploads.append(id, b"xyz", Some(1)).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::RangeInvalid {
                expected: 3,
                actual: 1
            }
        ));
        assert_eq!(uploads.status(id).await.unwrap().offset, 3);
    }

    #[tokio::test]
    async fn finished_sessions_are_unknown() {
        let (uploads, _) = setup();
        let id = uploads.start().await.unwrap();
        uploads.complete(id, &Digest::compute(b""), b"").await.unwrap();

        for err in [
            uploads.append(id, b"late", None).await.unwrap_err(),
            uploads.status(id).await.unwrap_err(),
            uploads.cancel(id).await.unwrap_err(),
        ] {
            assert_eq!(err.error_code(), "BLOB_UPLOAD_UNKNOWN");
        }
    }

    #[tokio::test]
    async fn cancel_discards_content() {
        let storage: Storage = MemoryStorage::new().into();
        let bucket = storage.bucket("test");
        let uploads = UploadSessions::new(bucket.clone());

        let id = uploads.start().await.unwrap();
        uploads.append(id, b"discard me", None).await.unwrap();
        uploads.cancel(id).await.unwrap();

        assert!(bucket.list(None).await.unwrap().is_empty());
        assert!(matches!(
            uploads.append(id, b"more", None).await.unwrap_err(),
            RegistryError::BlobUploadUnknown(_)
        ));
    }

    #[tokio::test]
    async fn unknown_ids() {
        let (uploads, _) = setup();
        assert!(UploadId::parse("not-a-uuid").is_err());

        let id = UploadId::parse("6f1c1b0e-7c2b-4d5e-9a3f-0b1c2d3e4f50").unwrap();
        assert!(matches!(
            uploads.status(id).await.unwrap_err(),
            RegistryError::BlobUploadUnknown(_)
        ));
    }

    #[tokio::test]
    async fn concurrent_starts_are_distinct() {
        let (uploads, _) = setup();
        let ids = futures::future::join_all((0..32).map(|_| uploads.start())).await;
        let ids: HashSet<UploadId> = ids.into_iter().map(Result::unwrap).collect();
        assert_eq!(ids.len(), 32);
        assert_eq!(uploads.active(), 32);
    }

    #[tokio::test]
    async fn concurrent_sessions_do_not_interfere() {
        let (uploads, blobs) = setup();
        let first = uploads.start().await.unwrap();
        let second = uploads.start().await.unwrap();

        let (a, b) = tokio::join!(
            uploads.append(first, b"first", None),
            uploads.append(second, b"second", None)
        );
        assert_eq!(a.unwrap(), 5);
        assert_eq!(b.unwrap(), 6);

        uploads
            .complete(first, &Digest::compute(b"first"), b"")
            .await
            .unwrap();
        uploads
            .complete(second, &Digest::compute(b"second"), b"")
            .await
            .unwrap();
        assert!(blobs.exists(&Digest::compute(b"first")).await.unwrap());
        assert!(blobs.exists(&Digest::compute(b"second")).await.unwrap());
    }
}
