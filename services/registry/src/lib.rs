//! # Container Registry
//!
//! A content-addressed container image registry speaking the distribution
//! (`/v2/`) protocol.
//!
//! ## Features
//!
//! - Blob storage keyed by digest, verified before anything becomes visible
//! - Resumable chunked uploads
//! - Manifests with media types, and mutable tags pointing at them
//! - A repository catalog derived from stored manifests
//! - Pluggable storage backend via the `storage` crate
//! - Optional basic authentication for uploads
//!
//! ## Example
//!
//! ```no_run
//! use registry::RegistryBuilder;
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryStorage::with_buckets(&["registry"]);
//! let registry = RegistryBuilder::new()
//!     .storage(storage.into())
//!     .bucket("registry")
//!     .build();
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:5000").await?;
//! axum::serve(listener, registry).await?;
//! # Ok(())
//! # }
//! ```
//!
//! The stores behind the HTTP layer can also be used directly through
//! [`RegistryStorage`].

mod api;
mod blob;
mod catalog;
pub mod config;
mod digest;
mod error;
mod manifest;
mod reference;
mod storage;
mod tag;
mod upload;

pub use api::{BasicAuth, RegistryBuilder};
pub use blob::{BlobReader, BlobStore};
pub use catalog::{Catalog, RegistryStats, RepositorySummary};
pub use digest::{Algorithm, Digest, Digester};
pub use error::{RegistryError, RegistryResult};
pub use manifest::{DEFAULT_MEDIA_TYPE, Manifest, ManifestInfo, ManifestStore};
pub use reference::{Reference, Repository, Tag};
pub use crate::storage::RegistryStorage;
pub use tag::TagIndex;
pub use upload::{
    DashMapSessions, SessionHandle, SessionTable, UploadId, UploadSession, UploadSessions,
    UploadState, UploadStatus,
};
