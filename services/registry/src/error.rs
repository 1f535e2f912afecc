//! Error types for the registry

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Blob not found
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Upload session not found, or no longer accepting data
    #[error("blob upload unknown: {0}")]
    BlobUploadUnknown(String),

    /// Blob upload invalid
    #[error("blob upload invalid: {0}")]
    BlobUploadInvalid(String),

    /// A chunk did not start where the previous one ended
    #[error("chunk starts at {actual}, but the upload is at offset {expected}")]
    RangeInvalid {
        /// Offset the session is at
        expected: u64,
        /// Offset the client claimed
        actual: u64,
    },

    /// Invalid digest format
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// Digest mismatch
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Expected digest
        expected: String,
        /// Actual digest
        actual: String,
    },

    /// Manifest not found
    #[error("manifest not found: {0}")]
    ManifestNotFound(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Invalid repository name
    #[error("invalid repository name: {0}")]
    InvalidRepository(String),

    /// Repository not known to the registry
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    /// Reference is neither a digest nor a valid tag
    #[error("invalid tag: {0}")]
    InvalidTag(String),

    /// Missing or wrong credentials
    #[error("authentication required")]
    Unauthorized,

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Get the error code for distribution API error responses
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::BlobNotFound(_) => "BLOB_UNKNOWN",
            RegistryError::BlobUploadUnknown(_) => "BLOB_UPLOAD_UNKNOWN",
            RegistryError::BlobUploadInvalid(_) | RegistryError::RangeInvalid { .. } => {
                "BLOB_UPLOAD_INVALID"
            }
            RegistryError::InvalidDigest(_) | RegistryError::DigestMismatch { .. } => {
                "DIGEST_INVALID"
            }
            RegistryError::ManifestNotFound(_) => "MANIFEST_UNKNOWN",
            RegistryError::InvalidManifest(_) => "MANIFEST_INVALID",
            RegistryError::InvalidRepository(_) => "NAME_INVALID",
            RegistryError::RepositoryNotFound(_) => "NAME_UNKNOWN",
            RegistryError::InvalidTag(_) => "TAG_INVALID",
            RegistryError::Unauthorized => "UNAUTHORIZED",
            RegistryError::Storage(_) | RegistryError::Io(_) => "UNKNOWN",
        }
    }

    /// Whether this error is an internal failure rather than a client mistake.
    pub fn is_internal(&self) -> bool {
        matches!(self, RegistryError::Storage(_) | RegistryError::Io(_))
    }
}

/// Map a storage `NotFound` onto a registry not-found error, keeping every
/// other storage failure as an internal error.
pub(crate) fn not_found_as<F>(missing: F) -> impl FnOnce(storage::StorageError) -> RegistryError
where
    F: FnOnce() -> RegistryError,
{
    move |err| {
        if err.is_not_found() {
            missing()
        } else {
            RegistryError::Storage(err)
        }
    }
}
