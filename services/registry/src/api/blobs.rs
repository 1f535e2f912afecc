//! Blob and blob upload endpoints.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio_util::io::ReaderStream;

use super::{AppState, DOCKER_CONTENT_DIGEST, DOCKER_UPLOAD_UUID};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::reference::Repository;
use crate::upload::UploadId;

/// `Range` header value for an upload at `offset`.
///
/// The range is inclusive. An empty upload reports `0-0`.
pub(crate) fn upload_range(offset: u64) -> String {
    format!("0-{}", offset.saturating_sub(1))
}

fn upload_location(repository: &Repository, id: UploadId) -> String {
    format!("/v2/{repository}/blobs/uploads/{id}")
}

/// Response for a session which is still accepting data.
fn upload_accepted(
    status: StatusCode,
    repository: &Repository,
    id: UploadId,
    offset: u64,
) -> Response {
    (
        status,
        [
            (header::LOCATION, upload_location(repository, id)),
            (header::RANGE, upload_range(offset)),
            (DOCKER_UPLOAD_UUID, id.to_string()),
            (header::CONTENT_LENGTH, "0".to_string()),
        ],
    )
        .into_response()
}

/// Response for a blob which has just been committed.
fn blob_created(repository: &Repository, digest: &Digest) -> Response {
    (
        StatusCode::CREATED,
        [
            (header::LOCATION, format!("/v2/{repository}/blobs/{digest}")),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
            (header::CONTENT_LENGTH, "0".to_string()),
        ],
    )
        .into_response()
}

/// The declared start offset from a `Content-Range: <start>-<end>` header.
fn content_range_start(headers: &HeaderMap) -> RegistryResult<Option<u64>> {
    let Some(value) = headers.get(header::CONTENT_RANGE) else {
        return Ok(None);
    };

    let invalid = || RegistryError::BlobUploadInvalid("malformed Content-Range".to_string());
    let value = value.to_str().map_err(|_| invalid())?.trim();
    let value = value.strip_prefix("bytes ").unwrap_or(value);
    let (start, _) = value.split_once('-').ok_or_else(invalid)?;
    start.trim().parse().map(Some).map_err(|_| invalid())
}

/// GET or HEAD a blob.
pub(crate) async fn get_blob(
    state: &AppState,
    name: &str,
    digest: &str,
    head: bool,
) -> RegistryResult<Response> {
    Repository::parse(name)?;
    let digest = Digest::parse(digest)?;

    if head {
        let size = state.storage.blobs().size(&digest).await?;
        return Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (header::CONTENT_LENGTH, size.to_string()),
                (DOCKER_CONTENT_DIGEST, digest.to_string()),
            ],
        )
            .into_response());
    }

    let blob = state.storage.blobs().get(&digest).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, blob.size.to_string()),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
        ],
        Body::from_stream(ReaderStream::new(blob.stream)),
    )
        .into_response())
}

/// DELETE a blob.
pub(crate) async fn delete_blob(
    state: &AppState,
    name: &str,
    digest: &str,
) -> RegistryResult<Response> {
    Repository::parse(name)?;
    let digest = Digest::parse(digest)?;
    state.storage.blobs().delete(&digest).await?;
    Ok(StatusCode::ACCEPTED.into_response())
}

/// POST a new upload, or a whole blob when `?digest=` is given.
pub(crate) async fn start_upload(
    state: &AppState,
    name: &str,
    params: &HashMap<String, String>,
    body: Bytes,
) -> RegistryResult<Response> {
    let repository = Repository::parse(name)?;

    if let Some(digest) = params.get("digest") {
        let digest = Digest::parse(digest)?;
        state.storage.blobs().put(&digest, &body).await?;
        return Ok(blob_created(&repository, &digest));
    }

    let uploads = state.storage.uploads();
    let id = uploads.start().await?;
    let offset = if body.is_empty() {
        0
    } else {
        uploads.append(id, &body, None).await?
    };
    Ok(upload_accepted(StatusCode::ACCEPTED, &repository, id, offset))
}

/// PATCH a chunk onto an upload.
pub(crate) async fn patch_upload(
    state: &AppState,
    name: &str,
    id: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    let repository = Repository::parse(name)?;
    let id = UploadId::parse(id)?;
    let expected_start = content_range_start(headers)?;

    let offset = state
        .storage
        .uploads()
        .append(id, &body, expected_start)
        .await?;
    Ok(upload_accepted(StatusCode::ACCEPTED, &repository, id, offset))
}

/// PUT to complete an upload, with an optional final chunk.
pub(crate) async fn complete_upload(
    state: &AppState,
    name: &str,
    id: &str,
    params: &HashMap<String, String>,
    body: Bytes,
) -> RegistryResult<Response> {
    let repository = Repository::parse(name)?;
    let id = UploadId::parse(id)?;
    let digest = params
        .get("digest")
        .ok_or_else(|| RegistryError::InvalidDigest("missing digest parameter".to_string()))?;
    let digest = Digest::parse(digest)?;

    state.storage.uploads().complete(id, &digest, &body).await?;
    Ok(blob_created(&repository, &digest))
}

/// GET the progress of an upload.
pub(crate) async fn upload_status(
    state: &AppState,
    name: &str,
    id: &str,
) -> RegistryResult<Response> {
    let repository = Repository::parse(name)?;
    let id = UploadId::parse(id)?;
    let status = state.storage.uploads().status(id).await?;
    tracing::trace!(offset = status.offset, age = ?status.age, "Upload status");
    Ok(upload_accepted(
        StatusCode::NO_CONTENT,
        &repository,
        id,
        status.offset,
    ))
}

/// DELETE an upload.
pub(crate) async fn cancel_upload(
    state: &AppState,
    name: &str,
    id: &str,
) -> RegistryResult<Response> {
    Repository::parse(name)?;
    let id = UploadId::parse(id)?;
    state.storage.uploads().cancel(id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
