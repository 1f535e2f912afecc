//! Manifest and tag list endpoints.

use std::collections::HashMap;

use axum::Json;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Serialize;

use super::catalog::Page;
use super::{AppState, DOCKER_CONTENT_DIGEST};
use crate::error::RegistryResult;
use crate::reference::{Reference, Repository};

/// GET or HEAD a manifest by tag or digest.
pub(crate) async fn get_manifest(
    state: &AppState,
    name: &str,
    reference: &str,
    head: bool,
) -> RegistryResult<Response> {
    let repository = Repository::parse(name)?;
    let reference = Reference::parse(reference)?;

    if head {
        let (digest, info) = state
            .storage
            .manifest_info(&repository, &reference)
            .await?;
        return Ok((
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, info.media_type),
                (header::CONTENT_LENGTH, info.size.to_string()),
                (DOCKER_CONTENT_DIGEST, digest.to_string()),
            ],
        )
            .into_response());
    }

    let manifest = state.storage.get_manifest(&repository, &reference).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, manifest.media_type),
            (header::CONTENT_LENGTH, manifest.data.len().to_string()),
            (DOCKER_CONTENT_DIGEST, manifest.digest.to_string()),
        ],
        manifest.data,
    )
        .into_response())
}

/// PUT a manifest, tagging it when the reference is a tag.
pub(crate) async fn put_manifest(
    state: &AppState,
    name: &str,
    reference: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    let repository = Repository::parse(name)?;
    let reference = Reference::parse(reference)?;
    let media_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty());

    let digest = state
        .storage
        .put_manifest(&repository, &reference, &body, media_type)
        .await?;
    tracing::info!(%repository, %reference, %digest, "Pushed manifest");

    Ok((
        StatusCode::CREATED,
        [
            (
                header::LOCATION,
                format!("/v2/{repository}/manifests/{digest}"),
            ),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
            (header::CONTENT_LENGTH, "0".to_string()),
        ],
    )
        .into_response())
}

/// DELETE a tag, or a manifest by digest.
pub(crate) async fn delete_manifest(
    state: &AppState,
    name: &str,
    reference: &str,
) -> RegistryResult<Response> {
    let repository = Repository::parse(name)?;
    let reference = Reference::parse(reference)?;
    state
        .storage
        .delete_manifest(&repository, &reference)
        .await?;
    Ok(StatusCode::ACCEPTED.into_response())
}

/// Tag list response
#[derive(Debug, Serialize)]
struct TagList {
    name: String,
    tags: Vec<String>,
}

/// GET the tags of a repository.
pub(crate) async fn list_tags(
    state: &AppState,
    name: &str,
    params: &HashMap<String, String>,
) -> RegistryResult<Response> {
    let repository = Repository::parse(name)?;
    let tags = state.storage.tags().list(&repository).await?;

    let page = Page::new(tags, params);
    let link = page.link(&format!("/v2/{repository}/tags/list"));
    let body = Json(TagList {
        name: repository.to_string(),
        tags: page.items,
    });

    Ok(match link {
        Some(link) => ([(header::LINK, link)], body).into_response(),
        None => body.into_response(),
    })
}
