//! API server builder and router

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use serde_json::json;
use storage::MemoryStorage;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::RegistryConfig;
use crate::error::RegistryResult;
use crate::storage::RegistryStorage;

mod auth;
mod blobs;
mod catalog;
mod error;
mod manifests;
mod routes;

pub use auth::BasicAuth;
use routes::Route;

pub(crate) const DOCKER_CONTENT_DIGEST: HeaderName =
    HeaderName::from_static("docker-content-digest");
pub(crate) const DOCKER_UPLOAD_UUID: HeaderName = HeaderName::from_static("docker-upload-uuid");
const API_VERSION: HeaderName = HeaderName::from_static("docker-distribution-api-version");

/// Shared state of the request handlers.
#[derive(Debug, Clone)]
pub(crate) struct AppState {
    storage: RegistryStorage,
    auth: Option<Arc<BasicAuth>>,
}

/// Registry builder for configuring and creating the registry service
#[derive(Debug)]
pub struct RegistryBuilder {
    storage: Option<storage::Storage>,
    bucket: Option<String>,
    auth: Option<BasicAuth>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// Create a new registry builder
    pub fn new() -> Self {
        Self {
            storage: None,
            bucket: None,
            auth: None,
        }
    }

    /// Apply the registry and auth sections of a configuration file.
    ///
    /// Storage is built separately, see [`storage::StorageConfig::build`].
    pub fn config(mut self, config: &RegistryConfig) -> Self {
        self.bucket = Some(config.registry.bucket.clone());
        self.auth = config.auth.enabled.then(|| {
            BasicAuth::new(
                config.auth.username.clone(),
                config.auth.password.clone(),
                config.registry.realm.clone(),
            )
        });
        self
    }

    /// Set the storage backend
    pub fn storage(mut self, storage: storage::Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the bucket name for storage
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Require basic auth for uploads and the management API
    pub fn basic_auth(mut self, auth: BasicAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Build the registry service
    ///
    /// Returns a Router that can be served with any tower-compatible server.
    /// Without a storage backend, content is kept in memory.
    pub fn build(self) -> Router {
        let storage = self.storage.unwrap_or_else(|| {
            tracing::warn!("No storage configured, registry content will not persist");
            MemoryStorage::new().into()
        });
        let bucket = self.bucket.unwrap_or_else(|| "registry".to_string());

        let state = AppState {
            storage: RegistryStorage::new(storage, bucket),
            auth: self.auth.map(Arc::new),
        };

        Router::new()
            .route("/v2/", get(api_version_check))
            .route("/v2/_catalog", get(catalog::catalog))
            .route("/v2/{*path}", any(dispatch))
            .route("/api/repositories", get(catalog::repositories))
            .route("/api/stats", get(catalog::stats))
            .route(
                "/api/repositories/{*path}",
                get(catalog::get_description).put(catalog::put_description),
            )
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                auth::require_credentials,
            ))
            .layer(DefaultBodyLimit::disable())
            .layer(SetResponseHeaderLayer::overriding(
                API_VERSION,
                HeaderValue::from_static("registry/2.0"),
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// API version check endpoint
///
/// Returns 200 OK to indicate the registry is available
async fn api_version_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({})))
}

/// Route a `/v2/{name}/...` request by the shape of its path.
async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(route) = Route::parse(&path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let head = method == Method::HEAD;

    if let (true, Some(auth)) = (route.is_upload(), state.auth.as_deref()) {
        if let Err(response) = auth.authorize(&headers) {
            tracing::warn!(%method, %path, "Rejected upload without valid credentials");
            return response;
        }
    }

    let result: RegistryResult<Response> = match (route, method) {
        (Route::Blob { name, digest }, Method::GET | Method::HEAD) => {
            blobs::get_blob(&state, name, digest, head).await
        }
        (Route::Blob { name, digest }, Method::DELETE) => {
            blobs::delete_blob(&state, name, digest).await
        }
        (Route::UploadStart { name }, Method::POST) => {
            blobs::start_upload(&state, name, &params, body).await
        }
        (Route::Upload { name, id }, Method::PATCH) => {
            blobs::patch_upload(&state, name, id, &headers, body).await
        }
        (Route::Upload { name, id }, Method::PUT) => {
            blobs::complete_upload(&state, name, id, &params, body).await
        }
        (Route::Upload { name, id }, Method::GET) => blobs::upload_status(&state, name, id).await,
        (Route::Upload { name, id }, Method::DELETE) => {
            blobs::cancel_upload(&state, name, id).await
        }
        (Route::Manifest { name, reference }, Method::GET | Method::HEAD) => {
            manifests::get_manifest(&state, name, reference, head).await
        }
        (Route::Manifest { name, reference }, Method::PUT) => {
            manifests::put_manifest(&state, name, reference, &headers, body).await
        }
        (Route::Manifest { name, reference }, Method::DELETE) => {
            manifests::delete_manifest(&state, name, reference).await
        }
        (Route::TagsList { name }, Method::GET) => {
            manifests::list_tags(&state, name, &params).await
        }
        _ => return StatusCode::METHOD_NOT_ALLOWED.into_response(),
    };

    match result {
        Ok(response) => response,
        Err(err) if head => {
            if err.is_internal() {
                tracing::error!("Internal error: {err}");
            }
            err.status_code().into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn test_builder() {
        let storage = storage::MemoryStorage::with_buckets(&["test"]);
        let _registry = RegistryBuilder::new()
            .storage(storage.into())
            .bucket("test")
            .build();
    }

    #[tokio::test]
    async fn every_response_carries_api_version() {
        let app = RegistryBuilder::new().build();

        for uri in ["/v2/", "/v2/app/manifests/latest", "/v2/nothing-here"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(
                response.headers()["docker-distribution-api-version"],
                "registry/2.0",
                "{uri}"
            );
        }
    }

    #[tokio::test]
    async fn unsupported_method() {
        let app = RegistryBuilder::new().build();
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/v2/app/manifests/latest")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn config_enables_auth() {
        let config = RegistryConfig::from_toml(
            "[auth]\nenabled = true\nusername = \"u\"\npassword = \"p\"",
        )
        .unwrap();
        let builder = RegistryBuilder::new().config(&config);
        assert!(builder.auth.is_some());
        assert_eq!(builder.bucket.as_deref(), Some("registry"));
    }
}
