//! HTTP basic authentication for uploads and the management API.

use std::fmt;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use super::AppState;
use crate::error::RegistryError;

/// The single set of credentials accepted by the registry.
#[derive(Clone)]
pub struct BasicAuth {
    username: String,
    password: String,
    realm: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("realm", &self.realm)
            .finish_non_exhaustive()
    }
}

impl BasicAuth {
    /// Accept `username` and `password`, announcing `realm` in challenges.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            realm: realm.into(),
        }
    }

    /// Whether the request headers carry the expected credentials.
    pub(crate) fn verify(&self, headers: &HeaderMap) -> bool {
        let Some((username, password)) = credentials(headers) else {
            return false;
        };
        username == self.username && password == self.password
    }

    /// Pass requests with valid credentials, answer the rest with a challenge.
    pub(crate) fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        if self.verify(headers) {
            return Ok(());
        }

        let mut response = RegistryError::Unauthorized.into_response();
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, self.challenge());
        Err(response)
    }

    fn challenge(&self) -> HeaderValue {
        let realm = self.realm.replace('"', "");
        HeaderValue::from_str(&format!("Basic realm=\"{realm}\""))
            .unwrap_or_else(|_| HeaderValue::from_static("Basic"))
    }
}

fn credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Whether a path needs credentials before routing: everything under `/api/`.
///
/// Upload endpoints are checked once the `/v2/` path has been decoded and
/// matched, see [`BasicAuth::authorize`].
fn is_protected(path: &str) -> bool {
    path.starts_with("/api/")
}

/// Middleware rejecting protected requests without valid credentials.
pub(crate) async fn require_credentials(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(auth) = state.auth.as_deref() else {
        return next.run(request).await;
    };

    if !is_protected(request.uri().path()) {
        return next.run(request).await;
    }

    match auth.authorize(request.headers()) {
        Ok(()) => next.run(request).await,
        Err(response) => {
            tracing::warn!(method = %request.method(), path = %request.uri().path(), "Rejected request without valid credentials");
            response
        }
    }
}
