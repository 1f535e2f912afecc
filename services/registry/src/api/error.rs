//! Rendering registry errors as distribution API responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::RegistryError;

impl RegistryError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::BlobNotFound(_)
            | RegistryError::BlobUploadUnknown(_)
            | RegistryError::ManifestNotFound(_)
            | RegistryError::RepositoryNotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::InvalidDigest(_)
            | RegistryError::InvalidManifest(_)
            | RegistryError::InvalidRepository(_)
            | RegistryError::InvalidTag(_)
            | RegistryError::DigestMismatch { .. }
            | RegistryError::BlobUploadInvalid(_) => StatusCode::BAD_REQUEST,
            RegistryError::RangeInvalid { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            RegistryError::Unauthorized => StatusCode::UNAUTHORIZED,
            RegistryError::Storage(_) | RegistryError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Distribution API error response format
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        match &self {
            RegistryError::Storage(err) => {
                tracing::error!(span_trace = %err.span_trace(), "Internal error: {self}");
            }
            _ if self.is_internal() => tracing::error!("Internal error: {self}"),
            _ => {}
        }

        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        let body = ErrorResponse {
            errors: vec![ErrorDetail { code, message }],
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn renders_error_body() {
        let response = RegistryError::BlobNotFound("sha256:abc".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["errors"][0]["code"], "BLOB_UNKNOWN");
        assert!(
            json["errors"][0]["message"]
                .as_str()
                .unwrap()
                .contains("sha256:abc")
        );
    }

    #[test]
    fn status_codes() {
        let cases = [
            (RegistryError::BlobUploadUnknown("x".into()), 404),
            (RegistryError::RepositoryNotFound("x".into()), 404),
            (RegistryError::InvalidTag("x".into()), 400),
            (
                RegistryError::RangeInvalid {
                    expected: 1,
                    actual: 0,
                },
                416,
            ),
            (RegistryError::Unauthorized, 401),
            (RegistryError::Io(std::io::Error::other("disk")), 500),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code().as_u16(), status, "{err}");
        }
    }
}
