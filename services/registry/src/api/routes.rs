//! Parsing of `/v2/...` paths.
//!
//! Repository names may contain slashes, so the path after `/v2/` is matched
//! by its suffix rather than by fixed segments.

const UPLOADS: &str = "/blobs/uploads/";
const BLOBS: &str = "/blobs/";
const MANIFESTS: &str = "/manifests/";
const TAGS_LIST: &str = "/tags/list";

/// A distribution API endpoint, with the raw path parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route<'p> {
    /// `{name}/blobs/{digest}`
    Blob { name: &'p str, digest: &'p str },
    /// `{name}/blobs/uploads/`
    UploadStart { name: &'p str },
    /// `{name}/blobs/uploads/{id}`
    Upload { name: &'p str, id: &'p str },
    /// `{name}/manifests/{reference}`
    Manifest { name: &'p str, reference: &'p str },
    /// `{name}/tags/list`
    TagsList { name: &'p str },
}

impl<'p> Route<'p> {
    /// Match the part of a path after `/v2/`.
    pub(crate) fn parse(path: &'p str) -> Option<Self> {
        let path = path.strip_prefix('/').unwrap_or(path);

        if let Some(name) = path
            .strip_suffix(UPLOADS)
            .or_else(|| path.strip_suffix(UPLOADS.trim_end_matches('/')))
        {
            return non_empty(name).map(|name| Route::UploadStart { name });
        }

        if let Some((name, id)) = split_last(path, UPLOADS) {
            return Some(Route::Upload { name, id });
        }

        if let Some(name) = path.strip_suffix(TAGS_LIST) {
            return non_empty(name).map(|name| Route::TagsList { name });
        }

        if let Some((name, digest)) = split_last(path, BLOBS) {
            return Some(Route::Blob { name, digest });
        }

        if let Some((name, reference)) = split_last(path, MANIFESTS) {
            return Some(Route::Manifest { name, reference });
        }

        None
    }

    /// Whether the endpoint creates or feeds an upload session.
    pub(crate) fn is_upload(&self) -> bool {
        matches!(self, Route::UploadStart { .. } | Route::Upload { .. })
    }
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

/// Split at the last `separator`, requiring a non-empty name and a single,
/// non-empty trailing segment.
fn split_last<'p>(path: &'p str, separator: &str) -> Option<(&'p str, &'p str)> {
    let idx = path.rfind(separator)?;
    let name = &path[..idx];
    let last = &path[idx + separator.len()..];
    if name.is_empty() || last.is_empty() || last.contains('/') {
        return None;
    }
    Some((name, last))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blobs() {
        assert_eq!(
            Route::parse("library/alpine/blobs/sha256:abc"),
            Some(Route::Blob {
                name: "library/alpine",
                digest: "sha256:abc"
            })
        );
    }

    #[test]
    fn uploads() {
        assert_eq!(
            Route::parse("app/blobs/uploads/"),
            Some(Route::UploadStart { name: "app" })
        );
        assert_eq!(
            Route::parse("app/blobs/uploads"),
            Some(Route::UploadStart { name: "app" })
        );
        assert_eq!(
            Route::parse("a/b/blobs/uploads/1234"),
            Some(Route::Upload {
                name: "a/b",
                id: "1234"
            })
        );
    }

    #[test]
    fn upload_routes() {
        assert!(Route::parse("app/blobs/uploads/").unwrap().is_upload());
        assert!(Route::parse("app/blobs/uploads/1234").unwrap().is_upload());
        assert!(!Route::parse("app/blobs/sha256:abc").unwrap().is_upload());
        assert!(!Route::parse("app/manifests/latest").unwrap().is_upload());
    }

    #[test]
    fn manifests_and_tags() {
        assert_eq!(
            Route::parse("a/b/c/manifests/latest"),
            Some(Route::Manifest {
                name: "a/b/c",
                reference: "latest"
            })
        );
        assert_eq!(
            Route::parse("a/b/tags/list"),
            Some(Route::TagsList { name: "a/b" })
        );
    }

    #[test]
    fn repository_named_like_an_endpoint() {
        assert_eq!(
            Route::parse("blobs/manifests/latest"),
            Some(Route::Manifest {
                name: "blobs",
                reference: "latest"
            })
        );
        assert_eq!(
            Route::parse("tags/list/manifests/v1"),
            Some(Route::Manifest {
                name: "tags/list",
                reference: "v1"
            })
        );
    }

    #[test]
    fn unmatched() {
        assert_eq!(Route::parse(""), None);
        assert_eq!(Route::parse("app"), None);
        assert_eq!(Route::parse("/blobs/uploads/"), None);
        assert_eq!(Route::parse("app/manifests/"), None);
        assert_eq!(Route::parse("app/unknown/thing"), None);
    }
}
