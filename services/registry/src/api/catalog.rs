//! Catalog endpoints, and the repository management API under `/api`.

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

use super::AppState;
use crate::catalog::{RegistryStats, RepositorySummary};
use crate::error::{RegistryError, RegistryResult};
use crate::reference::Repository;

/// One page of a sorted listing, selected with `?n=<count>&last=<item>`.
#[derive(Debug)]
pub(crate) struct Page {
    pub(crate) items: Vec<String>,
    limit: Option<usize>,
    more: bool,
}

impl Page {
    /// Select the items after `last`, at most `n` of them.
    ///
    /// An unparsable `n` is ignored.
    pub(crate) fn new(items: Vec<String>, params: &HashMap<String, String>) -> Self {
        let limit = params.get("n").and_then(|n| n.parse::<usize>().ok());
        let mut items: Vec<String> = match params.get("last") {
            Some(last) => items.into_iter().filter(|item| item > last).collect(),
            None => items,
        };

        let more = limit.is_some_and(|limit| items.len() > limit);
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Self { items, limit, more }
    }

    /// `Link` header pointing at the next page, if there is one.
    pub(crate) fn link(&self, path: &str) -> Option<String> {
        let (true, Some(limit), Some(last)) = (self.more, self.limit, self.items.last()) else {
            return None;
        };
        Some(format!("<{path}?last={last}&n={limit}>; rel=\"next\""))
    }
}

#[derive(Debug, Serialize)]
struct CatalogResponse {
    repositories: Vec<String>,
}

/// `GET /v2/_catalog`
pub(crate) async fn catalog(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> RegistryResult<Response> {
    let repositories = state.storage.catalog().list().await?;
    let page = Page::new(repositories, &params);
    let link = page.link("/v2/_catalog");
    let body = Json(CatalogResponse {
        repositories: page.items,
    });

    Ok(match link {
        Some(link) => ([(header::LINK, link)], body).into_response(),
        None => body.into_response(),
    })
}

/// `GET /api/repositories`
pub(crate) async fn repositories(
    State(state): State<AppState>,
) -> RegistryResult<Json<Vec<RepositorySummary>>> {
    Ok(Json(state.storage.catalog().summaries().await?))
}

/// `GET /api/stats`
pub(crate) async fn stats(State(state): State<AppState>) -> RegistryResult<Json<RegistryStats>> {
    Ok(Json(state.storage.catalog().stats().await?))
}

fn description_repository(path: &str) -> RegistryResult<Repository> {
    let name = path
        .strip_suffix("/description")
        .ok_or_else(|| RegistryError::RepositoryNotFound(path.to_string()))?;
    Repository::parse(name)
}

/// `GET /api/repositories/{name}/description`
pub(crate) async fn get_description(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> RegistryResult<Json<serde_json::Value>> {
    let repository = description_repository(&path)?;
    let description = state.storage.catalog().description(&repository).await?;
    Ok(Json(json!({ "description": description })))
}

/// `PUT /api/repositories/{name}/description`
pub(crate) async fn put_description(
    State(state): State<AppState>,
    Path(path): Path<String>,
    body: String,
) -> RegistryResult<Json<serde_json::Value>> {
    let repository = description_repository(&path)?;
    state
        .storage
        .catalog()
        .set_description(&repository, &body)
        .await?;
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn unpaginated() {
        let page = Page::new(names(&["a", "b"]), &HashMap::new());
        assert_eq!(page.items, names(&["a", "b"]));
        assert_eq!(page.link("/v2/_catalog"), None);
    }

    #[test]
    fn first_page_links_to_next() {
        let page = Page::new(names(&["a", "b", "c"]), &params(&[("n", "2")]));
        assert_eq!(page.items, names(&["a", "b"]));
        assert_eq!(
            page.link("/v2/_catalog").as_deref(),
            Some("</v2/_catalog?last=b&n=2>; rel=\"next\"")
        );
    }

    #[test]
    fn last_page_has_no_link() {
        let page = Page::new(
            names(&["a", "b", "c"]),
            &params(&[("n", "2"), ("last", "b")]),
        );
        assert_eq!(page.items, names(&["c"]));
        assert_eq!(page.link("/v2/_catalog"), None);
    }

    #[test]
    fn description_paths() {
        assert_eq!(
            description_repository("library/app/description")
                .unwrap()
                .as_str(),
            "library/app"
        );
        assert!(description_repository("library/app").is_err());
        assert!(description_repository("Bad/description").is_err());
    }
}
