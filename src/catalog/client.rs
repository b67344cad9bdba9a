//! Paginated repository catalog client.

use crate::config::{Credentials, RemoteConfig};
use crate::models::RemoteRepository;
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Name of the clone link used for transport.
const CLONE_LINK_NAME: &str = "https";

/// Errors that abort the catalog fetch of one project key.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The remote rejected the credentials (401).
    #[error("authentication failed for project {project_key}: check the username and app password")]
    Auth { project_key: String },

    /// Any other non-success response.
    #[error("remote returned {status} for project {project_key}: {body}")]
    Remote {
        project_key: String,
        status: u16,
        body: String,
    },

    /// The request could not be sent or the response body not read.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A page could not be decoded.
    #[error("failed to decode catalog page for project {project_key}: {source}")]
    Decode {
        project_key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid catalog URL: {0}")]
    InvalidUrl(String),
}

/// Raw response for one page request.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
}

impl PageResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Fetches a single catalog page by absolute URL.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<PageResponse, CatalogError>;
}

/// [`PageFetcher`] over HTTP with basic authentication.
pub struct HttpPageFetcher {
    client: reqwest::Client,
    credentials: Option<Credentials>,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration, credentials: Option<Credentials>) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("repocensus/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CatalogError::Http(e.to_string()))?;

        Ok(Self {
            client,
            credentials,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn get(&self, url: &str) -> Result<PageResponse, CatalogError> {
        let mut request = self.client.get(url);
        if let Some(ref creds) = self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| CatalogError::Http(format!("request to {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| CatalogError::Http(format!("failed to read response body: {}", e)))?;

        Ok(PageResponse { status, body })
    }
}

/// One page of the repository listing.
#[derive(Debug, Deserialize)]
struct RepositoryPage {
    #[serde(default)]
    values: Vec<RepositoryDescriptor>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoryDescriptor {
    name: String,
    #[serde(default)]
    links: DescriptorLinks,
}

#[derive(Debug, Default, Deserialize)]
struct DescriptorLinks {
    #[serde(default)]
    clone: Vec<CloneLink>,
}

#[derive(Debug, Deserialize)]
struct CloneLink {
    name: String,
    href: String,
}

impl RepositoryDescriptor {
    fn into_remote(self, project_key: &str) -> RemoteRepository {
        let clone_url = self
            .links
            .clone
            .into_iter()
            .find(|link| link.name == CLONE_LINK_NAME)
            .map(|link| link.href);

        RemoteRepository {
            name: self.name,
            clone_url,
            project_key: project_key.to_string(),
        }
    }
}

/// Lists the repositories of a workspace, one project key at a time.
pub struct CatalogClient {
    base_url: String,
    workspace: String,
    fetcher: Arc<dyn PageFetcher>,
}

impl CatalogClient {
    /// Create a client talking HTTP to the configured remote.
    pub fn new(
        config: &RemoteConfig,
        credentials: Option<Credentials>,
    ) -> Result<Self, CatalogError> {
        let fetcher = HttpPageFetcher::new(Duration::from_secs(config.timeout_seconds), credentials)?;
        info!("Created catalog client for {}", config.base_url);
        Ok(Self::with_fetcher(
            &config.base_url,
            &config.workspace,
            Arc::new(fetcher),
        ))
    }

    /// Create a client over an arbitrary page fetcher.
    pub fn with_fetcher(base_url: &str, workspace: &str, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            workspace: workspace.to_string(),
            fetcher,
        }
    }

    /// URL of the first page for a project key.
    pub fn first_page_url(&self, project_key: &str) -> Result<String, CatalogError> {
        let listing = format!("{}/{}", self.base_url, self.workspace);
        let query = format!("project.key=\"{}\"", project_key);
        Url::parse_with_params(&listing, &[("q", query.as_str())])
            .map(String::from)
            .map_err(|e| CatalogError::InvalidUrl(format!("{}: {}", listing, e)))
    }

    /// Fetch every repository of a project key, following the `next` cursor
    /// until the remote stops returning one.
    ///
    /// Nothing is returned unless every page was fetched: an authentication
    /// failure or any other error discards the pages collected so far.
    pub async fn fetch(&self, project_key: &str) -> Result<Vec<RemoteRepository>, CatalogError> {
        info!("Fetching repositories for project key {}", project_key);

        let mut repositories = Vec::new();
        let mut seen = HashSet::new();
        let mut next_url = Some(self.first_page_url(project_key)?);
        let mut pages = 0usize;

        while let Some(url) = next_url.take() {
            debug!("Requesting catalog page {}", url);
            let response = self.fetcher.get(&url).await?;

            if response.status == 401 {
                return Err(CatalogError::Auth {
                    project_key: project_key.to_string(),
                });
            }
            if !response.is_success() {
                return Err(CatalogError::Remote {
                    project_key: project_key.to_string(),
                    status: response.status,
                    body: response.body,
                });
            }

            let page: RepositoryPage =
                serde_json::from_str(&response.body).map_err(|source| CatalogError::Decode {
                    project_key: project_key.to_string(),
                    source,
                })?;
            pages += 1;

            for descriptor in page.values {
                if !seen.insert(descriptor.name.clone()) {
                    debug!("Repository {} listed twice, keeping first", descriptor.name);
                    continue;
                }
                let remote = descriptor.into_remote(project_key);
                if remote.clone_url.is_none() {
                    warn!(
                        "Repository {}/{} has no {} clone link",
                        project_key, remote.name, CLONE_LINK_NAME
                    );
                }
                repositories.push(remote);
            }

            next_url = page.next.filter(|next| !next.is_empty());
        }

        info!(
            "Found {} repositories for project key {} across {} page(s)",
            repositories.len(),
            project_key,
            pages
        );
        Ok(repositories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{catalog_page, descriptor, ScriptedPages};
    use tokio_test::{assert_err, assert_ok};

    fn client(pages: &Arc<ScriptedPages>) -> CatalogClient {
        CatalogClient::with_fetcher(
            "https://api.example.org/2.0/repositories/",
            "acme",
            pages.clone(),
        )
    }

    #[test]
    fn test_first_page_url_filters_by_project_key() {
        let pages = Arc::new(ScriptedPages::default());
        let url = client(&pages).first_page_url("CORE").unwrap();
        assert!(url.starts_with("https://api.example.org/2.0/repositories/acme?q="));

        let parsed = Url::parse(&url).unwrap();
        let (key, value) = parsed.query_pairs().next().unwrap();
        assert_eq!(key, "q");
        assert_eq!(value, "project.key=\"CORE\"");
    }

    #[tokio::test]
    async fn test_fetch_follows_cursor_across_pages() {
        let pages = Arc::new(ScriptedPages::default());
        pages.push(200, catalog_page(&["a", "b"], Some("https://next/2")));
        pages.push(200, catalog_page(&["c"], Some("https://next/3")));
        pages.push(200, catalog_page(&["d", "e"], None));

        let repos = assert_ok!(client(&pages).fetch("CORE").await);
        let names: Vec<_> = repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
        assert!(repos.iter().all(|r| r.project_key == "CORE"));

        let requested = pages.requested();
        assert_eq!(requested.len(), 3);
        assert_eq!(requested[1], "https://next/2");
        assert_eq!(requested[2], "https://next/3");
    }

    #[tokio::test]
    async fn test_fetch_deduplicates_by_name_within_key() {
        let pages = Arc::new(ScriptedPages::default());
        pages.push(200, catalog_page(&["a", "b"], Some("https://next/2")));
        pages.push(200, catalog_page(&["b", "c"], None));

        let repos = client(&pages).fetch("CORE").await.unwrap();
        assert_eq!(repos.len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_auth_failure_discards_earlier_pages() {
        let pages = Arc::new(ScriptedPages::default());
        pages.push(200, catalog_page(&["a"], Some("https://next/2")));
        pages.push(401, "Unauthorized".to_string());

        let err = assert_err!(client(&pages).fetch("CORE").await);
        assert!(matches!(err, CatalogError::Auth { ref project_key } if project_key == "CORE"));
    }

    #[tokio::test]
    async fn test_fetch_remote_error_carries_status_and_body() {
        let pages = Arc::new(ScriptedPages::default());
        pages.push(503, "maintenance".to_string());

        match client(&pages).fetch("CORE").await {
            Err(CatalogError::Remote { status, body, .. }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_malformed_page_is_decode_error() {
        let pages = Arc::new(ScriptedPages::default());
        pages.push(200, "<html>".to_string());

        let err = client(&pages).fetch("CORE").await.unwrap_err();
        assert!(matches!(err, CatalogError::Decode { .. }));
    }

    #[test]
    fn test_clone_url_prefers_https_link() {
        let raw = descriptor("api");
        let parsed: RepositoryDescriptor = serde_json::from_value(raw).unwrap();
        let remote = parsed.into_remote("CORE");
        assert_eq!(
            remote.clone_url.as_deref(),
            Some("https://bitbucket.example/acme/api.git")
        );
    }

    #[test]
    fn test_missing_https_link_yields_no_clone_url() {
        let raw = serde_json::json!({
            "name": "legacy",
            "links": { "clone": [ { "name": "ssh", "href": "git@example:acme/legacy.git" } ] }
        });
        let parsed: RepositoryDescriptor = serde_json::from_value(raw).unwrap();
        assert!(parsed.into_remote("CORE").clone_url.is_none());

        let bare: RepositoryDescriptor =
            serde_json::from_value(serde_json::json!({ "name": "bare" })).unwrap();
        assert!(bare.into_remote("CORE").clone_url.is_none());
    }
}
