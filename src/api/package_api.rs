use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::identity::TokenProvider;
use super::{InstallResponse, PackageCatalog, PackageInstaller};
use crate::models::{InstallStateFilter, ListingPage, PackageEntry};
use crate::utils::{AppError, AppResult};

/// Upper bound on followed cursors, guarding against a server that keeps
/// returning the same next link.
const MAX_PAGES: usize = 500;

/// Where a paginated application-package listing lives and how to call it.
#[derive(Debug, Clone)]
pub struct ListingEndpoint {
    pub label: String,
    pub base: String,
    pub environment_id: String,
    pub api_version: String,
    pub scope: String,
}

impl ListingEndpoint {
    /// `{base}/environments/{env}/applicationPackages`
    pub fn packages_url(&self) -> AppResult<Url> {
        let mut url = Url::parse(self.base.trim_end_matches('/'))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config(format!("{} is not a valid API base", self.base)))?
            .pop_if_empty()
            .extend(["environments", self.environment_id.as_str(), "applicationPackages"]);
        Ok(url)
    }

    pub fn listing_url(&self, filter: InstallStateFilter) -> AppResult<Url> {
        let mut url = self.packages_url()?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(state) = filter.as_query() {
                query.append_pair("appInstallState", state);
            }
            query.append_pair("api-version", &self.api_version);
        }
        Ok(url)
    }

    pub fn install_url(&self, package_ref: &str) -> AppResult<Url> {
        let mut url = self.packages_url()?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config(format!("{} is not a valid API base", self.base)))?
            .extend([package_ref, "install"]);
        url.query_pairs_mut().append_pair("api-version", &self.api_version);
        Ok(url)
    }
}

/// Follow `nextLink` cursors until exhausted. Every page must succeed within
/// `page_timeout`; no partial result is ever returned. A cursor that points back
/// at an already fetched page is an error.
pub async fn fetch_all_pages<T: DeserializeOwned>(
    http: &reqwest::Client,
    tokens: &dyn TokenProvider,
    scope: &str,
    first_url: Url,
    page_timeout: Duration,
    label: &str,
) -> AppResult<Vec<T>> {
    let token = tokens.token(scope).await?;
    let mut entries = Vec::new();
    let mut next = Some(first_url.to_string());
    let mut visited: HashSet<String> = HashSet::new();
    let mut pages = 0usize;

    while let Some(url) = next.take() {
        pages += 1;
        if pages > MAX_PAGES {
            return Err(AppError::Listing(format!("{}: more than {} pages", label, MAX_PAGES)));
        }
        if !visited.insert(url.clone()) {
            return Err(AppError::Listing(format!(
                "{}: page {} repeats an earlier cursor",
                label, pages
            )));
        }

        let page = tokio::time::timeout(page_timeout, fetch_page::<T>(http, &token, &url))
            .await
            .map_err(|_| {
                AppError::Listing(format!(
                    "{}: page {} timed out after {}s",
                    label,
                    pages,
                    page_timeout.as_secs()
                ))
            })?
            .map_err(|e| match e {
                AppError::Listing(msg) => AppError::Listing(format!("{}: page {}: {}", label, pages, msg)),
                other => other,
            })?;

        entries.extend(page.value);
        next = page.next_link.filter(|link| !link.is_empty());
    }

    log::info!("{}: fetched {} entries in {} page(s)", label, entries.len(), pages);
    Ok(entries)
}

async fn fetch_page<T: DeserializeOwned>(
    http: &reqwest::Client,
    token: &str,
    url: &str,
) -> AppResult<ListingPage<T>> {
    let response = http.get(url).bearer_auth(token).send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::Listing(format!(
            "HTTP {}: {}",
            status.as_u16(),
            crate::utils::http_client::truncate_body(&body, 200)
        )));
    }
    Ok(response.json::<ListingPage<T>>().await?)
}

/// Package-management API for one environment.
pub struct HttpPackageApi {
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    endpoint: ListingEndpoint,
    page_timeout: Duration,
}

impl HttpPackageApi {
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<dyn TokenProvider>,
        endpoint: ListingEndpoint,
        page_timeout: Duration,
    ) -> Self {
        Self {
            http,
            tokens,
            endpoint,
            page_timeout,
        }
    }

    pub fn endpoint(&self) -> &ListingEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl PackageCatalog for HttpPackageApi {
    fn name(&self) -> &str {
        &self.endpoint.label
    }

    async fn list_packages(&self, filter: InstallStateFilter) -> AppResult<Vec<PackageEntry>> {
        let url = self.endpoint.listing_url(filter)?;
        let label = format!("{} {}", self.endpoint.label, filter.as_str());
        fetch_all_pages(
            &self.http,
            self.tokens.as_ref(),
            &self.endpoint.scope,
            url,
            self.page_timeout,
            &label,
        )
        .await
    }
}

#[async_trait]
impl PackageInstaller for HttpPackageApi {
    async fn install(&self, package_ref: &str) -> AppResult<InstallResponse> {
        let url = self.endpoint.install_url(package_ref)?;
        let token = self.tokens.token(&self.endpoint.scope).await?;
        log::info!("Submitting install for {}", package_ref);

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(InstallResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::identity::StaticTokenProvider;
    use httpmock::{Method::GET, Method::POST, MockServer};
    use serde_json::json;

    fn api(server: &MockServer, timeout: Duration) -> HttpPackageApi {
        HttpPackageApi::new(
            reqwest::Client::new(),
            Arc::new(StaticTokenProvider::single("scope", "tok")),
            ListingEndpoint {
                label: "package api".into(),
                base: server.url("/appmanagement"),
                environment_id: "env-1".into(),
                api_version: "2022-03-01-preview".into(),
                scope: "scope".into(),
            },
            timeout,
        )
    }

    #[test]
    fn builds_listing_and_install_urls() {
        let endpoint = ListingEndpoint {
            label: "test".into(),
            base: "https://api.example.com/appmanagement/".into(),
            environment_id: "env-1".into(),
            api_version: "v1".into(),
            scope: "s".into(),
        };
        assert_eq!(
            endpoint.listing_url(InstallStateFilter::Installed).unwrap().as_str(),
            "https://api.example.com/appmanagement/environments/env-1/applicationPackages?appInstallState=Installed&api-version=v1"
        );
        assert_eq!(
            endpoint.listing_url(InstallStateFilter::All).unwrap().as_str(),
            "https://api.example.com/appmanagement/environments/env-1/applicationPackages?api-version=v1"
        );
        assert_eq!(
            endpoint.install_url("pkgA_upgrade").unwrap().as_str(),
            "https://api.example.com/appmanagement/environments/env-1/applicationPackages/pkgA_upgrade/install?api-version=v1"
        );
    }

    #[tokio::test]
    async fn follows_next_link_until_exhausted() {
        let server = MockServer::start_async().await;
        let second_url = server.url("/page2");
        let first = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/appmanagement/environments/env-1/applicationPackages")
                    .query_param("appInstallState", "Installed");
                then.status(200).json_body(json!({
                    "value": [{"uniqueName": "a", "version": "1.0"}],
                    "@odata.nextLink": second_url
                }));
            })
            .await;
        let second = server
            .mock_async(|when, then| {
                when.method(GET).path("/page2");
                then.status(200).json_body(json!({
                    "value": [{"uniqueName": "b", "version": "2.0"}]
                }));
            })
            .await;

        let entries = api(&server, Duration::from_secs(5))
            .list_packages(InstallStateFilter::Installed)
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].unique_name_str(), "b");
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn failing_page_fails_whole_listing() {
        let server = MockServer::start_async().await;
        let second_url = server.url("/page2");
        server
            .mock_async(|when, then| {
                when.method(GET).path("/appmanagement/environments/env-1/applicationPackages");
                then.status(200).json_body(json!({
                    "value": [{"uniqueName": "a"}],
                    "nextLink": second_url
                }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/page2");
                then.status(503).body("busy");
            })
            .await;

        let err = api(&server, Duration::from_secs(5))
            .list_packages(InstallStateFilter::All)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Listing(ref msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn slow_page_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/appmanagement/environments/env-1/applicationPackages");
                then.status(200)
                    .delay(Duration::from_millis(500))
                    .json_body(json!({"value": []}));
            })
            .await;

        let err = api(&server, Duration::from_millis(50))
            .list_packages(InstallStateFilter::NotInstalled)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Listing(ref msg) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn install_returns_status_and_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/appmanagement/environments/env-1/applicationPackages/pkgA/install");
                then.status(400).body("Custom Install Experience is required");
            })
            .await;

        let response = api(&server, Duration::from_secs(5)).install("pkgA").await.unwrap();
        assert_eq!(response.status, 400);
        assert!(!response.is_success());
        assert!(response.body.contains("Custom Install Experience"));
    }
}
