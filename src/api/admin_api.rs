use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::identity::TokenProvider;
use super::package_api::{fetch_all_pages, ListingEndpoint};
use super::PackageCatalog;
use crate::models::{AppSettings, InstallStateFilter, PackageEntry};
use crate::utils::{AppError, AppResult};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentRecord {
    /// The environment id.
    pub name: String,
    pub properties: EnvironmentProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvironmentProperties {
    pub display_name: Option<String>,
    pub linked_environment_metadata: Option<LinkedEnvironmentMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkedEnvironmentMetadata {
    pub instance_url: Option<String>,
}

impl EnvironmentRecord {
    pub fn instance_url(&self) -> Option<&str> {
        self.properties
            .linked_environment_metadata
            .as_ref()
            .and_then(|m| m.instance_url.as_deref())
    }
}

/// Lowercase scheme and host, drop any path and trailing slash.
/// "https://Contoso.crm.dynamics.com/main.aspx" → "https://contoso.crm.dynamics.com"
pub fn normalize_org_url(org_url: &str) -> AppResult<String> {
    let trimmed = org_url.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let url = Url::parse(&with_scheme)?;
    let host = url
        .host_str()
        .ok_or_else(|| AppError::Config(format!("'{}' has no host", org_url)))?;
    Ok(format!("{}://{}", url.scheme(), host.to_lowercase()))
}

/// Find the environment whose instance URL matches `org_url`.
pub fn find_environment<'a>(
    environments: &'a [EnvironmentRecord],
    org_url: &str,
) -> AppResult<&'a EnvironmentRecord> {
    let wanted = normalize_org_url(org_url)?;
    environments
        .iter()
        .find(|env| {
            env.instance_url()
                .and_then(|u| normalize_org_url(u).ok())
                .is_some_and(|u| u == wanted)
        })
        .ok_or_else(|| AppError::NotFound(format!("no environment for {}", wanted)))
}

/// Secondary admin surface: environment lookup plus an independent
/// application-package listing used by the cross-source merge.
pub struct AdminApi {
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    base: String,
    api_version: String,
    scope: String,
    page_timeout: Duration,
}

impl AdminApi {
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<dyn TokenProvider>,
        base: impl Into<String>,
        api_version: impl Into<String>,
        scope: impl Into<String>,
        page_timeout: Duration,
    ) -> Self {
        Self {
            http,
            tokens,
            base: base.into(),
            api_version: api_version.into(),
            scope: scope.into(),
            page_timeout,
        }
    }

    /// Admin API as configured in the settings file.
    pub fn from_settings(http: reqwest::Client, tokens: Arc<dyn TokenProvider>, settings: &AppSettings) -> Self {
        Self::new(
            http,
            tokens,
            settings.admin_api_base.clone(),
            settings.admin_api_version.clone(),
            settings.admin_api_scope.clone(),
            settings.page_timeout(),
        )
    }

    pub fn environments_url(&self) -> AppResult<Url> {
        let mut url = Url::parse(&format!(
            "{}/scopes/admin/environments",
            self.base.trim_end_matches('/')
        ))?;
        url.query_pairs_mut().append_pair("api-version", &self.api_version);
        Ok(url)
    }

    pub async fn list_environments(&self) -> AppResult<Vec<EnvironmentRecord>> {
        fetch_all_pages(
            &self.http,
            self.tokens.as_ref(),
            &self.scope,
            self.environments_url()?,
            self.page_timeout,
            "environment listing",
        )
        .await
    }

    /// Resolve a human-facing org URL to its environment id.
    pub async fn resolve_environment_id(&self, org_url: &str) -> AppResult<String> {
        let environments = self.list_environments().await?;
        let env = find_environment(&environments, org_url)?;
        log::info!(
            "Resolved {} to environment {} ({})",
            org_url,
            env.name,
            env.properties.display_name.as_deref().unwrap_or("unnamed")
        );
        Ok(env.name.clone())
    }

    /// Package listing for one environment on the admin surface.
    pub fn packages(&self, environment_id: &str) -> AdminPackageListing {
        AdminPackageListing {
            http: self.http.clone(),
            tokens: self.tokens.clone(),
            endpoint: ListingEndpoint {
                label: "admin api".into(),
                base: self.base.clone(),
                environment_id: environment_id.to_string(),
                api_version: self.api_version.clone(),
                scope: self.scope.clone(),
            },
            page_timeout: self.page_timeout,
        }
    }
}

pub struct AdminPackageListing {
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    endpoint: ListingEndpoint,
    page_timeout: Duration,
}

#[async_trait]
impl PackageCatalog for AdminPackageListing {
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
