pub mod catalog_index;
pub mod merger;
pub mod reconciler;

use crate::api::PackageCatalog;
use crate::models::{InstallStateFilter, PackageEntry, ReconciledPackage};
use crate::utils::AppResult;

pub use catalog_index::{build_indexes, normalize_name, CatalogIndexes};
pub use merger::merge_secondary;
pub use reconciler::reconcile;

/// Result of one discovery pass over an environment.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub packages: Vec<ReconciledPackage>,
    pub catalog_entries: usize,
}

impl Discovery {
    pub fn update_count(&self) -> usize {
        self.packages.iter().filter(|p| p.decision.has_update).count()
    }
}

/// Fetch listings, index the catalog and reconcile every installed package.
///
/// The installed and full-catalog listings are required; the not-installed
/// listing and the secondary source are optional and degrade to empty.
pub struct DiscoveryEngine<'a> {
    primary: &'a dyn PackageCatalog,
    secondary: Option<&'a dyn PackageCatalog>,
}

impl<'a> DiscoveryEngine<'a> {
    /// Single-source discovery, as run by the unattended path.
    pub fn new(primary: &'a dyn PackageCatalog) -> Self {
        Self { primary, secondary: None }
    }

    pub fn with_secondary(primary: &'a dyn PackageCatalog, secondary: &'a dyn PackageCatalog) -> Self {
        Self {
            primary,
            secondary: Some(secondary),
        }
    }

    pub async fn discover(&self) -> AppResult<Discovery> {
        let start = std::time::Instant::now();

        let installed = self.primary.list_packages(InstallStateFilter::Installed).await?;
        let mut catalog = self.primary.list_packages(InstallStateFilter::All).await?;
        let not_installed = optional_listing(self.primary, InstallStateFilter::NotInstalled).await;
        catalog.extend(not_installed);

        let indexes = build_indexes(&catalog);
        let mut packages = reconciler::reconcile_all(&installed, &indexes);

        if let Some(secondary) = self.secondary {
            let entries = optional_listing(secondary, InstallStateFilter::All).await;
            packages = merge_secondary(packages, &entries);
        }

        let discovery = Discovery {
            packages,
            catalog_entries: catalog.len(),
        };
        log::info!(
            "Discovery: {} installed, {} catalog entries, {} updates ({} ms)",
            discovery.packages.len(),
            discovery.catalog_entries,
            discovery.update_count(),
            start.elapsed().as_millis()
        );
        Ok(discovery)
    }
}

async fn optional_listing(source: &dyn PackageCatalog, filter: InstallStateFilter) -> Vec<PackageEntry> {
    match source.list_packages(filter).await {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("{} {} listing failed, continuing without it: {}", source.name(), filter.as_str(), e);
            Vec::new()
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::api::{InstallResponse, PackageCatalog, PackageInstaller};
    use crate::models::{InstallStateFilter, PackageEntry};
    use crate::utils::{AppError, AppResult};

    /// In-memory package API: fixed listings per filter, scripted install responses.
    #[derive(Default)]
    pub struct FakeApi {
        pub installed: Vec<PackageEntry>,
        pub catalog: Vec<PackageEntry>,
        pub not_installed: Option<Vec<PackageEntry>>,
        pub fail_catalog: bool,
        /// package ref → (status, body). Missing refs answer 202.
        pub install_responses: HashMap<String, (u16, String)>,
        pub network_failures: Vec<String>,
        pub submitted: Mutex<Vec<String>>,
    }

    impl FakeApi {
        pub fn submitted(&self) -> Vec<String> {
            self.submitted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PackageCatalog for FakeApi {
        fn name(&self) -> &str {
            "fake"
        }

        async fn list_packages(&self, filter: InstallStateFilter) -> AppResult<Vec<PackageEntry>> {
            match filter {
                InstallStateFilter::Installed => Ok(self.installed.clone()),
                InstallStateFilter::All if self.fail_catalog => {
                    Err(AppError::Listing("catalog unavailable".into()))
                }
                InstallStateFilter::All => Ok(self.catalog.clone()),
                InstallStateFilter::NotInstalled => self
                    .not_installed
                    .clone()
                    .ok_or_else(|| AppError::Listing("not-installed listing unavailable".into())),
            }
        }
    }

    #[async_trait]
    impl PackageInstaller for FakeApi {
        async fn install(&self, package_ref: &str) -> AppResult<InstallResponse> {
            self.submitted.lock().unwrap().push(package_ref.to_string());
            if self.network_failures.iter().any(|r| r == package_ref) {
                return Err(AppError::Custom("connection reset".into()));
            }
            let (status, body) = self
                .install_responses
                .get(package_ref)
                .cloned()
                .unwrap_or((202, String::new()));
            Ok(InstallResponse { status, body })
        }
    }
}
