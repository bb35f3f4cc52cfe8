pub mod admin_api;
pub mod identity;
pub mod package_api;

use async_trait::async_trait;

use crate::models::{InstallStateFilter, PackageEntry};
use crate::utils::AppResult;

/// Raw response to an install request. Non-2xx statuses are not errors here;
/// the executor decides how to record them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResponse {
    pub status: u16,
    pub body: String,
}

impl InstallResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A listing of packages in one environment, fully paginated.
#[async_trait]
pub trait PackageCatalog: Send + Sync {
    fn name(&self) -> &str;
    async fn list_packages(&self, filter: InstallStateFilter) -> AppResult<Vec<PackageEntry>>;
}

#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(&self, package_ref: &str) -> AppResult<InstallResponse>;
}

/// Both halves of the package-management API.
pub trait PackageApi: PackageCatalog + PackageInstaller {
    fn as_catalog(&self) -> &dyn PackageCatalog;
    fn as_installer(&self) -> &dyn PackageInstaller;
}

impl<T: PackageCatalog + PackageInstaller> PackageApi for T {
    fn as_catalog(&self) -> &dyn PackageCatalog {
        self
    }

    fn as_installer(&self) -> &dyn PackageInstaller {
        self
    }
}
