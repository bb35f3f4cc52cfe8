use serde::{Deserialize, Serialize};

/// A package entry as returned by the package-management and admin listings.
///
/// Every field is optional upstream; unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PackageEntry {
    pub application_id: Option<String>,
    pub unique_name: Option<String>,
    pub localized_name: Option<String>,
    pub application_name: Option<String>,
    pub version: Option<String>,
    pub state: Option<String>,
    pub update_available: Option<bool>,
    pub catalog_version: Option<String>,
    pub available_version: Option<String>,
    pub latest_version: Option<String>,
    pub new_version: Option<String>,
    pub update_version: Option<String>,
    pub instance_package_id: Option<String>,
    pub single_page_application_url: Option<String>,
}

impl PackageEntry {
    pub fn version_str(&self) -> &str {
        self.version.as_deref().unwrap_or("")
    }

    pub fn unique_name_str(&self) -> &str {
        self.unique_name.as_deref().unwrap_or("")
    }

    /// Localized name, falling back to the application name.
    pub fn display_name(&self) -> Option<&str> {
        non_empty(self.localized_name.as_deref()).or_else(|| non_empty(self.application_name.as_deref()))
    }

    /// Best label for logs and usage records.
    pub fn label(&self) -> &str {
        self.display_name()
            .or_else(|| non_empty(self.unique_name.as_deref()))
            .or_else(|| non_empty(self.application_id.as_deref()))
            .unwrap_or("unknown package")
    }

    pub fn application_id(&self) -> Option<&str> {
        non_empty(self.application_id.as_deref())
    }

    pub fn is_spa(&self) -> bool {
        non_empty(self.single_page_application_url.as_deref()).is_some()
    }

    /// Alternate version hints in the order they are consulted.
    pub fn direct_version_hints(&self) -> [Option<&str>; 5] {
        [
            self.catalog_version.as_deref(),
            self.available_version.as_deref(),
            self.latest_version.as_deref(),
            self.new_version.as_deref(),
            self.update_version.as_deref(),
        ]
    }

    pub fn state_lower(&self) -> String {
        self.state.as_deref().unwrap_or("").to_lowercase()
    }

    /// Whether a secondary listing reports this entry as present in the environment.
    pub fn looks_installed(&self) -> bool {
        let state = self.state_lower();
        state == "installed"
            || state.contains("update")
            || non_empty(self.instance_package_id.as_deref()).is_some()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// One page of a listing response (`value` plus an optional cursor).
#[derive(Debug, Clone, Deserialize)]
pub struct ListingPage<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink", alias = "nextLink", default)]
    pub next_link: Option<String>,
}

pub type PackagePage = ListingPage<PackageEntry>;

/// Which slice of the package listing to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStateFilter {
    Installed,
    NotInstalled,
    All,
}

impl InstallStateFilter {
    pub fn as_query(&self) -> Option<&'static str> {
        match self {
            InstallStateFilter::Installed => Some("Installed"),
            InstallStateFilter::NotInstalled => Some("NotInstalled"),
            InstallStateFilter::All => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStateFilter::Installed => "installed",
            InstallStateFilter::NotInstalled => "not-installed",
            InstallStateFilter::All => "catalog",
        }
    }
}
