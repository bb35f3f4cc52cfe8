use serde::{Deserialize, Serialize};

use super::PackageEntry;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Single-page applications cannot be managed through the package API.
    SpaOnly,
}

/// Which detection check produced a positive decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPath {
    StateText,
    DirectField,
    UpdateFlag,
    CatalogById,
    CatalogByName,
    CatalogByDisplayName,
    SecondarySource,
}

impl DetectionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionPath::StateText => "state",
            DetectionPath::DirectField => "direct_field",
            DetectionPath::UpdateFlag => "update_flag",
            DetectionPath::CatalogById => "catalog_id",
            DetectionPath::CatalogByName => "catalog_name",
            DetectionPath::CatalogByDisplayName => "catalog_display_name",
            DetectionPath::SecondarySource => "secondary",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDecision {
    pub has_update: bool,
    pub latest_version: Option<String>,
    /// uniqueName to submit the install request for.
    pub install_package_ref: String,
    pub skipped_reason: Option<SkipReason>,
    pub detected_by: Option<DetectionPath>,
}

impl UpdateDecision {
    pub fn no_update(installed: &PackageEntry) -> Self {
        Self {
            has_update: false,
            latest_version: None,
            install_package_ref: installed.unique_name_str().to_string(),
            skipped_reason: None,
            detected_by: None,
        }
    }

    pub fn spa_only(installed: &PackageEntry) -> Self {
        Self {
            skipped_reason: Some(SkipReason::SpaOnly),
            ..Self::no_update(installed)
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped_reason.is_some()
    }
}

/// An installed package paired with its reconciliation outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledPackage {
    pub entry: PackageEntry,
    pub decision: UpdateDecision,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_path_label_outlives_the_decision() {
        let entry = PackageEntry::default();
        let label = {
            let decision = UpdateDecision {
                detected_by: Some(DetectionPath::CatalogByName),
                ..UpdateDecision::no_update(&entry)
            };
            decision.detected_by.map(|p| p.as_str()).unwrap_or("none")
        };
        assert_eq!(label, "catalog_name");
    }
}
