//! Per-package update detection.
//!
//! Checks run in a fixed order and stop at the first positive: SPA exclusion,
//! state text, direct version fields, then catalog matches by id, normalized
//! name and display name. The order is a behavioral contract shared by the
//! interactive and unattended paths; it is not "best evidence wins".

use std::collections::HashMap;

use super::catalog_index::{self, CatalogIndexes};
use crate::models::{DetectionPath, PackageEntry, ReconciledPackage, UpdateDecision};
use crate::updaters::version_compare;

/// State text reported by the platform when an update is pending.
const UPDATE_STATE: &str = "installedwithupdateavailable";

pub fn reconcile(installed: &PackageEntry, indexes: &CatalogIndexes) -> UpdateDecision {
    if installed.is_spa() {
        return UpdateDecision::spa_only(installed);
    }

    if let Some(decision) = check_state(installed) {
        return decision;
    }
    if let Some(decision) = check_direct_fields(installed) {
        return decision;
    }
    if let Some(decision) = check_catalog(installed, installed.version_str(), indexes) {
        return decision;
    }

    UpdateDecision::no_update(installed)
}

pub fn reconcile_all(installed: &[PackageEntry], indexes: &CatalogIndexes) -> Vec<ReconciledPackage> {
    installed
        .iter()
        .map(|entry| {
            let decision = reconcile(entry, indexes);
            if decision.has_update {
                log::info!(
                    "Update for {}: {} → {} (via {})",
                    entry.label(),
                    entry.version_str(),
                    decision.latest_version.as_deref().unwrap_or("unknown"),
                    decision.detected_by.map(|p| p.as_str()).unwrap_or("none"),
                );
            } else if decision.is_skipped() {
                log::debug!("Skipping {}: single-page application", entry.label());
            }
            ReconciledPackage {
                entry: entry.clone(),
                decision,
            }
        })
        .collect()
}

/// State-text check. A positive here carries no version.
pub(crate) fn check_state(entry: &PackageEntry) -> Option<UpdateDecision> {
    let state = entry.state_lower();
    if state.contains("update") || state == UPDATE_STATE {
        return Some(UpdateDecision {
            has_update: true,
            detected_by: Some(DetectionPath::StateText),
            ..UpdateDecision::no_update(entry)
        });
    }
    None
}

/// Direct hint fields on the entry itself, compared against `entry.version`.
pub(crate) fn check_direct_fields(entry: &PackageEntry) -> Option<UpdateDecision> {
    check_direct_fields_against(entry, entry.version_str(), entry)
}

/// Direct hints carried by `source`, judged against `current_version`, reported
/// for `installed`.
pub(crate) fn check_direct_fields_against(
    source: &PackageEntry,
    current_version: &str,
    installed: &PackageEntry,
) -> Option<UpdateDecision> {
    let found = source
        .direct_version_hints()
        .into_iter()
        .flatten()
        .find(|candidate| version_compare::is_newer(current_version, candidate));

    if let Some(latest) = found {
        return Some(UpdateDecision {
            has_update: true,
            latest_version: Some(latest.to_string()),
            detected_by: Some(DetectionPath::DirectField),
            ..UpdateDecision::no_update(installed)
        });
    }

    if source.update_available == Some(true) {
        return Some(UpdateDecision {
            has_update: true,
            detected_by: Some(DetectionPath::UpdateFlag),
            ..UpdateDecision::no_update(installed)
        });
    }

    None
}

/// Catalog checks by id, then normalized name, then display name.
pub(crate) fn check_catalog(
    installed: &PackageEntry,
    current_version: &str,
    indexes: &CatalogIndexes,
) -> Option<UpdateDecision> {
    let lookups: [(Option<String>, &HashMap<String, PackageEntry>, DetectionPath); 3] = [
        (catalog_index::id_key(installed), &indexes.by_id, DetectionPath::CatalogById),
        (catalog_index::name_key(installed), &indexes.by_name, DetectionPath::CatalogByName),
        (
            catalog_index::display_name_key(installed),
            &indexes.by_display_name,
            DetectionPath::CatalogByDisplayName,
        ),
    ];

    for (key, index, path) in lookups {
        let Some(candidate) = key.and_then(|k| index.get(&k)) else {
            continue;
        };
        if version_compare::is_newer(current_version, candidate.version_str()) {
            return Some(catalog_hit(installed, candidate, path));
        }
    }

    None
}

fn catalog_hit(installed: &PackageEntry, matched: &PackageEntry, path: DetectionPath) -> UpdateDecision {
    let install_package_ref = matched
        .unique_name
        .as_deref()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| installed.unique_name_str())
        .to_string();
    UpdateDecision {
        has_update: true,
        latest_version: matched.version.clone(),
        install_package_ref,
        skipped_reason: None,
        detected_by: Some(path),
    }
}
