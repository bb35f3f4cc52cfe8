use std::collections::HashSet;

use super::catalog_index::{self, build_indexes, CatalogIndexes};
use super::reconciler::{self, check_catalog, check_direct_fields_against};
use crate::models::{DetectionPath, PackageEntry, ReconciledPackage, UpdateDecision};

/// Fold a second, independently fetched listing of the same environment into
/// the primary decisions.
///
/// Decisions that already report an update are left untouched. The merge is a
/// best-effort union: a miss in both sources simply stays "no update".
pub fn merge_secondary(primary: Vec<ReconciledPackage>, secondary: &[PackageEntry]) -> Vec<ReconciledPackage> {
    if secondary.is_empty() {
        return primary;
    }

    let indexes = build_indexes(secondary);
    let mut promoted = 0usize;

    let mut merged: Vec<ReconciledPackage> = primary
        .into_iter()
        .map(|mut pkg| {
            if pkg.decision.has_update || pkg.decision.is_skipped() {
                return pkg;
            }
            if let Some(decision) = recheck(&pkg.entry, secondary, &indexes) {
                log::info!(
                    "Secondary listing reports update for {} ({} → {})",
                    pkg.entry.label(),
                    pkg.entry.version_str(),
                    decision.latest_version.as_deref().unwrap_or("unknown"),
                );
                promoted += 1;
                pkg.decision = decision;
            }
            pkg
        })
        .collect();

    let appended = append_unknown_installed(&mut merged, secondary, &indexes);

    log::info!(
        "Merged secondary listing ({} entries): {} promoted, {} added",
        secondary.len(),
        promoted,
        appended
    );
    merged
}

/// Re-run the state, direct-field and catalog checks for an installed entry
/// against the secondary source, in the usual precedence order.
fn recheck(installed: &PackageEntry, secondary: &[PackageEntry], indexes: &CatalogIndexes) -> Option<UpdateDecision> {
    let current = installed.version_str();

    for counterpart in counterparts(installed, secondary) {
        if reconciler::check_state(counterpart).is_some() {
            return Some(UpdateDecision {
                has_update: true,
                detected_by: Some(DetectionPath::SecondarySource),
                ..UpdateDecision::no_update(installed)
            });
        }
        if let Some(decision) = check_direct_fields_against(counterpart, current, installed) {
            return Some(UpdateDecision {
                detected_by: Some(DetectionPath::SecondarySource),
                ..decision
            });
        }
    }

    check_catalog(installed, current, indexes).map(|decision| {
        log::debug!(
            "Secondary catalog hit for {} via {}",
            installed.label(),
            decision.detected_by.map(|p| p.as_str()).unwrap_or("none")
        );
        UpdateDecision {
            detected_by: Some(DetectionPath::SecondarySource),
            ..decision
        }
    })
}

/// Every secondary entry describing the same app: all id matches in listing
/// order, then normalized-name matches, then display-name matches.
fn counterparts<'a>(installed: &PackageEntry, secondary: &'a [PackageEntry]) -> Vec<&'a PackageEntry> {
    let keys: [(Option<String>, fn(&PackageEntry) -> Option<String>); 3] = [
        (catalog_index::id_key(installed), catalog_index::id_key),
        (catalog_index::name_key(installed), catalog_index::name_key),
        (catalog_index::display_name_key(installed), catalog_index::display_name_key),
    ];

    let mut found: Vec<&PackageEntry> = Vec::new();
    for (key, key_of) in keys {
        let Some(key) = key else { continue };
        for entry in secondary {
            if key_of(entry).as_deref() == Some(key.as_str()) && !found.iter().any(|f| std::ptr::eq(*f, entry)) {
                found.push(entry);
            }
        }
    }
    found
}

fn append_unknown_installed(
    merged: &mut Vec<ReconciledPackage>,
    secondary: &[PackageEntry],
    indexes: &CatalogIndexes,
) -> usize {
    let mut known_ids: HashSet<String> = merged
        .iter()
        .filter_map(|p| catalog_index::id_key(&p.entry))
        .collect();
    let mut known_names: HashSet<String> = merged
        .iter()
        .filter_map(|p| catalog_index::display_name_key(&p.entry))
        .collect();

    let mut appended = 0usize;
    for entry in secondary.iter().filter(|e| e.looks_installed()) {
        let id = catalog_index::id_key(entry);
        let name = catalog_index::display_name_key(entry);
        if id.is_none() && name.is_none() {
            log::debug!("Ignoring secondary entry without id or display name");
            continue;
        }
        let seen = id.as_ref().is_some_and(|i| known_ids.contains(i))
            || name.as_ref().is_some_and(|n| known_names.contains(n));
        if seen {
            continue;
        }

        let decision = reconciler::reconcile(entry, indexes);
        log::info!(
            "Adding {} from secondary listing (update: {})",
            entry.label(),
            decision.has_update
        );
        known_ids.extend(id);
        known_names.extend(name);
        merged.push(ReconciledPackage {
            entry: entry.clone(),
            decision,
        });
        appended += 1;
    }
    appended
}
