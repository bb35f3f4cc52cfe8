use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::models::PackageEntry;
use crate::updaters::version_compare;

/// Highest-version lookups over one raw entry set, keyed three ways.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogIndexes {
    /// applicationId → entry
    pub by_id: HashMap<String, PackageEntry>,
    /// normalized uniqueName → entry
    pub by_name: HashMap<String, PackageEntry>,
    /// lowercased display name → entry
    pub by_display_name: HashMap<String, PackageEntry>,
}

fn upgrade_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)_upgrade$").unwrap_or_else(|_| unreachable!()))
}

fn numeric_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"_\d+$").unwrap_or_else(|_| unreachable!()))
}

/// Strip a trailing `_upgrade` (any case) and then a trailing `_<digits>`.
/// e.g. "msdyn_Sales_2_Upgrade" → "msdyn_Sales"
pub fn normalize_name(unique_name: &str) -> String {
    let without_upgrade = upgrade_suffix().replace(unique_name, "");
    numeric_suffix().replace(&without_upgrade, "").into_owned()
}

pub fn id_key(entry: &PackageEntry) -> Option<String> {
    entry.application_id().map(str::to_string)
}

pub fn name_key(entry: &PackageEntry) -> Option<String> {
    entry
        .unique_name
        .as_deref()
        .filter(|n| !n.is_empty())
        .map(normalize_name)
        .filter(|n| !n.is_empty())
}

pub fn display_name_key(entry: &PackageEntry) -> Option<String> {
    entry.display_name().map(str::to_lowercase)
}

fn offer(index: &mut HashMap<String, PackageEntry>, key: Option<String>, entry: &PackageEntry) {
    let Some(key) = key else { return };
    match index.get(&key) {
        Some(holder)
            if version_compare::compare_versions(entry.version_str(), holder.version_str())
                != Ordering::Greater => {}
        _ => {
            index.insert(key, entry.clone());
        }
    }
}

/// Build the three indexes. Input order matters only for ties: the first entry
/// seen for a key is kept unless a later one is strictly newer.
pub fn build_indexes(entries: &[PackageEntry]) -> CatalogIndexes {
    let mut indexes = CatalogIndexes::default();
    for entry in entries {
        offer(&mut indexes.by_id, id_key(entry), entry);
        offer(&mut indexes.by_name, name_key(entry), entry);
        offer(&mut indexes.by_display_name, display_name_key(entry), entry);
    }
    log::debug!(
        "Indexed {} entries: {} ids, {} names, {} display names",
        entries.len(),
        indexes.by_id.len(),
        indexes.by_name.len(),
        indexes.by_display_name.len()
    );
    indexes
}
