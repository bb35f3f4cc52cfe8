use std::collections::{BTreeMap, HashMap};

use crate::models::{NamedCount, UsageRecord, UsageSummary, UsageTrigger};

/// Roll usage rows up into totals and rankings.
///
/// Org and user counts are runs; app counts are how often an app appeared in a
/// run. Rankings sort by count descending, then name ascending. The per-day
/// histogram is keyed by UTC date and sorted ascending.
pub fn summarize_usage(records: &[UsageRecord]) -> UsageSummary {
    let mut by_org: HashMap<&str, usize> = HashMap::new();
    let mut by_user: HashMap<&str, usize> = HashMap::new();
    let mut by_app: HashMap<&str, usize> = HashMap::new();
    let mut per_day: BTreeMap<String, usize> = BTreeMap::new();
    let mut summary = UsageSummary::default();

    for record in records {
        summary.total_runs += 1;
        if record.trigger == UsageTrigger::Scheduled {
            summary.scheduled_runs += 1;
        }
        summary.total_successes += record.success_count;
        summary.total_failures += record.fail_count;

        *by_org.entry(record.org_url.as_str()).or_default() += 1;
        *by_user.entry(record.user_identity.as_str()).or_default() += 1;
        for app in record.app_names.iter().filter(|a| !a.trim().is_empty()) {
            *by_app.entry(app.as_str()).or_default() += 1;
        }
        *per_day
            .entry(record.timestamp.format("%Y-%m-%d").to_string())
            .or_default() += 1;
    }

    summary.by_org = ranked(by_org);
    summary.by_user = ranked(by_user);
    summary.top_apps = ranked(by_app);
    summary.runs_per_day = per_day
        .into_iter()
        .map(|(name, count)| NamedCount { name, count })
        .collect();
    summary
}

fn ranked(counts: HashMap<&str, usize>) -> Vec<NamedCount> {
    let mut out: Vec<NamedCount> = counts
        .into_iter()
        .map(|(name, count)| NamedCount {
            name: name.to_string(),
            count,
        })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    out
}
