use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::BatchOutcome;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UsageTrigger {
    #[default]
    Interactive,
    Scheduled,
}

impl UsageTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageTrigger::Interactive => "interactive",
            UsageTrigger::Scheduled => "scheduled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "scheduled" => UsageTrigger::Scheduled,
            _ => UsageTrigger::Interactive,
        }
    }
}

/// One row of the append-only usage log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub user_identity: String,
    pub org_url: String,
    pub success_count: usize,
    pub fail_count: usize,
    #[serde(default)]
    pub app_names: Vec<String>,
    #[serde(default)]
    pub trigger: UsageTrigger,
}

impl UsageRecord {
    /// Usage row for one finished batch. App names cover every attempted install.
    pub fn from_batch(
        timestamp: DateTime<Utc>,
        user_identity: &str,
        org_url: &str,
        batch: &BatchOutcome,
        trigger: UsageTrigger,
    ) -> Self {
        Self {
            timestamp,
            user_identity: user_identity.to_string(),
            org_url: org_url.to_string(),
            success_count: batch.success_count,
            fail_count: batch.fail_count,
            app_names: batch.attempted_names(),
            trigger,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NamedCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub total_runs: usize,
    pub scheduled_runs: usize,
    pub total_successes: usize,
    pub total_failures: usize,
    pub by_org: Vec<NamedCount>,
    pub by_user: Vec<NamedCount>,
    pub top_apps: Vec<NamedCount>,
    /// "YYYY-MM-DD" → runs that day, ascending by date.
    pub runs_per_day: Vec<NamedCount>,
}
