use serde::{Deserialize, Serialize};

use super::{PackageEntry, ReconciledPackage, UpdateDecision};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    #[default]
    None,
    Submitted,
    Failed,
}

impl UpdateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateState::None => "none",
            UpdateState::Submitted => "submitted",
            UpdateState::Failed => "failed",
        }
    }
}

/// Client-side tracking of one app's install attempts. Replaced on every refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJob {
    /// Identity of the installed entry; unique within one session's app list.
    pub key: String,
    pub entry: PackageEntry,
    pub decision: UpdateDecision,
    pub update_state: UpdateState,
    pub update_error: Option<String>,
}

impl UpdateJob {
    pub fn new(entry: PackageEntry, decision: UpdateDecision) -> Self {
        let key = entry
            .application_id()
            .or_else(|| entry.unique_name.as_deref().filter(|n| !n.trim().is_empty()))
            .unwrap_or("")
            .to_string();
        Self {
            key,
            entry,
            decision,
            update_state: UpdateState::None,
            update_error: None,
        }
    }

    /// Selection key: the installed entry's application id, else its own uniqueName.
    /// Never the install target, which several entries can share.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn label(&self) -> &str {
        self.entry.label()
    }

    /// Eligible for submission: has an update and is not excluded.
    pub fn is_actionable(&self) -> bool {
        self.decision.has_update && !self.decision.is_skipped() && self.update_state != UpdateState::Submitted
    }
}

impl From<ReconciledPackage> for UpdateJob {
    fn from(pkg: ReconciledPackage) -> Self {
        UpdateJob::new(pkg.entry, pkg.decision)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub package_ref: String,
    pub display_name: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub success_count: usize,
    pub fail_count: usize,
    pub outcomes: Vec<JobOutcome>,
}

impl BatchOutcome {
    pub fn push(&mut self, outcome: JobOutcome) {
        if outcome.success {
            self.success_count += 1;
        } else {
            self.fail_count += 1;
        }
        self.outcomes.push(outcome);
    }

    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn attempted_names(&self) -> Vec<String> {
        self.outcomes.iter().map(|o| o.display_name.clone()).collect()
    }
}
