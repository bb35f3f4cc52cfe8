pub mod auth_flow;

use chrono::Utc;
use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use crate::api::admin_api::{normalize_org_url, AdminApi};
use crate::api::{PackageApi, PackageCatalog};
use crate::detection::DiscoveryEngine;
use crate::executor::InstallExecutor;
use crate::models::{BatchOutcome, JobOutcome, UpdateJob, UsageRecord, UsageTrigger};
use crate::store::UsageStore;
use crate::utils::{AppError, AppResult};

pub use auth_flow::{AuthStep, AuthStepMachine, StepMarker, StepStore};

/// Who is signed in and which environment they are working on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentContext {
    pub environment_id: String,
    pub org_url: String,
    pub user_identity: String,
}

impl EnvironmentContext {
    /// Resolve an org URL (as typed by the user) to its environment.
    pub async fn resolve(admin: &AdminApi, org_url: &str, user_identity: &str) -> AppResult<Self> {
        let org_url = normalize_org_url(org_url)?;
        let environment_id = admin.resolve_environment_id(&org_url).await?;
        Ok(Self {
            environment_id,
            org_url,
            user_identity: user_identity.to_string(),
        })
    }
}

/// Interactive state for one environment: the discovered app list and the
/// user's selection. Every refresh replaces both.
pub struct Session<'a> {
    context: EnvironmentContext,
    api: &'a dyn PackageApi,
    secondary: Option<&'a dyn PackageCatalog>,
    usage: Option<&'a dyn UsageStore>,
    pacing: Duration,
    jobs: Vec<UpdateJob>,
    selection: BTreeSet<String>,
}

impl<'a> Session<'a> {
    pub fn new(context: EnvironmentContext, api: &'a dyn PackageApi, pacing: Duration) -> Self {
        Self {
            context,
            api,
            secondary: None,
            usage: None,
            pacing,
            jobs: Vec::new(),
            selection: BTreeSet::new(),
        }
    }

    pub fn with_secondary(mut self, secondary: &'a dyn PackageCatalog) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn with_usage_store(mut self, usage: &'a dyn UsageStore) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn context(&self) -> &EnvironmentContext {
        &self.context
    }

    pub fn jobs(&self) -> &[UpdateJob] {
        &self.jobs
    }

    pub fn job(&self, key: &str) -> Option<&UpdateJob> {
        self.jobs.iter().find(|j| j.key() == key)
    }

    /// Jobs that still have an update to install.
    pub fn pending_updates(&self) -> Vec<&UpdateJob> {
        self.jobs.iter().filter(|j| j.is_actionable()).collect()
    }

    /// Re-run discovery and replace the app list. Returns the number of updates found.
    pub async fn refresh(&mut self) -> AppResult<usize> {
        let engine = match self.secondary {
            Some(secondary) => DiscoveryEngine::with_secondary(self.api.as_catalog(), secondary),
            None => DiscoveryEngine::new(self.api.as_catalog()),
        };
        let discovery = engine.discover().await?;
        let updates = discovery.update_count();

        let mut seen = HashSet::new();
        self.jobs = discovery
            .packages
            .into_iter()
            .enumerate()
            .map(|(index, pkg)| {
                let mut job = UpdateJob::from(pkg);
                if job.key.is_empty() || !seen.insert(job.key.clone()) {
                    job.key = format!("#{}", index);
                }
                job
            })
            .collect();
        self.selection.clear();
        log::info!(
            "Session for {}: {} apps, {} updates",
            self.context.org_url,
            self.jobs.len(),
            updates
        );
        Ok(updates)
    }

    /// Select an app for the next batch. Only apps with an installable update can be selected.
    pub fn select(&mut self, key: &str) -> bool {
        let selectable = self.job(key).map(|j| j.is_actionable()).unwrap_or(false);
        if selectable {
            self.selection.insert(key.to_string());
        }
        selectable
    }

    pub fn deselect(&mut self, key: &str) -> bool {
        self.selection.remove(key)
    }

    /// Returns whether the app is selected afterwards.
    pub fn toggle(&mut self, key: &str) -> bool {
        if self.deselect(key) {
            false
        } else {
            self.select(key)
        }
    }

    pub fn select_all(&mut self) -> usize {
        let keys: Vec<String> = self.pending_updates().iter().map(|j| j.key().to_string()).collect();
        self.selection.extend(keys);
        self.selection.len()
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn selected(&self) -> Vec<&str> {
        self.selection.iter().map(String::as_str).collect()
    }

    pub async fn update_one(&mut self, key: &str) -> AppResult<JobOutcome> {
        let executor = InstallExecutor::new(self.api.as_installer(), self.pacing);
        let job = self
            .jobs
            .iter_mut()
            .find(|j| j.key() == key)
            .ok_or_else(|| AppError::NotFound(format!("app {}", key)))?;
        if !job.is_actionable() {
            return Err(AppError::Install(format!("{} has no installable update", job.label())));
        }
        let outcome = executor.submit(job).await;
        self.after_single(&outcome).await;
        Ok(outcome)
    }

    /// Resubmit a failed job. `Ok(None)` when the job is not in the failed state.
    pub async fn retry(&mut self, key: &str) -> AppResult<Option<JobOutcome>> {
        let executor = InstallExecutor::new(self.api.as_installer(), self.pacing);
        let job = self
            .jobs
            .iter_mut()
            .find(|j| j.key() == key)
            .ok_or_else(|| AppError::NotFound(format!("app {}", key)))?;
        let outcome = executor.retry(job).await;
        if let Some(ref outcome) = outcome {
            self.after_single(outcome).await;
        }
        Ok(outcome)
    }

    pub async fn update_selected(&mut self) -> BatchOutcome {
        let executor = InstallExecutor::new(self.api.as_installer(), self.pacing);
        let selection = &self.selection;
        let batch = executor
            .run_batch(self.jobs.iter_mut().filter(|j| selection.contains(j.key())))
            .await;
        self.after_batch(&batch).await;
        batch
    }

    pub async fn update_all(&mut self) -> BatchOutcome {
        let executor = InstallExecutor::new(self.api.as_installer(), self.pacing);
        let batch = executor.run_batch(self.jobs.iter_mut()).await;
        self.after_batch(&batch).await;
        batch
    }

    async fn after_single(&mut self, outcome: &JobOutcome) {
        let mut batch = BatchOutcome::default();
        batch.push(outcome.clone());
        self.after_batch(&batch).await;
    }

    /// Drop apps without a pending update from the selection and log usage.
    async fn after_batch(&mut self, batch: &BatchOutcome) {
        let jobs = &self.jobs;
        self.selection
            .retain(|key| jobs.iter().any(|j| j.key() == key && j.is_actionable()));
        if batch.attempted() == 0 {
            return;
        }
        if let Some(usage) = self.usage {
            let record = UsageRecord::from_batch(
                Utc::now(),
                &self.context.user_identity,
                &self.context.org_url,
                batch,
                UsageTrigger::Interactive,
            );
            if let Err(e) = usage.append_usage(&record).await {
                log::warn!("Could not log usage: {}", e);
            }
        }
    }
}
