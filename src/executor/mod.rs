use std::time::Duration;

use crate::api::PackageInstaller;
use crate::models::{BatchOutcome, JobOutcome, UpdateJob, UpdateState};
use crate::utils::http_client::truncate_body;

/// Marker the platform returns for packages that need their own installer UI.
const CUSTOM_INSTALL_MARKER: &str = "Custom Install Experience";

pub const CUSTOM_INSTALL_MESSAGE: &str =
    "This package uses a custom install experience and cannot be updated through the API. \
     Update it from the Power Platform admin center.";

/// Submits install requests one at a time with a pause between them.
pub struct InstallExecutor<'a> {
    installer: &'a dyn PackageInstaller,
    pacing: Duration,
}

impl<'a> InstallExecutor<'a> {
    pub fn new(installer: &'a dyn PackageInstaller, pacing: Duration) -> Self {
        Self { installer, pacing }
    }

    /// Submit one job and record the outcome on it.
    ///
    /// `none|failed -> submitted -> none` on a 2xx (the update is gone), or
    /// `-> failed` with the captured error otherwise.
    pub async fn submit(&self, job: &mut UpdateJob) -> JobOutcome {
        job.update_state = UpdateState::Submitted;
        job.update_error = None;
        let package_ref = job.decision.install_package_ref.clone();

        let error = if package_ref.is_empty() {
            Some("Package has no unique name to install".to_string())
        } else {
            match self.installer.install(&package_ref).await {
                Ok(response) if response.is_success() => None,
                Ok(response) => Some(describe_failure(response.status, &response.body)),
                Err(e) => Some(format!("Request failed: {}", e)),
            }
        };

        match error {
            None => {
                job.update_state = UpdateState::None;
                job.decision.has_update = false;
                log::info!("Install accepted for {} ({})", job.label(), package_ref);
            }
            Some(ref message) => {
                job.update_state = UpdateState::Failed;
                job.update_error = Some(message.clone());
                log::warn!("Install failed for {} ({}): {}", job.label(), package_ref, message);
            }
        }

        JobOutcome {
            package_ref,
            display_name: job.label().to_string(),
            success: error.is_none(),
            error,
        }
    }

    /// Resubmit a failed job. Jobs in any other state are left alone.
    pub async fn retry(&self, job: &mut UpdateJob) -> Option<JobOutcome> {
        if job.update_state != UpdateState::Failed {
            return None;
        }
        Some(self.submit(job).await)
    }

    /// Submit every actionable job strictly in order, pausing between requests.
    pub async fn run_batch<'j, I>(&self, jobs: I) -> BatchOutcome
    where
        I: IntoIterator<Item = &'j mut UpdateJob>,
    {
        let pending: Vec<&'j mut UpdateJob> = jobs.into_iter().filter(|j| j.is_actionable()).collect();
        let total = pending.len();
        let mut batch = BatchOutcome::default();

        for (i, job) in pending.into_iter().enumerate() {
            let outcome = self.submit(job).await;
            batch.push(outcome);
            if i + 1 < total && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }

        log::info!(
            "Batch finished: {} succeeded, {} failed",
            batch.success_count,
            batch.fail_count
        );
        batch
    }
}

/// Turn a non-2xx install response into the message shown on the job.
pub fn describe_failure(status: u16, body: &str) -> String {
    if body.contains(CUSTOM_INSTALL_MARKER) {
        return CUSTOM_INSTALL_MESSAGE.to_string();
    }
    format!("HTTP {}: {}", status, truncate_body(body, 200))
}
