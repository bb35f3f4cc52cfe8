use chrono::{DateTime, Datelike, Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::api::identity::{ClientCredentialProvider, SecretResolver};
use crate::api::package_api::{HttpPackageApi, ListingEndpoint};
use crate::api::PackageApi;
use crate::detection::DiscoveryEngine;
use crate::executor::InstallExecutor;
use crate::models::{
    AppSettings, BatchOutcome, RunRecord, RunStatus, Schedule, UpdateJob, UsageRecord, UsageTrigger,
};
use crate::store::{ScheduleStore, UsageStore};
use crate::utils::AppResult;

/// The `(day_of_week, "HH:00")` slot containing `now`. Sunday is 0.
pub fn current_slot(now: DateTime<Utc>) -> (u8, String) {
    let day = now.weekday().num_days_from_sunday() as u8;
    (day, format!("{:02}:00", now.hour()))
}

pub fn is_due(schedule: &Schedule, now: DateTime<Utc>) -> bool {
    let (day, slot) = current_slot(now);
    schedule.enabled && schedule.day_of_week == day && schedule.time_utc == slot
}

pub fn select_due(schedules: &[Schedule], now: DateTime<Utc>) -> Vec<&Schedule> {
    schedules.iter().filter(|s| is_due(s, now)).collect()
}

/// Builds the authenticated package API a schedule runs against.
pub trait ScheduleClients: Send + Sync {
    fn package_api(&self, schedule: &Schedule) -> AppResult<Arc<dyn PackageApi>>;
}

/// Production clients: a client-credential token per schedule and the HTTP package API.
pub struct HttpClientFactory {
    http: reqwest::Client,
    settings: AppSettings,
    secrets: Arc<dyn SecretResolver>,
}

impl HttpClientFactory {
    pub fn new(http: reqwest::Client, settings: AppSettings, secrets: Arc<dyn SecretResolver>) -> Self {
        Self { http, settings, secrets }
    }
}

impl ScheduleClients for HttpClientFactory {
    fn package_api(&self, schedule: &Schedule) -> AppResult<Arc<dyn PackageApi>> {
        let tokens = Arc::new(ClientCredentialProvider::new(
            self.http.clone(),
            self.settings.identity_authority.clone(),
            schedule.credentials(),
            self.secrets.clone(),
        ));
        let endpoint = ListingEndpoint {
            label: "package api".into(),
            base: self.settings.package_api_base.clone(),
            environment_id: schedule.environment_id.clone(),
            api_version: self.settings.package_api_version.clone(),
            scope: self.settings.package_api_scope.clone(),
        };
        Ok(Arc::new(HttpPackageApi::new(
            self.http.clone(),
            tokens,
            endpoint,
            self.settings.page_timeout(),
        )))
    }
}

/// Totals across one invocation of the runner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub due: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    pub no_updates: usize,
}

impl RunSummary {
    fn count(&mut self, status: RunStatus) {
        match status {
            RunStatus::Success => self.succeeded += 1,
            RunStatus::Partial => self.partial += 1,
            RunStatus::Failed => self.failed += 1,
            RunStatus::NoUpdates => self.no_updates += 1,
        }
    }
}

/// Unattended runner: processes every schedule due in the current UTC slot.
pub struct ScheduledRunner<'a> {
    schedules: &'a dyn ScheduleStore,
    usage: &'a dyn UsageStore,
    clients: &'a dyn ScheduleClients,
    pacing: Duration,
}

impl<'a> ScheduledRunner<'a> {
    pub fn new(
        schedules: &'a dyn ScheduleStore,
        usage: &'a dyn UsageStore,
        clients: &'a dyn ScheduleClients,
        pacing: Duration,
    ) -> Self {
        Self {
            schedules,
            usage,
            clients,
            pacing,
        }
    }

    /// Run all due schedules one after another. A failing schedule never stops
    /// the rest; only failing to list schedules is an error.
    pub async fn run_due(&self, now: DateTime<Utc>) -> AppResult<RunSummary> {
        let (day, slot) = current_slot(now);
        let stored = self.schedules.due_schedules(day, &slot).await?;
        let due = select_due(&stored, now);
        log::info!("{} schedule(s) due for day {} at {} UTC", due.len(), day, slot);

        let mut summary = RunSummary {
            due: due.len(),
            ..Default::default()
        };
        for schedule in due {
            let status = self.run_schedule(schedule, now).await;
            summary.count(status);
        }
        Ok(summary)
    }

    async fn run_schedule(&self, schedule: &Schedule, now: DateTime<Utc>) -> RunStatus {
        log::info!(
            "Running schedule {} for {} ({})",
            schedule.id,
            schedule.user_identity,
            schedule.org_url
        );

        let (record, batch) = match self.update_environment(schedule).await {
            Ok(Some(batch)) => (
                RunRecord {
                    last_run_at: now,
                    last_run_status: batch_status(&batch),
                    last_run_result: describe_batch(&batch),
                },
                Some(batch),
            ),
            Ok(None) => (
                RunRecord {
                    last_run_at: now,
                    last_run_status: RunStatus::NoUpdates,
                    last_run_result: "No updates available".into(),
                },
                None,
            ),
            Err(e) => {
                log::error!("Schedule {} failed: {}", schedule.id, e);
                (
                    RunRecord {
                        last_run_at: now,
                        last_run_status: RunStatus::Failed,
                        last_run_result: e.to_string(),
                    },
                    None,
                )
            }
        };

        if let Err(e) = self.schedules.record_run(schedule.id, &record).await {
            log::error!("Could not record run for schedule {}: {}", schedule.id, e);
        }

        if let Some(batch) = batch.filter(|b| b.attempted() > 0) {
            let usage = UsageRecord::from_batch(
                now,
                &schedule.user_identity,
                &schedule.org_url,
                &batch,
                UsageTrigger::Scheduled,
            );
            if let Err(e) = self.usage.append_usage(&usage).await {
                log::warn!("Could not log usage for schedule {}: {}", schedule.id, e);
            }
        }

        log::info!(
            "Schedule {} finished: {} ({})",
            schedule.id,
            record.last_run_status.as_str(),
            record.last_run_result
        );
        record.last_run_status
    }

    /// `Ok(None)` when nothing needs updating.
    async fn update_environment(&self, schedule: &Schedule) -> AppResult<Option<BatchOutcome>> {
        let api = self.clients.package_api(schedule)?;
        let discovery = DiscoveryEngine::new(api.as_catalog()).discover().await?;

        let mut jobs: Vec<UpdateJob> = discovery
            .packages
            .into_iter()
            .map(UpdateJob::from)
            .filter(|j| j.is_actionable())
            .collect();
        if jobs.is_empty() {
            return Ok(None);
        }

        let executor = InstallExecutor::new(api.as_installer(), self.pacing);
        Ok(Some(executor.run_batch(jobs.iter_mut()).await))
    }
}

fn batch_status(batch: &BatchOutcome) -> RunStatus {
    match (batch.success_count, batch.fail_count) {
        (_, 0) => RunStatus::Success,
        (0, _) => RunStatus::Failed,
        _ => RunStatus::Partial,
    }
}

fn describe_batch(batch: &BatchOutcome) -> String {
    let mut result = format!("{} updated, {} failed", batch.success_count, batch.fail_count);
    let failures: Vec<String> = batch
        .outcomes
        .iter()
        .filter(|o| !o.success)
        .map(|o| format!("{}: {}", o.display_name, o.error.as_deref().unwrap_or("unknown error")))
        .collect();
    if !failures.is_empty() {
        result.push_str(" (");
        result.push_str(&failures.join("; "));
        result.push(')');
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, SqliteStore};
    use crate::detection::testing::FakeApi;
    use crate::models::{PackageEntry, ScheduleDraft, SecretRef};
    use crate::utils::AppError;
    use chrono::TimeZone;
    use std::collections::HashMap;

    struct FakeClients {
        apis: HashMap<String, Arc<FakeApi>>,
    }

    impl ScheduleClients for FakeClients {
        fn package_api(&self, schedule: &Schedule) -> AppResult<Arc<dyn PackageApi>> {
            match self.apis.get(&schedule.environment_id) {
                Some(api) => Ok(api.clone()),
                None => Err(AppError::Identity("AADSTS7000215: invalid client secret".into())),
            }
        }
    }

    fn wednesday_1415() -> DateTime<Utc> {
        // 2026-03-04 is a Wednesday
        Utc.with_ymd_and_hms(2026, 3, 4, 14, 15, 0).unwrap()
    }

    fn draft(env: &str, day: u8, time: &str, enabled: bool) -> ScheduleDraft {
        ScheduleDraft {
            user_identity: format!("admin@{}", env),
            environment_id: env.into(),
            org_url: format!("https://{}.crm.dynamics.com", env),
            enabled,
            day_of_week: day,
            time_utc: time.into(),
            timezone: "UTC".into(),
            client_id: "client".into(),
            client_secret_ref: SecretRef::new("env:SECRET"),
            tenant_id: "tenant".into(),
        }
    }

    fn entry(name: &str, version: &str, state: &str) -> PackageEntry {
        PackageEntry {
            unique_name: Some(name.into()),
            application_id: Some(format!("{}-id", name)),
            localized_name: Some(name.to_uppercase()),
            version: Some(version.into()),
            state: Some(state.into()),
            ..Default::default()
        }
    }

    fn api_with_updates(names: &[&str]) -> FakeApi {
        FakeApi {
            installed: names
                .iter()
                .map(|n| entry(n, "1.0", "InstalledWithUpdateAvailable"))
                .collect(),
            not_installed: Some(Vec::new()),
            ..Default::default()
        }
    }

    #[test]
    fn wednesday_1400_matches_only_that_slot() {
        let now = wednesday_1415();
        assert_eq!(current_slot(now), (3, "14:00".to_string()));

        let as_schedule = |d: ScheduleDraft, id: i64| Schedule {
            id,
            user_identity: d.user_identity,
            environment_id: d.environment_id,
            org_url: d.org_url,
            enabled: d.enabled,
            day_of_week: d.day_of_week,
            time_utc: d.time_utc,
            timezone: d.timezone,
            client_id: d.client_id,
            client_secret_ref: d.client_secret_ref,
            tenant_id: d.tenant_id,
            last_run_at: None,
            last_run_status: None,
            last_run_result: None,
        };
        let schedules = vec![
            as_schedule(draft("a", 3, "14:00", true), 1),
            as_schedule(draft("b", 3, "14:00", false), 2),
            as_schedule(draft("c", 3, "15:00", true), 3),
            as_schedule(draft("d", 2, "14:00", true), 4),
        ];
        let due = select_due(&schedules, now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, 1);
    }

    #[tokio::test]
    async fn failing_schedule_does_not_stop_the_rest() {
        let store = SqliteStore::new(Database::open_in_memory().unwrap());
        let broken = store.upsert_schedule(&draft("broken", 3, "14:00", true)).await.unwrap();
        let good = store.upsert_schedule(&draft("good", 3, "14:00", true)).await.unwrap();
        let idle = store.upsert_schedule(&draft("idle", 3, "14:00", true)).await.unwrap();

        let mut failing = api_with_updates(&["pkgA", "pkgB"]);
        failing.install_responses.insert("pkgB".into(), (500, "boom".into()));
        let good_api = Arc::new(failing);
        let idle_api = Arc::new(FakeApi {
            installed: vec![entry("pkgC", "1.0", "Installed")],
            not_installed: Some(Vec::new()),
            ..Default::default()
        });
        let clients = FakeClients {
            apis: HashMap::from([
                ("good".to_string(), good_api.clone()),
                ("idle".to_string(), idle_api.clone()),
            ]),
        };

        let runner = ScheduledRunner::new(&store, &store, &clients, Duration::ZERO);
        let summary = runner.run_due(wednesday_1415()).await.unwrap();
        assert_eq!(
            summary,
            RunSummary {
                due: 3,
                succeeded: 0,
                partial: 1,
                failed: 1,
                no_updates: 1,
            }
        );
        assert_eq!(good_api.submitted(), vec!["pkgA", "pkgB"]);
        assert!(idle_api.submitted().is_empty());

        let broken = store.schedule_for(&broken.user_identity, "broken").await.unwrap().unwrap();
        assert_eq!(broken.last_run_status, Some(RunStatus::Failed));
        assert!(broken.last_run_result.unwrap().contains("AADSTS7000215"));

        let good = store.schedule_for(&good.user_identity, "good").await.unwrap().unwrap();
        assert_eq!(good.last_run_status, Some(RunStatus::Partial));
        assert_eq!(good.last_run_at, Some(wednesday_1415()));
        assert!(good.last_run_result.unwrap().starts_with("1 updated, 1 failed"));

        let idle = store.schedule_for(&idle.user_identity, "idle").await.unwrap().unwrap();
        assert_eq!(idle.last_run_status, Some(RunStatus::NoUpdates));

        let usage = store.list_usage(10).await.unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].trigger, UsageTrigger::Scheduled);
        assert_eq!(usage[0].success_count, 1);
        assert_eq!(usage[0].fail_count, 1);
        assert_eq!(usage[0].app_names, vec!["PKGA", "PKGB"]);
    }

    #[tokio::test]
    async fn nothing_due_touches_nothing() {
        let store = SqliteStore::new(Database::open_in_memory().unwrap());
        let s = store.upsert_schedule(&draft("later", 3, "18:00", true)).await.unwrap();
        let clients = FakeClients { apis: HashMap::new() };
        let runner = ScheduledRunner::new(&store, &store, &clients, Duration::ZERO);

        let summary = runner.run_due(wednesday_1415()).await.unwrap();
        assert_eq!(summary.due, 0);
        let untouched = store.schedule_for(&s.user_identity, "later").await.unwrap().unwrap();
        assert!(untouched.last_run_at.is_none());
    }

    #[test]
    fn batch_status_mapping() {
        let mut batch = BatchOutcome {
            success_count: 2,
            fail_count: 0,
            outcomes: Vec::new(),
        };
        assert_eq!(batch_status(&batch), RunStatus::Success);
        batch.fail_count = 1;
        assert_eq!(batch_status(&batch), RunStatus::Partial);
        batch.success_count = 0;
        assert_eq!(batch_status(&batch), RunStatus::Failed);
    }
}
