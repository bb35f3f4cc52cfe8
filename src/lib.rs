pub mod analytics;
pub mod api;
pub mod db;
pub mod detection;
pub mod executor;
pub mod models;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod updaters;
pub mod utils;

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

use api::identity::EnvSecretResolver;
use models::AppSettings;
use scheduler::{HttpClientFactory, RunSummary, ScheduledRunner};
use utils::{http_client, AppResult};

/// Entry point of the unattended runner: process every schedule due in the
/// current UTC hour, then exit. Safe to invoke more than once per slot.
pub fn run() {
    env_logger::init();

    let settings_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(AppSettings::default_path);
    let settings = match AppSettings::load(settings_path.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            log::error!("Failed to load settings: {}", e);
            return;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("Failed to start async runtime: {}", e);
            return;
        }
    };

    match runtime.block_on(run_due_schedules(settings)) {
        Ok(summary) => log::info!(
            "Scheduled run complete: {} due, {} succeeded, {} partial, {} failed, {} without updates",
            summary.due,
            summary.succeeded,
            summary.partial,
            summary.failed,
            summary.no_updates
        ),
        Err(e) => log::error!("Scheduled run aborted: {}", e),
    }
}

pub async fn run_due_schedules(settings: AppSettings) -> AppResult<RunSummary> {
    let http = http_client::create_http_client(settings.page_timeout())?;
    let stores = store::open_stores(&settings, &http)?;
    let pacing = settings.pacing_delay();
    let clients = HttpClientFactory::new(http, settings, Arc::new(EnvSecretResolver));

    let runner = ScheduledRunner::new(
        stores.schedules.as_ref(),
        stores.usage.as_ref(),
        &clients,
        pacing,
    );
    runner.run_due(Utc::now()).await
}
