use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// REST tables (`usage_logs`, `update_schedules`).
    Rest,
    /// Local SQLite file.
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub package_api_base: String,
    pub package_api_version: String,
    pub package_api_scope: String,
    pub admin_api_base: String,
    pub admin_api_version: String,
    pub admin_api_scope: String,
    pub identity_authority: String,
    pub page_timeout_secs: u64,
    pub pacing_delay_ms: u64,
    pub max_auth_hops: u32,
    pub store_backend: StoreBackend,
    pub store_url: Option<String>,
    pub store_api_key: Option<String>,
    pub database_path: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            package_api_base: "https://api.powerplatform.com/appmanagement".into(),
            package_api_version: "2022-03-01-preview".into(),
            package_api_scope: "https://api.powerplatform.com/.default".into(),
            admin_api_base: "https://api.bap.microsoft.com/providers/Microsoft.BusinessAppPlatform".into(),
            admin_api_version: "2021-04-01".into(),
            admin_api_scope: "https://service.powerapps.com/.default".into(),
            identity_authority: "https://login.microsoftonline.com".into(),
            page_timeout_secs: 60,
            pacing_delay_ms: 1200,
            max_auth_hops: 3,
            store_backend: StoreBackend::Sqlite,
            store_url: None,
            store_api_key: None,
            database_path: None,
        }
    }
}

impl AppSettings {
    /// Default settings file location: `<config dir>/ppupdater/settings.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("ppupdater").join("settings.json"))
    }

    /// Read settings from a JSON file (missing file means defaults), then apply
    /// `PPUPDATER_*` environment overrides.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut settings = match path {
            Some(p) if p.exists() => {
                let json = std::fs::read_to_string(p)?;
                serde_json::from_str(&json)?
            }
            Some(p) => {
                log::info!("Settings file {} not found, using defaults", p.display());
                AppSettings::default()
            }
            None => AppSettings::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> AppResult<()> {
        if let Some(v) = lookup("PPUPDATER_PACKAGE_API_BASE") {
            self.package_api_base = v;
        }
        if let Some(v) = lookup("PPUPDATER_ADMIN_API_BASE") {
            self.admin_api_base = v;
        }
        if let Some(v) = lookup("PPUPDATER_IDENTITY_AUTHORITY") {
            self.identity_authority = v;
        }
        if let Some(v) = lookup("PPUPDATER_PAGE_TIMEOUT_SECS") {
            self.page_timeout_secs = parse_number("PPUPDATER_PAGE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("PPUPDATER_PACING_DELAY_MS") {
            self.pacing_delay_ms = parse_number("PPUPDATER_PACING_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("PPUPDATER_STORE_BACKEND") {
            self.store_backend = match v.to_lowercase().as_str() {
                "rest" => StoreBackend::Rest,
                "sqlite" => StoreBackend::Sqlite,
                other => {
                    return Err(AppError::Config(format!("unknown store backend '{}'", other)));
                }
            };
        }
        if let Some(v) = lookup("PPUPDATER_STORE_URL") {
            self.store_url = Some(v);
        }
        if let Some(v) = lookup("PPUPDATER_STORE_API_KEY") {
            self.store_api_key = Some(v);
        }
        if let Some(v) = lookup("PPUPDATER_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.store_backend == StoreBackend::Rest && self.store_url.is_none() {
            return Err(AppError::Config("storeUrl is required for the rest store backend".into()));
        }
        if self.max_auth_hops == 0 {
            return Err(AppError::Config("maxAuthHops must be at least 1".into()));
        }
        Ok(())
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ppupdater")
                .join("ppupdater.db")
        })
    }
}

fn parse_number(key: &str, value: &str) -> AppResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("{} must be a number, got '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: AppSettings = serde_json::from_str(r#"{"pacingDelayMs": 1500}"#).unwrap();
        assert_eq!(settings.pacing_delay(), Duration::from_millis(1500));
        assert_eq!(settings.page_timeout(), Duration::from_secs(60));
        assert_eq!(settings.max_auth_hops, 3);
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("PPUPDATER_STORE_BACKEND", "rest"),
            ("PPUPDATER_STORE_URL", "https://store.example/rest/v1"),
            ("PPUPDATER_PAGE_TIMEOUT_SECS", "30"),
        ]
        .into_iter()
        .collect();
        let mut settings = AppSettings::default();
        settings
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.store_backend, StoreBackend::Rest);
        assert_eq!(settings.page_timeout_secs, 30);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rest_backend_requires_url() {
        let settings = AppSettings {
            store_backend: StoreBackend::Rest,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn bad_number_override_is_config_error() {
        let mut settings = AppSettings::default();
        let err = settings
            .apply_overrides(|k| (k == "PPUPDATER_PACING_DELAY_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
