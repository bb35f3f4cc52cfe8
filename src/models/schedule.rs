use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::{AppError, AppResult};

/// Opaque reference to a stored client secret. Only the token provider resolves it.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct SecretRef(String);

impl SecretRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretRef({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
    NoUpdates,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::NoUpdates => "no_updates",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunStatus::Success),
            "partial" => Some(RunStatus::Partial),
            "failed" => Some(RunStatus::Failed),
            "no_updates" => Some(RunStatus::NoUpdates),
            _ => None,
        }
    }
}

/// Credentials the unattended runner exchanges for a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret_ref: SecretRef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: i64,
    pub user_identity: String,
    pub environment_id: String,
    pub org_url: String,
    pub enabled: bool,
    /// 0 = Sunday.
    pub day_of_week: u8,
    /// Whole UTC hour, "HH:00".
    pub time_utc: String,
    pub timezone: String,
    pub client_id: String,
    pub client_secret_ref: SecretRef,
    pub tenant_id: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<RunStatus>,
    pub last_run_result: Option<String>,
}

impl Schedule {
    pub fn credentials(&self) -> ServiceCredentials {
        ServiceCredentials {
            tenant_id: self.tenant_id.clone(),
            client_id: self.client_id.clone(),
            client_secret_ref: self.client_secret_ref.clone(),
        }
    }
}

/// Configuration fields written by the interactive client. Run-result fields are
/// owned by the unattended runner and never appear here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDraft {
    pub user_identity: String,
    pub environment_id: String,
    pub org_url: String,
    pub enabled: bool,
    pub day_of_week: u8,
    pub time_utc: String,
    pub timezone: String,
    pub client_id: String,
    pub client_secret_ref: SecretRef,
    pub tenant_id: String,
}

impl ScheduleDraft {
    pub fn validate(&self) -> AppResult<()> {
        if self.day_of_week > 6 {
            return Err(AppError::Config(format!(
                "dayOfWeek must be 0-6, got {}",
                self.day_of_week
            )));
        }
        if parse_hour_slot(&self.time_utc).is_none() {
            return Err(AppError::Config(format!(
                "timeUtc must be a whole hour like \"14:00\", got \"{}\"",
                self.time_utc
            )));
        }
        for (field, value) in [
            ("userIdentity", self.user_identity.as_str()),
            ("environmentId", self.environment_id.as_str()),
            ("tenantId", self.tenant_id.as_str()),
            ("clientId", self.client_id.as_str()),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::Config(format!("{} is required", field)));
            }
        }
        if self.client_secret_ref.is_empty() {
            return Err(AppError::Config("clientSecretRef is required".into()));
        }
        Ok(())
    }
}

/// Outcome the unattended runner writes back onto a schedule row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub last_run_at: DateTime<Utc>,
    pub last_run_status: RunStatus,
    pub last_run_result: String,
}

/// Parse "HH:00" into the hour. Minutes other than 00 are rejected.
pub fn parse_hour_slot(slot: &str) -> Option<u32> {
    let (hh, mm) = slot.split_once(':')?;
    if hh.len() != 2 || !hh.bytes().all(|b| b.is_ascii_digit()) || mm != "00" {
        return None;
    }
    let hour: u32 = hh.parse().ok()?;
    (hour < 24).then_some(hour)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> ScheduleDraft {
        ScheduleDraft {
            user_identity: "admin@contoso.com".into(),
            environment_id: "env-1".into(),
            org_url: "https://contoso.crm.dynamics.com".into(),
            enabled: true,
            day_of_week: 3,
            time_utc: "14:00".into(),
            timezone: "Europe/London".into(),
            client_id: "client".into(),
            client_secret_ref: SecretRef::new("env:CONTOSO_SECRET"),
            tenant_id: "tenant".into(),
        }
    }

    #[test]
    fn valid_draft_passes() {
        assert!(draft().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_day_and_partial_hour() {
        let mut d = draft();
        d.day_of_week = 7;
        assert!(d.validate().is_err());

        let mut d = draft();
        d.time_utc = "14:30".into();
        assert!(d.validate().is_err());

        let mut d = draft();
        d.time_utc = "+9:00".into();
        assert!(d.validate().is_err());

        let mut d = draft();
        d.client_secret_ref = SecretRef::new("  ");
        assert!(d.validate().is_err());
    }

    #[test]
    fn parses_hour_slots() {
        assert_eq!(parse_hour_slot("00:00"), Some(0));
        assert_eq!(parse_hour_slot("23:00"), Some(23));
        assert_eq!(parse_hour_slot("24:00"), None);
        assert_eq!(parse_hour_slot("9:00"), None);
        assert_eq!(parse_hour_slot("nope"), None);
        assert_eq!(parse_hour_slot("+9:00"), None);
        assert_eq!(parse_hour_slot(" 9:00"), None);
    }

    #[test]
    fn run_status_round_trips_through_str() {
        for status in [RunStatus::Success, RunStatus::Partial, RunStatus::Failed, RunStatus::NoUpdates] {
            assert_eq!(RunStatus::from_str(status.as_str()), Some(status));
        }
    }
}
