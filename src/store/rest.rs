use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{ScheduleStore, UsageStore};
use crate::models::{RunRecord, RunStatus, Schedule, ScheduleDraft, SecretRef, UsageRecord, UsageTrigger};
use crate::utils::http_client::truncate_body;
use crate::utils::{AppError, AppResult};

const USAGE_TABLE: &str = "usage_logs";
const SCHEDULE_TABLE: &str = "update_schedules";

/// Row shape of `update_schedules`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScheduleRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    user_identity: String,
    environment_id: String,
    org_url: String,
    enabled: bool,
    day_of_week: u8,
    time_utc: String,
    timezone: String,
    client_id: String,
    client_secret_ref: String,
    tenant_id: String,
    #[serde(skip_serializing)]
    last_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    last_run_status: Option<String>,
    #[serde(skip_serializing)]
    last_run_result: Option<String>,
}

impl From<&ScheduleDraft> for ScheduleRow {
    fn from(d: &ScheduleDraft) -> Self {
        Self {
            id: None,
            user_identity: d.user_identity.clone(),
            environment_id: d.environment_id.clone(),
            org_url: d.org_url.clone(),
            enabled: d.enabled,
            day_of_week: d.day_of_week,
            time_utc: d.time_utc.clone(),
            timezone: d.timezone.clone(),
            client_id: d.client_id.clone(),
            client_secret_ref: d.client_secret_ref.as_str().to_string(),
            tenant_id: d.tenant_id.clone(),
            last_run_at: None,
            last_run_status: None,
            last_run_result: None,
        }
    }
}

impl ScheduleRow {
    fn into_schedule(self) -> AppResult<Schedule> {
        Ok(Schedule {
            id: self
                .id
                .ok_or_else(|| AppError::Store("schedule row without id".into()))?,
            user_identity: self.user_identity,
            environment_id: self.environment_id,
            org_url: self.org_url,
            enabled: self.enabled,
            day_of_week: self.day_of_week,
            time_utc: self.time_utc,
            timezone: self.timezone,
            client_id: self.client_id,
            client_secret_ref: SecretRef::new(self.client_secret_ref),
            tenant_id: self.tenant_id,
            last_run_at: self.last_run_at,
            last_run_status: self.last_run_status.as_deref().and_then(RunStatus::from_str),
            last_run_result: self.last_run_result,
        })
    }
}

#[derive(Debug, Serialize)]
struct RunPatch<'a> {
    last_run_at: DateTime<Utc>,
    last_run_status: &'a str,
    last_run_result: &'a str,
}

/// Row shape of `usage_logs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UsageRow {
    timestamp: DateTime<Utc>,
    user_identity: String,
    org_url: String,
    success_count: usize,
    fail_count: usize,
    #[serde(default)]
    app_names: Vec<String>,
    #[serde(default)]
    trigger: Option<String>,
}

impl From<&UsageRecord> for UsageRow {
    fn from(r: &UsageRecord) -> Self {
        Self {
            timestamp: r.timestamp,
            user_identity: r.user_identity.clone(),
            org_url: r.org_url.clone(),
            success_count: r.success_count,
            fail_count: r.fail_count,
            app_names: r.app_names.clone(),
            trigger: Some(r.trigger.as_str().to_string()),
        }
    }
}

impl From<UsageRow> for UsageRecord {
    fn from(r: UsageRow) -> Self {
        Self {
            timestamp: r.timestamp,
            user_identity: r.user_identity,
            org_url: r.org_url,
            success_count: r.success_count,
            fail_count: r.fail_count,
            app_names: r.app_names,
            trigger: r.trigger.as_deref().map(UsageTrigger::from_str).unwrap_or_default(),
        }
    }
}

/// PostgREST-style resource collections (`{base}/usage_logs`, `{base}/update_schedules`).
pub struct RestStore {
    http: reqwest::Client,
    base: String,
    api_key: Option<String>,
}

impl RestStore {
    pub fn new(http: reqwest::Client, base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            base: base.into(),
            api_key,
        }
    }

    fn table_url(&self, table: &str) -> AppResult<Url> {
        Ok(Url::parse(&format!("{}/{}", self.base.trim_end_matches('/'), table))?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> AppResult<reqwest::Response> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Store(format!(
                "{} failed with HTTP {}: {}",
                what,
                status.as_u16(),
                truncate_body(&body, 200)
            )));
        }
        Ok(response)
    }

    async fn fetch_schedules(&self, filters: &[(&str, String)], what: &str) -> AppResult<Vec<Schedule>> {
        let mut url = self.table_url(SCHEDULE_TABLE)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("select", "*");
            for (column, filter) in filters {
                query.append_pair(column, filter);
            }
        }
        let response = self.send(self.http.get(url), what).await?;
        let rows: Vec<ScheduleRow> = response.json().await?;
        rows.into_iter().map(ScheduleRow::into_schedule).collect()
    }
}

#[async_trait]
impl UsageStore for RestStore {
    async fn append_usage(&self, record: &UsageRecord) -> AppResult<()> {
        let url = self.table_url(USAGE_TABLE)?;
        let row = UsageRow::from(record);
        self.send(
            self.http.post(url).header("Prefer", "return=minimal").json(&row),
            "append usage",
        )
        .await?;
        Ok(())
    }

    async fn list_usage(&self, limit: usize) -> AppResult<Vec<UsageRecord>> {
        let mut url = self.table_url(USAGE_TABLE)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("order", "timestamp.desc")
            .append_pair("limit", &limit.to_string());
        let response = self.send(self.http.get(url), "list usage").await?;
        let rows: Vec<UsageRow> = response.json().await?;
        Ok(rows.into_iter().map(UsageRecord::from).collect())
    }
}

#[async_trait]
impl ScheduleStore for RestStore {
    async fn due_schedules(&self, day_of_week: u8, time_utc: &str) -> AppResult<Vec<Schedule>> {
        self.fetch_schedules(
            &[
                ("enabled", "eq.true".to_string()),
                ("day_of_week", format!("eq.{}", day_of_week)),
                ("time_utc", format!("eq.{}", time_utc)),
            ],
            "list due schedules",
        )
        .await
    }

    async fn record_run(&self, schedule_id: i64, run: &RunRecord) -> AppResult<()> {
        let mut url = self.table_url(SCHEDULE_TABLE)?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{}", schedule_id));
        let patch = RunPatch {
            last_run_at: run.last_run_at,
            last_run_status: run.last_run_status.as_str(),
            last_run_result: &run.last_run_result,
        };
        self.send(self.http.patch(url).json(&patch), "record schedule run").await?;
        Ok(())
    }

    async fn upsert_schedule(&self, draft: &ScheduleDraft) -> AppResult<Schedule> {
        let mut url = self.table_url(SCHEDULE_TABLE)?;
        url.query_pairs_mut()
            .append_pair("on_conflict", "user_identity,environment_id");
        let row = ScheduleRow::from(draft);
        let response = self
            .send(
                self.http
                    .post(url)
                    .header("Prefer", "resolution=merge-duplicates,return=representation")
                    .json(&[row]),
                "upsert schedule",
            )
            .await?;
        let rows: Vec<ScheduleRow> = response.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::Store("upsert returned no rows".into()))?
            .into_schedule()
    }

    async fn schedule_for(&self, user_identity: &str, environment_id: &str) -> AppResult<Option<Schedule>> {
        let rows = self
            .fetch_schedules(
                &[
                    ("user_identity", format!("eq.{}", user_identity)),
                    ("environment_id", format!("eq.{}", environment_id)),
                ],
                "load schedule",
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn disable_schedule(&self, schedule_id: i64) -> AppResult<()> {
        let mut url = self.table_url(SCHEDULE_TABLE)?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{}", schedule_id));
        self.send(
            self.http.patch(url).json(&serde_json::json!({ "enabled": false })),
            "disable schedule",
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, Method::PATCH, Method::POST, MockServer};
    use serde_json::json;

    fn schedule_json(id: i64) -> serde_json::Value {
        json!({
            "id": id,
            "user_identity": "admin@contoso.com",
            "environment_id": "env-1",
            "org_url": "https://contoso.crm.dynamics.com",
            "enabled": true,
            "day_of_week": 3,
            "time_utc": "14:00",
            "timezone": "UTC",
            "client_id": "client",
            "client_secret_ref": "env:SECRET",
            "tenant_id": "tenant",
            "last_run_at": null,
            "last_run_status": "partial",
            "last_run_result": null
        })
    }

    #[tokio::test]
    async fn lists_due_schedules_with_filters() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/rest/v1/update_schedules")
                    .query_param("enabled", "eq.true")
                    .query_param("day_of_week", "eq.3")
                    .query_param("time_utc", "eq.14:00")
                    .header("apikey", "key");
                then.status(200).json_body(json!([schedule_json(7)]));
            })
            .await;

        let store = RestStore::new(reqwest::Client::new(), server.url("/rest/v1"), Some("key".into()));
        let due = store.due_schedules(3, "14:00").await.unwrap();
        mock.assert_async().await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, 7);
        assert_eq!(due[0].last_run_status, Some(RunStatus::Partial));
        assert_eq!(due[0].client_secret_ref.as_str(), "env:SECRET");
    }

    #[tokio::test]
    async fn patches_only_run_fields() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(PATCH)
                    .path("/rest/v1/update_schedules")
                    .query_param("id", "eq.7")
                    .body_contains("\"last_run_status\":\"failed\"");
                then.status(204);
            })
            .await;

        let store = RestStore::new(reqwest::Client::new(), server.url("/rest/v1"), None);
        store
            .record_run(
                7,
                &RunRecord {
                    last_run_at: Utc::now(),
                    last_run_status: RunStatus::Failed,
                    last_run_result: "token denied".into(),
                },
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn store_errors_carry_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/rest/v1/usage_logs");
                then.status(401).body("{\"message\":\"JWT expired\"}");
            })
            .await;

        let store = RestStore::new(reqwest::Client::new(), server.url("/rest/v1"), None);
        let err = store
            .append_usage(&UsageRecord {
                timestamp: Utc::now(),
                user_identity: "u".into(),
                org_url: "o".into(),
                success_count: 1,
                fail_count: 0,
                app_names: vec!["A".into()],
                trigger: UsageTrigger::Interactive,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Store(ref m) if m.contains("401")));
    }
}
