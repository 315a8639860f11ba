use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::api::common::utils::{timeout_query, QUERY_TIMEOUT};
use crate::InnerState;

const PING_TIMEOUT: Duration = Duration::from_secs(3);
const PROC_STATUS: &str = "/proc/self/status";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IndicatorStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IndicatorStatus {
    pub fn up() -> Self {
        Self {
            status: "up",
            message: None,
        }
    }

    pub fn down(message: impl Into<String>) -> Self {
        Self {
            status: "down",
            message: Some(message.into()),
        }
    }

    fn is_up(&self) -> bool {
        self.status == "up"
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub info: BTreeMap<String, IndicatorStatus>,
    pub error: BTreeMap<String, IndicatorStatus>,
    pub details: BTreeMap<String, IndicatorStatus>,
}

/// Splits indicator results into `info` (up) and `error` (down); the report
/// is `ok` only when nothing is down.
pub fn assemble_report(results: Vec<(String, IndicatorStatus)>) -> HealthReport {
    let mut info = BTreeMap::new();
    let mut error = BTreeMap::new();
    let mut details = BTreeMap::new();

    for (name, result) in results {
        if result.is_up() {
            info.insert(name.clone(), result.clone());
        } else {
            error.insert(name.clone(), result.clone());
        }
        details.insert(name, result);
    }

    HealthReport {
        status: if error.is_empty() { "ok" } else { "error" },
        info,
        error,
        details,
    }
}

#[tracing::instrument(name = "Health check", skip(inner))]
pub async fn health_check(State(inner): State<InnerState>) -> (StatusCode, Json<HealthReport>) {
    let mut results = vec![("database".to_string(), check_database(&inner).await)];

    let health = &inner.config.health;
    if let Some(url) = &health.ping_url {
        results.push(("http_ping".to_string(), check_ping(&inner.http_client, url).await));
    }
    if let Some(threshold_mb) = health.heap_threshold_mb {
        results.push((
            "memory_heap".to_string(),
            check_memory("VmData", threshold_mb).await,
        ));
    }
    if let Some(threshold_mb) = health.rss_threshold_mb {
        results.push((
            "memory_rss".to_string(),
            check_memory("VmRSS", threshold_mb).await,
        ));
    }

    let report = assemble_report(results);
    if report.error.is_empty() {
        tracing::debug!("All health indicators are up");
        (StatusCode::OK, Json(report))
    } else {
        tracing::warn!("Health check failed: {:?}", report.error.keys().collect::<Vec<_>>());
        (StatusCode::SERVICE_UNAVAILABLE, Json(report))
    }
}

async fn check_database(inner: &InnerState) -> IndicatorStatus {
    match timeout_query(QUERY_TIMEOUT, sqlx::query("SELECT 1").execute(&inner.db)).await {
        Ok(_) => IndicatorStatus::up(),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            IndicatorStatus::down("Database is not reachable")
        }
    }
}

async fn check_ping(client: &reqwest::Client, url: &url::Url) -> IndicatorStatus {
    match client
        .get(url.clone())
        .timeout(PING_TIMEOUT)
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => IndicatorStatus::up(),
        Ok(resp) => IndicatorStatus::down(format!("{} responded with {}", url, resp.status())),
        Err(e) => {
            tracing::warn!("Ping to {} failed: {}", url, e);
            IndicatorStatus::down(format!("{} is not reachable", url))
        }
    }
}

async fn check_memory(field: &str, threshold_mb: u64) -> IndicatorStatus {
    let status = match tokio::fs::read_to_string(PROC_STATUS).await {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!("Could not read {}: {}", PROC_STATUS, e);
            return IndicatorStatus::down(format!("{} is unavailable", PROC_STATUS));
        }
    };

    match parse_proc_status(&status, field) {
        Some(bytes) => memory_status(field, bytes, threshold_mb),
        None => IndicatorStatus::down(format!("{} not reported", field)),
    }
}

fn memory_status(field: &str, used_bytes: u64, threshold_mb: u64) -> IndicatorStatus {
    let threshold_bytes = threshold_mb.saturating_mul(1024 * 1024);
    if used_bytes <= threshold_bytes {
        IndicatorStatus::up()
    } else {
        IndicatorStatus::down(format!(
            "{} of {} MB exceeds the {} MB threshold",
            field,
            used_bytes / (1024 * 1024),
            threshold_mb
        ))
    }
}

/// Reads a `kB` line such as `VmRSS:   10240 kB` and returns it in bytes.
pub fn parse_proc_status(status: &str, field: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix(field)?.strip_prefix(':'))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb.saturating_mul(1024))
}
