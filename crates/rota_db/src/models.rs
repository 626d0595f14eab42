use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The protocol an upstream proxy speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

/// The operational status of an upstream proxy.
///
/// `active` proxies are selectable; `unhealthy` proxies are excluded from
/// selection and are the only ones the prober probes; `disabled` proxies are
/// excluded from selection and probing alike, and are exempt from the
/// address+protocol uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    Active,
    Unhealthy,
    Disabled,
}

/// An upstream proxy row, as persisted in `proxies`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Proxy {
    pub id: i32,
    pub address: String,
    pub protocol: ProxyProtocol,
    pub username: Option<String>,
    pub password: Option<String>,
    pub status: ProxyStatus,

    pub requests: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    /// Rolling average response time in milliseconds. Approximate,
    /// display-only — never consulted by any selector.
    pub avg_response_time_ms: i32,

    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,

    pub auto_delete_after_failed_seconds: Option<i64>,
    pub invalid_since: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proxy {
    pub fn is_active(&self) -> bool {
        matches!(self.status, ProxyStatus::Active)
    }
}

/// Fields accepted when registering a new upstream proxy.
#[derive(Debug, Clone, Deserialize)]
pub struct NewProxy {
    pub address: String,
    pub protocol: ProxyProtocol,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auto_delete_after_failed_seconds: Option<i64>,
}

/// Fields accepted when updating an existing upstream proxy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyUpdate {
    pub address: Option<String>,
    pub protocol: Option<ProxyProtocol>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub status: Option<ProxyStatus>,
}

/// A single append-only request record, as persisted in `proxy_requests`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RequestRecord {
    pub id: i64,
    pub proxy_id: Option<i32>,
    pub method: String,
    pub target_host: String,
    pub status_code: Option<i32>,
    pub success: bool,
    pub duration_ms: i32,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Fields accepted when appending a new request record.
#[derive(Debug, Clone)]
pub struct NewRequestRecord {
    pub proxy_id: Option<i32>,
    pub method: String,
    pub target_host: String,
    pub status_code: Option<i32>,
    pub success: bool,
    pub duration_ms: i32,
    pub error: Option<String>,
}

/// Aggregate counters backing `/api/v1/dashboard/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_proxies: i64,
    pub active_proxies: i64,
    pub unhealthy_proxies: i64,
    pub requests_last_minute: i64,
    pub requests_last_hour: i64,
    pub success_rate_last_hour: f64,
}
