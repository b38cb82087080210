use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Startup tier of a service. Tiers start in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Database,
    Auth,
    Api,
    Mock,
    App,
}

impl ServiceType {
    pub const STARTUP_ORDER: [ServiceType; 5] = [
        ServiceType::Database,
        ServiceType::Auth,
        ServiceType::Api,
        ServiceType::Mock,
        ServiceType::App,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    pub health: String,
    pub primary: String,
}

/// Static descriptor of a monitored service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub id: String,
    pub service_type: ServiceType,
    pub endpoints: ServiceEndpoints,
    #[serde(default = "default_expected_response_ms")]
    pub expected_response_time_ms: u64,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Command that launches the service; `None` means it is managed elsewhere.
    #[serde(default)]
    pub start_command: Option<Vec<String>>,
}

fn default_expected_response_ms() -> u64 {
    500
}
fn default_check_interval_ms() -> u64 {
    30_000
}
fn default_timeout_ms() -> u64 {
    5_000
}
fn default_retry_count() -> u32 {
    2
}

impl ServiceDefinition {
    pub fn new(
        id: impl Into<String>,
        service_type: ServiceType,
        health_url: impl Into<String>,
    ) -> Self {
        let health = health_url.into();
        Self {
            id: id.into(),
            service_type,
            endpoints: ServiceEndpoints {
                primary: health.clone(),
                health,
            },
            expected_response_time_ms: default_expected_response_ms(),
            check_interval_ms: default_check_interval_ms(),
            timeout_ms: default_timeout_ms(),
            retry_count: default_retry_count(),
            dependencies: Vec::new(),
            start_command: None,
        }
    }

    pub fn with_primary(mut self, url: impl Into<String>) -> Self {
        self.endpoints.primary = url.into();
        self
    }

    pub fn with_expected_response_time(mut self, ms: u64) -> Self {
        self.expected_response_time_ms = ms;
        self
    }

    pub fn with_check_interval(mut self, ms: u64) -> Self {
        self.check_interval_ms = ms;
        self
    }

    pub fn with_timeout(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_start_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start_command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(10))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl ServiceStatus {
    /// Reachable, possibly slow.
    pub fn is_up(self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Point-in-time observation of one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub service_id: String,
    pub status: ServiceStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub response_time_ms: Option<u64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl HealthStatus {
    pub fn unknown(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            status: ServiceStatus::Unknown,
            message: "Not checked yet".to_string(),
            timestamp: Utc::now(),
            response_time_ms: None,
            metadata: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimeStats {
    pub min_ms: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
    pub p95_ms: u64,
}

/// Running aggregate for one service; never reset while the process lives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetrics {
    /// Share of probes that found the service up, in percent
    pub uptime_percent: f64,
    pub response_time: ResponseTimeStats,
    pub error_rate: f64,
    pub request_count: u64,
    pub error_count: u64,
    pub last_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ResponseTime,
    ErrorRate,
    ServiceDown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAlert {
    pub id: String,
    pub service_id: String,
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

/// One status change, as yielded by the continuous monitoring stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthUpdate {
    pub service_id: String,
    pub previous: ServiceStatus,
    pub current: HealthStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub unknown: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub overall: ServiceStatus,
    pub services: Vec<HealthStatus>,
    pub metrics: HashMap<String, ServiceMetrics>,
    pub summary: HealthSummary,
    pub alerts: Vec<HealthAlert>,
    pub recommendations: Vec<String>,
}
