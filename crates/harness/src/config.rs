//! Harness configuration.
//!
//! Everything has a usable default so tests can start from
//! `HarnessConfig::default()` and override the few fields they care about.
//! Files are YAML; durations are plain millisecond integers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::auth::{Role, UserSpec};
use crate::error::HarnessResult;
use crate::health::{ServiceDefinition, ServiceType};

pub const DEFAULT_MOCK_SERVER_URL: &str = "http://localhost:1080";
pub const DEFAULT_APP_URL: &str = "http://localhost:3000";
pub const DEFAULT_SUPABASE_URL: &str = "http://localhost:54321";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub response_time_warning_ms: u64,
    pub response_time_critical_ms: u64,
    pub error_rate_warning: f64,
    pub error_rate_critical: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            response_time_warning_ms: 1_000,
            response_time_critical_ms: 5_000,
            error_rate_warning: 0.05,
            error_rate_critical: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Base of the `base * 2^attempt` probe backoff
    pub retry_base_delay_ms: u64,
    pub thresholds: AlertThresholds,
    pub alert_webhook_url: Option<String>,
    /// Capacity of the continuous-update channel
    pub update_buffer: usize,
    /// Alerts kept in memory; oldest are dropped first
    pub max_alerts: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            retry_base_delay_ms: 1_000,
            thresholds: AlertThresholds::default(),
            alert_webhook_url: None,
            update_buffer: 256,
            max_alerts: 100,
        }
    }
}

impl MonitorConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub auth_dir: PathBuf,
    pub session_ttl_ms: u64,
    pub persist_sessions: bool,
    pub users: BTreeMap<Role, UserSpec>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        let users = [
            UserSpec::new(Role::Admin, "admin@test.local"),
            UserSpec::new(Role::OrgAdmin, "org-admin@test.local").with_organization("test-org"),
            UserSpec::new(Role::User, "user@test.local").with_organization("test-org"),
        ]
        .into_iter()
        .map(|u| (u.role, u))
        .collect();

        Self {
            auth_dir: PathBuf::from("./playwright/.auth"),
            session_ttl_ms: 60 * 60 * 1000,
            persist_sessions: true,
            users,
        }
    }
}

impl AuthConfig {
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.session_ttl_ms as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    pub server_url: String,
    pub request_timeout_ms: u64,
    /// Observed latency above which a mock is reported as slow
    pub slow_threshold_ms: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_MOCK_SERVER_URL.to_string(),
            request_timeout_ms: 10_000,
            slow_threshold_ms: 1_000,
        }
    }
}

impl MockConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub services: Vec<ServiceDefinition>,
    pub monitor: MonitorConfig,
    pub auth: AuthConfig,
    pub mocks: MockConfig,
    /// How long a started service may take to report healthy
    pub startup_timeout_ms: u64,
    pub startup_poll_interval_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            services: default_services(),
            monitor: MonitorConfig::default(),
            auth: AuthConfig::default(),
            mocks: MockConfig::default(),
            startup_timeout_ms: 60_000,
            startup_poll_interval_ms: 1_000,
        }
    }
}

impl HarnessConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        info!(path = %path.display(), services = config.services.len(), "Loaded harness config");
        Ok(config)
    }

    /// Applies `HARNESS_MOCK_SERVER_URL`, `HARNESS_AUTH_DIR` and
    /// `HARNESS_APP_URL` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("HARNESS_MOCK_SERVER_URL") {
            rebase_services(&mut self.services, &self.mocks.server_url, &url, ServiceType::Mock);
            self.mocks.server_url = url;
        }
        if let Ok(dir) = std::env::var("HARNESS_AUTH_DIR") {
            self.auth.auth_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("HARNESS_APP_URL") {
            rebase_services(&mut self.services, DEFAULT_APP_URL, &url, ServiceType::Api);
            rebase_services(&mut self.services, DEFAULT_APP_URL, &url, ServiceType::App);
        }
    }

    pub fn service(&self, id: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn startup_poll_interval(&self) -> Duration {
        Duration::from_millis(self.startup_poll_interval_ms.max(10))
    }
}

fn rebase_services(services: &mut [ServiceDefinition], from: &str, to: &str, kind: ServiceType) {
    let from = from.trim_end_matches('/');
    let to = to.trim_end_matches('/');
    for service in services.iter_mut().filter(|s| s.service_type == kind) {
        for url in [&mut service.endpoints.health, &mut service.endpoints.primary] {
            if let Some(rest) = url.strip_prefix(from) {
                *url = format!("{to}{rest}");
            }
        }
    }
}

/// The local stack the harness drives when no service list is configured.
pub fn default_services() -> Vec<ServiceDefinition> {
    vec![
        ServiceDefinition::new(
            "supabase",
            ServiceType::Database,
            format!("{DEFAULT_SUPABASE_URL}/rest/v1/"),
        )
        .with_primary(DEFAULT_SUPABASE_URL)
        .with_expected_response_time(200),
        ServiceDefinition::new(
            "supabase-auth",
            ServiceType::Auth,
            format!("{DEFAULT_SUPABASE_URL}/auth/v1/health"),
        )
        .with_primary(format!("{DEFAULT_SUPABASE_URL}/auth/v1/settings"))
        .with_expected_response_time(200)
        .with_dependencies(["supabase"]),
        ServiceDefinition::new("api", ServiceType::Api, format!("{DEFAULT_APP_URL}/api/health"))
            .with_primary(format!("{DEFAULT_APP_URL}/api"))
            .with_dependencies(["supabase", "supabase-auth"]),
        ServiceDefinition::new(
            "mockserver",
            ServiceType::Mock,
            format!("{DEFAULT_MOCK_SERVER_URL}/liveness/probe"),
        )
        .with_primary(DEFAULT_MOCK_SERVER_URL)
        .with_expected_response_time(100),
        ServiceDefinition::new("app", ServiceType::App, DEFAULT_APP_URL)
            .with_expected_response_time(1_000)
            .with_dependencies(["api", "mockserver"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_covers_every_tier() {
        let services = default_services();
        for tier in ServiceType::STARTUP_ORDER {
            assert!(
                services.iter().any(|s| s.service_type == tier),
                "missing tier {tier:?}"
            );
        }
    }

    #[test]
    fn yaml_overrides_merge_with_defaults() {
        let yaml = r#"
services:
  - id: api
    service_type: api
    endpoints:
      health: http://127.0.0.1:9000/health
      primary: http://127.0.0.1:9000/
    expected_response_time_ms: 100
monitor:
  retry_base_delay_ms: 10
auth:
  auth_dir: /tmp/sessions
"#;
        let config: HarnessConfig = serde_yaml::from_str(yaml).expect("valid config");
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].timeout_ms, 5_000);
        assert_eq!(config.monitor.retry_base_delay_ms, 10);
        assert_eq!(config.monitor.thresholds.response_time_warning_ms, 1_000);
        assert_eq!(config.auth.auth_dir, PathBuf::from("/tmp/sessions"));
        assert!(config.auth.users.contains_key(&Role::Admin));
    }

    #[test]
    fn rebase_rewrites_matching_prefix_only() {
        let mut services = default_services();
        rebase_services(
            &mut services,
            DEFAULT_APP_URL,
            "http://app.test:8080/",
            ServiceType::App,
        );
        let app = services.iter().find(|s| s.id == "app").expect("app");
        assert_eq!(app.endpoints.health, "http://app.test:8080");
        let api = services.iter().find(|s| s.id == "api").expect("api");
        assert!(api.endpoints.health.starts_with(DEFAULT_APP_URL));
    }

    #[test]
    #[serial_test::serial]
    fn env_overrides_point_at_other_hosts() {
        std::env::set_var("HARNESS_MOCK_SERVER_URL", "http://mocks.test:1090");
        std::env::set_var("HARNESS_AUTH_DIR", "/tmp/harness-auth");
        let mut config = HarnessConfig::default();

        config.apply_env_overrides();
        std::env::remove_var("HARNESS_MOCK_SERVER_URL");
        std::env::remove_var("HARNESS_AUTH_DIR");

        assert_eq!(config.mocks.server_url, "http://mocks.test:1090");
        assert_eq!(config.auth.auth_dir, PathBuf::from("/tmp/harness-auth"));
        let mock = config.service("mockserver").expect("mockserver");
        assert_eq!(mock.endpoints.health, "http://mocks.test:1090/liveness/probe");
        assert_eq!(mock.endpoints.primary, "http://mocks.test:1090");
    }
}
