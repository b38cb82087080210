//! Mock server integration.
//!
//! Mirrors declarative [`MockBehavior`]s into a MockServer-compatible admin
//! API, validates them against API contracts, and tracks how configured
//! mocks are used.

mod expectation;
mod types;

pub use types::{
    behavior_key, ActivationCondition, ApiContract, EndpointCheck, EndpointUsage,
    IntegrationReport, MatchConditions, MockBehavior, MockReport, MockResponse, MockScenario,
    ResponseSchema,
};

use chrono::Utc;
use common::EventBus;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::MockConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::events::MockEvent;
use crate::validation::ValidationResult;
use expectation::{Expectation, CLEAR_PATH, EXPECTATION_PATH};

#[derive(Debug, Clone, Default)]
struct UsageStats {
    /// Requests made by the application under test
    app_requests: u64,
    /// Requests made by integration validation
    probe_requests: u64,
    errors: u64,
    total_response_ms: u64,
}

impl UsageStats {
    fn requests(&self) -> u64 {
        self.app_requests + self.probe_requests
    }
}

pub struct MockIntegrationManager {
    config: MockConfig,
    client: reqwest::Client,
    behaviors: RwLock<BTreeMap<String, MockBehavior>>,
    scenarios: RwLock<HashMap<String, MockScenario>>,
    active_scenario: RwLock<Option<String>>,
    usage: RwLock<HashMap<String, UsageStats>>,
    events: EventBus<MockEvent>,
}

impl MockIntegrationManager {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            behaviors: RwLock::new(BTreeMap::new()),
            scenarios: RwLock::new(HashMap::new()),
            active_scenario: RwLock::new(None),
            usage: RwLock::new(HashMap::new()),
            events: EventBus::default(),
        }
    }

    pub fn events(&self) -> &EventBus<MockEvent> {
        &self.events
    }

    pub fn server_url(&self) -> &str {
        self.config.server_url.trim_end_matches('/')
    }

    pub async fn configured_behaviors(&self) -> Vec<MockBehavior> {
        self.behaviors.read().await.values().cloned().collect()
    }

    pub async fn behavior(&self, method: &str, endpoint: &str) -> Option<MockBehavior> {
        self.behaviors
            .read()
            .await
            .get(&behavior_key(method, endpoint))
            .cloned()
    }

    async fn admin_put(&self, operation: &str, path: &str, body: Option<&serde_json::Value>) -> HarnessResult<()> {
        let url = format!("{}{}", self.server_url(), path);
        let mut request = self
            .client
            .put(&url)
            .timeout(self.config.request_timeout());
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HarnessError::MockServer {
                operation: operation.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    /// Replaces every server expectation with `behaviors`. Later behaviors
    /// with the same `METHOD:endpoint` key win.
    pub async fn configure_mock_behaviors(&self, behaviors: Vec<MockBehavior>) -> HarnessResult<()> {
        match self.push_behaviors(behaviors).await {
            Ok((count, services)) => {
                info!(mocks = count, services = services.len(), "🎭 Mock behaviors configured");
                self.events
                    .emit(MockEvent::Configured { count, services })
                    .await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "❌ Mock configuration failed");
                self.events
                    .emit(MockEvent::ConfigureFailed {
                        error: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn push_behaviors(&self, behaviors: Vec<MockBehavior>) -> HarnessResult<(usize, Vec<String>)> {
        let by_key: BTreeMap<String, MockBehavior> =
            behaviors.into_iter().map(|b| (b.key(), b)).collect();

        let mut by_service: BTreeMap<&str, Vec<Expectation>> = BTreeMap::new();
        for behavior in by_key.values() {
            by_service
                .entry(behavior.service_id.as_str())
                .or_default()
                .push(Expectation::from(behavior));
        }

        self.admin_put("clear", CLEAR_PATH, None).await?;
        for (service, expectations) in &by_service {
            debug!(service_id = %service, count = expectations.len(), "pushing expectations");
            let body = serde_json::to_value(expectations)?;
            self.admin_put("expectation", EXPECTATION_PATH, Some(&body))
                .await?;
        }

        let services = by_service.keys().map(|s| s.to_string()).collect();
        let count = by_key.len();
        self.usage
            .write()
            .await
            .retain(|key, _| by_key.contains_key(key));
        *self.behaviors.write().await = by_key;
        Ok((count, services))
    }

    /// Checks configured mocks against contracts. Never fails; problems are
    /// reported in the result.
    pub async fn validate_mock_responses(&self, contracts: &[ApiContract]) -> ValidationResult {
        let behaviors = self.behaviors.read().await;
        let mut result = ValidationResult::ok();

        for contract in contracts {
            let key = contract.key();
            let Some(behavior) = behaviors.get(&key) else {
                result.warning(format!("No mock configured for {key}"));
                continue;
            };

            let status = behavior.response.status;
            if !contract.status_codes.is_empty() && !contract.status_codes.contains(&status) {
                result.error(format!(
                    "{key}: status {status} not in allowed {:?}",
                    contract.status_codes
                ));
            }

            for field in &contract.response_schema.required {
                let present = behavior
                    .response
                    .body
                    .as_object()
                    .is_some_and(|body| body.contains_key(field));
                if !present {
                    result.error(format!("{key}: response body is missing required field '{field}'"));
                }
            }
        }
        drop(behaviors);

        self.events
            .emit(MockEvent::ContractsValidated(result.clone()))
            .await;
        result
    }

    /// Requests every configured mock from the server and compares the
    /// observed status with the configured one.
    pub async fn validate_mock_to_app_integration(&self) -> IntegrationReport {
        let behaviors = self.configured_behaviors().await;
        let checks = join_all(behaviors.iter().map(|b| self.probe_behavior(b))).await;

        let mut report = IntegrationReport {
            tested_endpoints: checks.len(),
            ..IntegrationReport::default()
        };

        {
            let mut usage = self.usage.write().await;
            for check in &checks {
                let stats = usage.entry(check.key.clone()).or_default();
                stats.probe_requests += 1;
                stats.total_response_ms += check.response_time_ms;
                if !check.success {
                    stats.errors += 1;
                }
            }

            for behavior in &behaviors {
                let key = behavior.key();
                let used = usage.get(&key).is_some_and(|s| s.app_requests > 0);
                if !used {
                    report
                        .validation
                        .warning(format!("Mock {key} was configured but never used"));
                    report.unused_mocks.push(key);
                }
            }
        }

        for check in checks {
            if check.response_time_ms > self.config.slow_threshold_ms {
                report.validation.warning(format!(
                    "Mock {} is slow ({}ms > {}ms)",
                    check.key, check.response_time_ms, self.config.slow_threshold_ms
                ));
                report.slow_endpoints.push(check.key.clone());
            }
            if check.success {
                report.successful_endpoints.push(check);
            } else {
                report.validation.error(format!(
                    "Mock {} failed: {}",
                    check.key,
                    check.error.as_deref().unwrap_or("unexpected status")
                ));
                report.failed_endpoints.push(check);
            }
        }

        info!(
            tested = report.tested_endpoints,
            failed = report.failed_endpoints.len(),
            unused = report.unused_mocks.len(),
            "🔗 Mock integration validated"
        );
        self.events
            .emit(MockEvent::IntegrationValidated {
                tested: report.tested_endpoints,
                failed: report.failed_endpoints.len(),
            })
            .await;
        report
    }

    async fn probe_behavior(&self, behavior: &MockBehavior) -> EndpointCheck {
        let url = format!("{}{}", self.server_url(), behavior.endpoint);
        let expected = behavior.response.status;
        let method = match reqwest::Method::from_bytes(behavior.method.to_uppercase().as_bytes()) {
            Ok(m) => m,
            Err(e) => {
                return EndpointCheck {
                    key: behavior.key(),
                    url,
                    expected_status: expected,
                    actual_status: None,
                    response_time_ms: 0,
                    success: false,
                    error: Some(e.to_string()),
                };
            }
        };

        let mut request = self
            .client
            .request(method, &url)
            .timeout(self.config.request_timeout());
        if let Some(conditions) = &behavior.conditions {
            for (name, value) in &conditions.headers {
                request = request.header(name.as_str(), value.as_str());
            }
            if !conditions.query.is_empty() {
                request = request.query(&conditions.query);
            }
            if let Some(body) = &conditions.body {
                request = request.json(body);
            }
        }

        let started = Instant::now();
        let outcome = request.send().await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        let (actual_status, error) = match outcome {
            Ok(resp) => {
                let actual = resp.status().as_u16();
                let error = (actual != expected)
                    .then(|| format!("expected status {expected}, got {actual}"));
                (Some(actual), error)
            }
            Err(e) => (None, Some(e.to_string())),
        };

        EndpointCheck {
            key: behavior.key(),
            url,
            expected_status: expected,
            actual_status,
            response_time_ms,
            success: error.is_none(),
            error,
        }
    }

    /// Records one request the application made against a mock.
    pub async fn record_usage(&self, method: &str, endpoint: &str, response_time_ms: u64, success: bool) {
        let key = behavior_key(method, endpoint);
        let mut usage = self.usage.write().await;
        let stats = usage.entry(key).or_default();
        stats.app_requests += 1;
        stats.total_response_ms += response_time_ms;
        if !success {
            stats.errors += 1;
        }
    }

    pub async fn create_mock_scenario(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        behaviors: Vec<MockBehavior>,
        activation: ActivationCondition,
    ) -> HarnessResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            let error = HarnessError::Configuration("mock scenario name is empty".to_string());
            self.events
                .emit(MockEvent::ScenarioFailed {
                    name,
                    error: error.to_string(),
                })
                .await;
            return Err(error);
        }

        if activation != ActivationCondition::Manual {
            debug!(scenario = %name, ?activation, "activation condition recorded; activate explicitly");
        }

        let scenario = MockScenario {
            name: name.clone(),
            description: description.into(),
            behaviors,
            activation,
            created_at: Utc::now(),
        };
        self.scenarios.write().await.insert(name.clone(), scenario);
        self.events.emit(MockEvent::ScenarioCreated { name }).await;
        Ok(())
    }

    pub async fn scenarios(&self) -> Vec<MockScenario> {
        let mut scenarios: Vec<_> = self.scenarios.read().await.values().cloned().collect();
        scenarios.sort_by(|a, b| a.name.cmp(&b.name));
        scenarios
    }

    /// Swaps the scenario's behaviors in, replacing whatever was configured.
    pub async fn activate_scenario(&self, name: &str) -> HarnessResult<()> {
        let behaviors = self
            .scenarios
            .read()
            .await
            .get(name)
            .map(|s| s.behaviors.clone());

        let result = match behaviors {
            Some(behaviors) => self.configure_mock_behaviors(behaviors).await,
            None => Err(HarnessError::UnknownScenario(name.to_string())),
        };

        match result {
            Ok(()) => {
                *self.active_scenario.write().await = Some(name.to_string());
                info!(scenario = %name, "🎬 Mock scenario activated");
                self.events
                    .emit(MockEvent::ScenarioActivated {
                        name: name.to_string(),
                    })
                    .await;
                Ok(())
            }
            Err(e) => {
                self.events
                    .emit(MockEvent::ScenarioFailed {
                        name: name.to_string(),
                        error: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    pub async fn active_scenario(&self) -> Option<String> {
        self.active_scenario.read().await.clone()
    }

    pub async fn generate_mock_report(&self) -> MockReport {
        let behaviors = self.behaviors.read().await;
        let usage = self.usage.read().await;

        let total_requests: u64 = usage.values().map(UsageStats::requests).sum();
        let total_errors: u64 = usage.values().map(|s| s.errors).sum();
        let total_ms: u64 = usage.values().map(|s| s.total_response_ms).sum();

        let mut top_endpoints: Vec<EndpointUsage> = usage
            .iter()
            .filter(|(_, s)| s.requests() > 0)
            .map(|(key, s)| EndpointUsage {
                key: key.clone(),
                requests: s.requests(),
                errors: s.errors,
                average_response_time_ms: s.total_response_ms as f64 / s.requests() as f64,
            })
            .collect();
        top_endpoints.sort_by(|a, b| b.requests.cmp(&a.requests).then_with(|| a.key.cmp(&b.key)));
        top_endpoints.truncate(10);

        let active_mocks = behaviors
            .keys()
            .filter(|key| usage.get(*key).is_some_and(|s| s.requests() > 0))
            .count();

        let ratio = |num: u64| {
            if total_requests == 0 {
                0.0
            } else {
                num as f64 / total_requests as f64
            }
        };

        MockReport {
            generated_at: Utc::now(),
            total_mocks: behaviors.len(),
            active_mocks,
            average_response_time_ms: ratio(total_ms),
            error_rate: ratio(total_errors),
            top_endpoints,
            active_scenario: self.active_scenario.read().await.clone(),
            scenarios: {
                let mut names: Vec<_> = self.scenarios.read().await.keys().cloned().collect();
                names.sort();
                names
            },
        }
    }

    /// Clears the server and all in-memory state. Local state is cleared
    /// even when the server call fails.
    pub async fn reset(&self) -> HarnessResult<()> {
        let cleared = self.admin_put("clear", CLEAR_PATH, None).await;
        self.behaviors.write().await.clear();
        self.usage.write().await.clear();
        *self.active_scenario.write().await = None;
        debug!("🧹 mock state reset");
        self.events.emit(MockEvent::Reset).await;
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded(behaviors: Vec<MockBehavior>) -> MockIntegrationManager {
        let manager = MockIntegrationManager::new(MockConfig::default());
        *manager.behaviors.write().await = behaviors.into_iter().map(|b| (b.key(), b)).collect();
        manager
    }

    fn contract(method: &str, endpoint: &str, required: &[&str], codes: &[u16]) -> ApiContract {
        ApiContract {
            endpoint: endpoint.into(),
            method: method.into(),
            request_schema: None,
            response_schema: ResponseSchema {
                required: required.iter().map(|s| s.to_string()).collect(),
                properties: serde_json::Value::Null,
            },
            status_codes: codes.to_vec(),
        }
    }

    #[tokio::test]
    async fn contract_validation_reports_problems() {
        let manager = seeded(vec![
            MockBehavior::new("api", "GET", "/users", 200).with_body(json!({"users": []})),
            MockBehavior::new("api", "POST", "/users", 500).with_body(json!({"error": "x"})),
        ])
        .await;

        let result = manager
            .validate_mock_responses(&[
                contract("get", "/users", &["users"], &[200]),
                contract("POST", "/users", &["id"], &[201, 400]),
                contract("DELETE", "/users", &[], &[]),
            ])
            .await;

        assert!(!result.valid);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.warnings, vec!["No mock configured for DELETE:/users".to_string()]);
    }

    #[tokio::test]
    async fn report_ranks_endpoints_and_counts_errors() {
        let manager = seeded(vec![
            MockBehavior::new("api", "GET", "/a", 200),
            MockBehavior::new("api", "GET", "/b", 200),
            MockBehavior::new("api", "GET", "/c", 200),
        ])
        .await;

        for _ in 0..3 {
            manager.record_usage("GET", "/b", 10, true).await;
        }
        manager.record_usage("GET", "/a", 30, false).await;

        let report = manager.generate_mock_report().await;
        assert_eq!(report.total_mocks, 3);
        assert_eq!(report.active_mocks, 2);
        assert_eq!(report.top_endpoints[0].key, "GET:/b");
        assert!((report.error_rate - 0.25).abs() < f64::EPSILON);
        assert!((report.average_response_time_ms - 15.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn unknown_scenario_fails_and_emits() {
        let manager = MockIntegrationManager::new(MockConfig::default());
        let mut failures = manager
            .events()
            .subscribe(crate::events::Topics::MOCKS_SCENARIO_FAILED)
            .await;

        let err = manager
            .activate_scenario("missing")
            .await
            .expect_err("nothing registered");
        assert!(matches!(err, HarnessError::UnknownScenario(_)));
        let event = failures.recv().await.expect("event");
        assert!(matches!(event.payload, MockEvent::ScenarioFailed { .. }));
    }
}
