//! Scenario and step execution.

use chrono::Utc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::plan::{
    ScenarioResult, ScenarioStatus, StepAction, StepResult, StepStatus, TestScenario, TestStep,
};
use super::TestInfrastructureManager;
use crate::error::{HarnessError, HarnessResult, TestError};
use crate::health::ServiceStatus;

impl TestInfrastructureManager {
    /// Runs the steps in order under `timeout`. The first failing step fails
    /// the scenario and the rest are skipped.
    pub async fn run_scenario(&self, scenario: &TestScenario, timeout: Duration) -> ScenarioResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut steps: Vec<StepResult> = Vec::with_capacity(scenario.steps.len());
        let mut errors: Vec<TestError> = Vec::new();

        info!(scenario = %scenario.id, steps = scenario.steps.len(), "▶️ Running scenario");

        let run = async {
            for step in &scenario.steps {
                if !errors.is_empty() {
                    steps.push(StepResult::skipped(&step.name));
                    continue;
                }
                let result = self.run_step(scenario, step).await;
                if let Some(error) = &result.error {
                    errors.push(error.clone().with_context("step", step.name.clone()));
                }
                steps.push(result);
            }
        };
        let timed_out = tokio::time::timeout(timeout, run).await.is_err();

        if timed_out {
            warn!(scenario = %scenario.id, timeout_ms = timeout.as_millis() as u64, "⏱️ Scenario timed out");
            errors.push(
                TestError::from(HarnessError::Timeout(timeout))
                    .with_context("scenario_id", scenario.id.clone()),
            );
            for step in scenario.steps.iter().skip(steps.len()) {
                steps.push(StepResult::skipped(&step.name));
            }
        }

        let status = if errors.is_empty() {
            ScenarioStatus::Passed
        } else {
            ScenarioStatus::Failed
        };
        let marker = if status == ScenarioStatus::Passed { "✅" } else { "❌" };
        info!(scenario = %scenario.id, ?status, "{marker} Scenario finished");

        ScenarioResult {
            scenario_id: scenario.id.clone(),
            name: scenario.name.clone(),
            status,
            steps,
            errors,
            started_at,
            finished_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn run_step(&self, scenario: &TestScenario, step: &TestStep) -> StepResult {
        let start = Instant::now();
        let outcome = match step.timeout_ms {
            Some(ms) => {
                let limit = Duration::from_millis(ms);
                tokio::time::timeout(limit, self.execute_action(scenario, &step.action))
                    .await
                    .unwrap_or(Err(HarnessError::Timeout(limit)))
            }
            None => self.execute_action(scenario, &step.action).await,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                debug!(scenario = %scenario.id, step = %step.name, duration_ms, "step passed");
                StepResult {
                    name: step.name.clone(),
                    status: StepStatus::Passed,
                    duration_ms,
                    error: None,
                    output,
                }
            }
            Err(e) => {
                warn!(scenario = %scenario.id, step = %step.name, error = %e, "step failed");
                StepResult {
                    name: step.name.clone(),
                    status: StepStatus::Failed,
                    duration_ms,
                    error: Some(TestError::from(&e)),
                    output: serde_json::Value::Null,
                }
            }
        }
    }

    async fn execute_action(
        &self,
        scenario: &TestScenario,
        action: &StepAction,
    ) -> HarnessResult<serde_json::Value> {
        match action {
            StepAction::Http {
                method,
                url,
                headers,
                body,
                expect_status,
                role,
            } => {
                let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
                    .map_err(|e| HarnessError::Configuration(format!("invalid method {method}: {e}")))?;
                let mut request = self.http.request(method.clone(), url);
                for (name, value) in headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                if let Some(role) = role {
                    let session = self.auth.authenticate_as_role(*role, Some(&scenario.id)).await?;
                    if let Some(bearer) = session.bearer() {
                        request = request.header(reqwest::header::AUTHORIZATION, bearer);
                    }
                }
                if let Some(body) = body {
                    request = request.json(body);
                }

                let start = Instant::now();
                let sent = request.send().await;
                let elapsed = start.elapsed().as_millis() as u64;

                let response = match sent {
                    Ok(response) => response,
                    Err(e) => {
                        self.record_mock_usage(method.as_str(), url, elapsed, false).await;
                        return Err(e.into());
                    }
                };
                let status = response.status().as_u16();
                let ok = match expect_status {
                    Some(expected) => status == *expected,
                    None => response.status().is_success(),
                };
                self.record_mock_usage(method.as_str(), url, elapsed, ok).await;

                let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);
                if !ok {
                    return Err(HarnessError::Assertion(match expect_status {
                        Some(expected) => format!("{method} {url}: expected {expected}, got {status}"),
                        None => format!("{method} {url}: unexpected status {status}"),
                    }));
                }
                Ok(serde_json::json!({ "status": status, "elapsed_ms": elapsed, "body": body }))
            }
            StepAction::CheckHealth { service_id } => {
                let health = self.monitor.check_service_health(service_id).await?;
                if health.status == ServiceStatus::Unhealthy {
                    return Err(HarnessError::ServiceUnavailable {
                        service_id: service_id.clone(),
                        message: health.message,
                    });
                }
                Ok(serde_json::to_value(health)?)
            }
            StepAction::Authenticate { role, require } => {
                let session = self.auth.authenticate_as_role(*role, Some(&scenario.id)).await?;
                if let Some(missing) = require.iter().find(|p| !session.has_permission(p)) {
                    return Err(HarnessError::PermissionDenied {
                        role: *role,
                        permission: missing.clone(),
                    });
                }
                Ok(serde_json::json!({ "session_id": session.session_id, "role": session.role }))
            }
            StepAction::ActivateMocks { scenario: name } => {
                self.mocks.activate_scenario(name).await?;
                Ok(serde_json::json!({ "activated": name }))
            }
            StepAction::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(serde_json::Value::Null)
            }
        }
    }

    /// Counts requests that went to the mock server as application usage.
    async fn record_mock_usage(&self, method: &str, url: &str, elapsed_ms: u64, success: bool) {
        let Some(rest) = url.strip_prefix(self.mocks.server_url()) else {
            return;
        };
        let path = rest.split(['?', '#']).next().unwrap_or(rest);
        let path = if path.is_empty() { "/" } else { path };
        self.mocks.record_usage(method, path, elapsed_ms, success).await;
    }
}
