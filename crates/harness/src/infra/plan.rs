//! Test plans and their results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::metrics::TestMetrics;
use crate::auth::Role;
use crate::error::TestError;
use crate::mocks::MockBehavior;
use crate::reliability::RetryConfig;

fn default_plan_timeout_ms() -> u64 {
    300_000
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPlan {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub scenarios: Vec<TestScenario>,
    #[serde(default)]
    pub parallel: bool,
    /// Applied to every scenario
    #[serde(default = "default_plan_timeout_ms")]
    pub timeout_ms: u64,
    /// Used when recovery retries a timed-out scenario
    #[serde(default)]
    pub retry_policy: RetryConfig,
}

impl TestPlan {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn scenario(&self, id: &str) -> Option<&TestScenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    /// Every non-anonymous role some scenario needs, deduplicated.
    pub fn distinct_roles(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = self
            .scenarios
            .iter()
            .flat_map(|s| s.auth_requirements.iter().copied())
            .filter(|r| *r != Role::Anonymous)
            .collect();
        roles.sort();
        roles.dedup();
        roles
    }

    /// Union of all scenario mock behaviors; later scenarios override
    /// earlier ones on the same `METHOD:endpoint`.
    pub fn all_mock_behaviors(&self) -> Vec<MockBehavior> {
        let by_key: BTreeMap<String, MockBehavior> = self
            .scenarios
            .iter()
            .flat_map(|s| s.mock_behaviors.iter().cloned())
            .map(|b| (b.key(), b))
            .collect();
        by_key.into_values().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestScenario {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub required_services: Vec<String>,
    #[serde(default)]
    pub mock_behaviors: Vec<MockBehavior>,
    #[serde(default)]
    pub auth_requirements: Vec<Role>,
    pub steps: Vec<TestStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStep {
    pub name: String,
    pub action: StepAction,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Request against the app or a mock. Without `expect_status` any 2xx
    /// passes.
    Http {
        #[serde(default = "default_method")]
        method: String,
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default)]
        body: Option<serde_json::Value>,
        #[serde(default)]
        expect_status: Option<u16>,
        /// Sends the bearer token of this role's session
        #[serde(default)]
        role: Option<Role>,
    },
    CheckHealth {
        service_id: String,
    },
    /// Fails unless the session grants every permission in `require`
    Authenticate {
        role: Role,
        #[serde(default)]
        require: Vec<String>,
    },
    ActivateMocks {
        scenario: String,
    },
    Wait {
        ms: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub error: Option<TestError>,
    #[serde(default)]
    pub output: serde_json::Value,
}

impl StepResult {
    pub(crate) fn skipped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Skipped,
            duration_ms: 0,
            error: None,
            output: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub name: String,
    pub status: ScenarioStatus,
    pub steps: Vec<StepResult>,
    pub errors: Vec<TestError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Pending,
    Setup,
    Executing,
    Aggregating,
    Cleanup,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Partial,
    Failure,
}

impl ExecutionStatus {
    /// Success with no errors, Partial when some scenario passed.
    pub fn from_scenarios(scenarios: &[ScenarioResult]) -> Self {
        if scenarios.iter().all(|s| s.errors.is_empty()) {
            Self::Success
        } else if scenarios.iter().any(ScenarioResult::passed) {
            Self::Partial
        } else {
            Self::Failure
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResults {
    pub plan_id: String,
    pub status: ExecutionStatus,
    pub scenarios: Vec<ScenarioResult>,
    pub metrics: TestMetrics,
    pub errors: Vec<TestError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl TestResults {
    /// First error of every failed scenario, ready for recovery.
    pub fn failures(&self) -> Vec<TestFailure> {
        self.scenarios
            .iter()
            .filter(|s| !s.passed())
            .filter_map(|s| {
                s.errors.first().map(|error| TestFailure {
                    scenario_id: s.scenario_id.clone(),
                    error: error.clone(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestFailure {
    pub scenario_id: String,
    pub error: TestError,
}
