//! Failure recovery.
//!
//! Recovery is chosen from the [`ErrorKind`] recorded with the failure:
//! connection problems restart the affected services, timeouts re-run the
//! scenario. Other kinds are left alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::{ScenarioResult, TestFailure, TestPlan};
use crate::error::ErrorKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecoveryActionKind {
    RestartService { service_id: String },
    Retry { scenario_id: String, max_attempts: u32 },
}

/// A recovery step that was carried out, with its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub kind: RecoveryActionKind,
    pub scenario_id: String,
    pub success: bool,
    pub attempts: u32,
    pub message: String,
    /// Final result of a retried scenario
    pub result: Option<ScenarioResult>,
    pub timestamp: DateTime<Utc>,
}

/// Actions to run for one failure. A connection failure without a service
/// in its context restarts every service the scenario requires.
pub fn plan_recovery(plan: &TestPlan, failure: &TestFailure) -> Vec<RecoveryActionKind> {
    match failure.error.kind {
        ErrorKind::Connection => {
            let services: Vec<String> = match failure.error.service_id() {
                Some(id) => vec![id.to_string()],
                None => plan
                    .scenario(&failure.scenario_id)
                    .map(|s| s.required_services.clone())
                    .unwrap_or_default(),
            };
            services
                .into_iter()
                .map(|service_id| RecoveryActionKind::RestartService { service_id })
                .collect()
        }
        ErrorKind::Timeout => vec![RecoveryActionKind::Retry {
            scenario_id: failure.scenario_id.clone(),
            max_attempts: plan.retry_policy.max_attempts.max(1),
        }],
        ErrorKind::Authentication
        | ErrorKind::MockServer
        | ErrorKind::Assertion
        | ErrorKind::Configuration
        | ErrorKind::Unknown => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TestError;
    use crate::infra::plan::{StepAction, TestScenario, TestStep};
    use rstest::rstest;

    fn plan() -> TestPlan {
        TestPlan {
            id: "p".into(),
            name: "p".into(),
            description: String::new(),
            scenarios: vec![TestScenario {
                id: "s1".into(),
                name: "s1".into(),
                required_services: vec!["api".into(), "db".into()],
                mock_behaviors: vec![],
                auth_requirements: vec![],
                steps: vec![TestStep {
                    name: "wait".into(),
                    action: StepAction::Wait { ms: 1 },
                    timeout_ms: None,
                }],
            }],
            parallel: false,
            timeout_ms: 1_000,
            retry_policy: Default::default(),
        }
    }

    fn failure(kind: ErrorKind) -> TestFailure {
        TestFailure {
            scenario_id: "s1".into(),
            error: TestError::new("X", kind, "boom"),
        }
    }

    #[test]
    fn connection_restarts_the_named_service() {
        let mut f = failure(ErrorKind::Connection);
        f.error = f.error.with_context("service_id", "api");
        assert_eq!(
            plan_recovery(&plan(), &f),
            vec![RecoveryActionKind::RestartService {
                service_id: "api".into()
            }]
        );
    }

    #[test]
    fn connection_without_service_restarts_required_services() {
        assert_eq!(plan_recovery(&plan(), &failure(ErrorKind::Connection)).len(), 2);
    }

    #[test]
    fn timeout_retries_with_plan_attempts() {
        assert_eq!(
            plan_recovery(&plan(), &failure(ErrorKind::Timeout)),
            vec![RecoveryActionKind::Retry {
                scenario_id: "s1".into(),
                max_attempts: 3
            }]
        );
    }

    #[rstest]
    #[case(ErrorKind::Authentication)]
    #[case(ErrorKind::MockServer)]
    #[case(ErrorKind::Assertion)]
    #[case(ErrorKind::Configuration)]
    #[case(ErrorKind::Unknown)]
    fn other_kinds_take_no_action(#[case] kind: ErrorKind) {
        assert!(plan_recovery(&plan(), &failure(kind)).is_empty());
    }
}
