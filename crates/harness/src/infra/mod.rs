//! Test infrastructure orchestration.
//!
//! [`TestInfrastructureManager`] owns the health monitor, the auth
//! coordinator and the mock manager. It brings services up in tier order,
//! validates readiness, runs test plans and applies recovery to failures.

mod controller;
mod executor;
mod metrics;
mod plan;
mod recovery;

pub use controller::{CommandServiceController, ServiceController};
pub use metrics::{ResourceUsage, TestMetrics};
pub use plan::{
    ExecutionPhase, ExecutionStatus, ScenarioResult, ScenarioStatus, StepAction, StepResult,
    StepStatus, TestFailure, TestPlan, TestResults, TestScenario, TestStep,
};
pub use recovery::{plan_recovery, RecoveryAction, RecoveryActionKind};

use chrono::Utc;
use common::EventBus;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::auth::AuthenticationFlowCoordinator;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult, TestError};
use crate::events::InfraEvent;
use crate::health::{ServiceDefinition, ServiceHealthMonitor, ServiceStatus, ServiceType};
use crate::mocks::MockIntegrationManager;
use crate::reliability::{RetryConfig, RetryError, RetryPolicy};
use crate::validation::ValidationResult;

pub struct TestInfrastructureManager {
    config: HarnessConfig,
    monitor: ServiceHealthMonitor,
    auth: AuthenticationFlowCoordinator,
    mocks: MockIntegrationManager,
    controller: Arc<dyn ServiceController>,
    http: reqwest::Client,
    /// Services in the order they were started
    started: Mutex<Vec<ServiceDefinition>>,
    events: EventBus<InfraEvent>,
}

impl TestInfrastructureManager {
    pub fn new(config: HarnessConfig) -> Self {
        Self::with_controller(config, Arc::new(CommandServiceController::new()))
    }

    pub fn with_controller(config: HarnessConfig, controller: Arc<dyn ServiceController>) -> Self {
        Self {
            monitor: ServiceHealthMonitor::new(config.monitor.clone()),
            auth: AuthenticationFlowCoordinator::new(config.auth.clone()),
            mocks: MockIntegrationManager::new(config.mocks.clone()),
            controller,
            http: reqwest::Client::new(),
            started: Mutex::new(Vec::new()),
            events: EventBus::default(),
            config,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn monitor(&self) -> &ServiceHealthMonitor {
        &self.monitor
    }

    pub fn auth(&self) -> &AuthenticationFlowCoordinator {
        &self.auth
    }

    pub fn mocks(&self) -> &MockIntegrationManager {
        &self.mocks
    }

    pub fn events(&self) -> &EventBus<InfraEvent> {
        &self.events
    }

    fn select_services(&self, requested: Option<&[String]>) -> HarnessResult<Vec<ServiceDefinition>> {
        match requested {
            None => Ok(self.config.services.clone()),
            Some(ids) => ids
                .iter()
                .map(|id| {
                    self.config
                        .service(id)
                        .cloned()
                        .ok_or_else(|| HarnessError::UnknownService(id.clone()))
                })
                .collect(),
        }
    }

    /// Starts the requested services (all configured ones by default) tier
    /// by tier, waits for each to report up, then validates the whole stack.
    pub async fn start_services(&self, requested: Option<&[String]>) -> HarnessResult<ValidationResult> {
        let started = Instant::now();
        let result = self.start_services_inner(requested).await;
        match &result {
            Ok(_) => info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "✅ All services started and validated"
            ),
            Err(e) => {
                error!(error = %e, "❌ Service startup failed");
                self.events
                    .emit(InfraEvent::StartFailed {
                        error: e.to_string(),
                    })
                    .await;
            }
        }
        result
    }

    async fn start_services_inner(&self, requested: Option<&[String]>) -> HarnessResult<ValidationResult> {
        let definitions = self.select_services(requested)?;
        let batches = startup_batches(definitions);
        let batch_ids: Vec<Vec<String>> = batches
            .iter()
            .map(|b| b.iter().map(|d| d.id.clone()).collect())
            .collect();

        info!(batches = ?batch_ids, "🚀 Starting services");
        self.events
            .emit(InfraEvent::ServicesStarting { batches: batch_ids })
            .await;

        for batch in &batches {
            let results = join_all(batch.iter().map(|def| self.start_service(def))).await;
            results.into_iter().collect::<HarnessResult<Vec<_>>>()?;
        }

        let validation = self.validate_services().await;
        if !validation.valid {
            return Err(HarnessError::Validation(validation));
        }
        self.events
            .emit(InfraEvent::ServicesReady(validation.clone()))
            .await;
        Ok(validation)
    }

    async fn start_service(&self, definition: &ServiceDefinition) -> HarnessResult<()> {
        self.controller.start(definition).await?;
        self.started.lock().await.push(definition.clone());
        self.monitor.register_service(definition.clone()).await;

        let health = self
            .monitor
            .wait_for_service(
                &definition.id,
                self.config.startup_timeout(),
                self.config.startup_poll_interval(),
            )
            .await?;

        info!(service_id = %definition.id, status = %health.status, "✅ Service up");
        self.events
            .emit(InfraEvent::ServiceStarted {
                service_id: definition.id.clone(),
                status: health.status,
            })
            .await;
        Ok(())
    }

    /// Health of every registered service, mock integration when mocks are
    /// configured, and the auth session state, merged into one result.
    pub async fn validate_services(&self) -> ValidationResult {
        let mut health = ValidationResult::ok();
        for status in self.monitor.check_all_services().await {
            match status.status {
                ServiceStatus::Unhealthy => health.error(format!(
                    "{} is unhealthy: {}",
                    status.service_id, status.message
                )),
                ServiceStatus::Degraded => health.warning(format!(
                    "{} is degraded: {}",
                    status.service_id, status.message
                )),
                ServiceStatus::Healthy | ServiceStatus::Unknown => {}
            }
        }

        let mut result = ValidationResult::ok();
        result.merge("health", health);

        if !self.mocks.configured_behaviors().await.is_empty() {
            let integration = self.mocks.validate_mock_to_app_integration().await;
            result.merge("mocks", integration.validation);
        }

        let auth = self.auth.validate_authentication_state(None).await;
        result.merge("auth", auth);

        self.events
            .emit(InfraEvent::ServicesValidated(result.clone()))
            .await;
        result
    }

    /// Stops started services in reverse order, then clears monitor, auth
    /// and mock state. Individual failures are logged and skipped.
    pub async fn stop_services(&self) -> Vec<String> {
        let services: Vec<ServiceDefinition> = std::mem::take(&mut *self.started.lock().await);
        let mut stopped = Vec::with_capacity(services.len());

        for definition in services.iter().rev() {
            match self.controller.stop(definition).await {
                Ok(()) => stopped.push(definition.id.clone()),
                Err(e) => warn!(service_id = %definition.id, error = %e, "⚠️ Failed to stop service"),
            }
        }

        self.monitor.clear().await;
        self.auth.reset().await;
        if let Err(e) = self.mocks.reset().await {
            warn!(error = %e, "⚠️ Mock server reset failed during shutdown");
        }

        info!(stopped = stopped.len(), "🧹 Services stopped");
        self.events
            .emit(InfraEvent::ServicesStopped {
                stopped: stopped.clone(),
            })
            .await;
        stopped
    }

    async fn enter_phase(&self, plan: &TestPlan, phase: ExecutionPhase) {
        info!(plan = %plan.id, ?phase, "execution phase");
        self.events
            .emit(InfraEvent::Phase {
                plan_id: plan.id.clone(),
                phase,
            })
            .await;
    }

    /// Runs every scenario of `plan`. Setup failures are returned as errors;
    /// scenario failures are reported in the results. Cleanup always runs.
    pub async fn orchestrate_test_execution(&self, plan: &TestPlan) -> HarnessResult<TestResults> {
        let started_at = Utc::now();
        let start = Instant::now();
        info!(plan = %plan.id, scenarios = plan.scenarios.len(), parallel = plan.parallel, "🧪 Executing test plan");

        self.enter_phase(plan, ExecutionPhase::Pending).await;
        self.enter_phase(plan, ExecutionPhase::Setup).await;
        if let Err(e) = self.pre_execution_setup(plan).await {
            error!(plan = %plan.id, error = %e, "❌ Pre-execution setup failed");
            self.enter_phase(plan, ExecutionPhase::Cleanup).await;
            self.post_execution_cleanup().await;
            self.events
                .emit(InfraEvent::ExecutionFailed {
                    plan_id: plan.id.clone(),
                    error: e.to_string(),
                })
                .await;
            return Err(e);
        }

        self.enter_phase(plan, ExecutionPhase::Executing).await;
        let timeout = plan.timeout();
        let scenarios = if plan.parallel {
            join_all(plan.scenarios.iter().map(|s| self.run_scenario(s, timeout))).await
        } else {
            let mut results = Vec::with_capacity(plan.scenarios.len());
            for scenario in &plan.scenarios {
                results.push(self.run_scenario(scenario, timeout).await);
            }
            results
        };

        for result in &scenarios {
            let event = if result.passed() {
                InfraEvent::ScenarioDone(result.clone())
            } else {
                InfraEvent::ScenarioFailed(result.clone())
            };
            self.events.emit(event).await;
        }

        self.enter_phase(plan, ExecutionPhase::Aggregating).await;
        let resource_usage = tokio::task::spawn_blocking(ResourceUsage::sample)
            .await
            .unwrap_or_default();
        let metrics = TestMetrics::compute(plan, &scenarios, resource_usage);
        let status = ExecutionStatus::from_scenarios(&scenarios);
        let errors: Vec<TestError> = scenarios
            .iter()
            .flat_map(|s| s.errors.iter().cloned())
            .collect();

        self.enter_phase(plan, ExecutionPhase::Cleanup).await;
        self.post_execution_cleanup().await;
        self.enter_phase(plan, ExecutionPhase::Done).await;

        info!(
            plan = %plan.id,
            ?status,
            passed = metrics.passed_scenarios,
            failed = metrics.failed_scenarios,
            "🏁 Test plan finished"
        );
        self.events
            .emit(InfraEvent::ExecutionDone {
                plan_id: plan.id.clone(),
                status,
            })
            .await;

        Ok(TestResults {
            plan_id: plan.id.clone(),
            status,
            scenarios,
            metrics,
            errors,
            started_at,
            finished_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn pre_execution_setup(&self, plan: &TestPlan) -> HarnessResult<()> {
        for role in plan.distinct_roles() {
            self.auth.authenticate_as_role(role, Some(&plan.id)).await?;
        }

        let behaviors = plan.all_mock_behaviors();
        if !behaviors.is_empty() {
            self.mocks.configure_mock_behaviors(behaviors).await?;
        }
        Ok(())
    }

    /// Re-creates what one scenario needs after a cleanup: sessions for its
    /// roles and its mock behaviors.
    async fn prepare_scenario(&self, plan: &TestPlan, scenario: &TestScenario) -> HarnessResult<()> {
        for role in &scenario.auth_requirements {
            self.auth.authenticate_as_role(*role, Some(&plan.id)).await?;
        }
        if !scenario.mock_behaviors.is_empty() {
            self.mocks
                .configure_mock_behaviors(scenario.mock_behaviors.clone())
                .await?;
        }
        Ok(())
    }

    async fn post_execution_cleanup(&self) {
        self.auth.reset().await;
        if let Err(e) = self.mocks.reset().await {
            warn!(error = %e, "⚠️ Mock reset failed during cleanup");
        }
    }

    /// Picks a recovery per failure from its error kind and carries it out.
    /// Returns only the actions that were attempted.
    pub async fn handle_test_failures(
        &self,
        plan: &TestPlan,
        failures: &[TestFailure],
    ) -> Vec<RecoveryAction> {
        let mut actions = Vec::new();
        for failure in failures {
            let planned = plan_recovery(plan, failure);
            if planned.is_empty() {
                info!(
                    scenario = %failure.scenario_id,
                    kind = ?failure.error.kind,
                    "no recovery for this kind of failure"
                );
            }
            for kind in planned {
                let action = match kind {
                    RecoveryActionKind::RestartService { ref service_id } => {
                        self.restart_service(service_id, &failure.scenario_id, kind.clone())
                            .await
                    }
                    RecoveryActionKind::Retry {
                        ref scenario_id,
                        max_attempts,
                    } => {
                        self.retry_scenario(plan, scenario_id, max_attempts, kind.clone())
                            .await
                    }
                };
                let marker = if action.success { "🔧" } else { "⚠️" };
                info!(scenario = %action.scenario_id, success = action.success, "{marker} Recovery: {}", action.message);
                self.events.emit(InfraEvent::Recovery(action.clone())).await;
                actions.push(action);
            }
        }
        actions
    }

    async fn restart_service(
        &self,
        service_id: &str,
        scenario_id: &str,
        kind: RecoveryActionKind,
    ) -> RecoveryAction {
        let outcome = self.try_restart(service_id).await;
        let (success, message) = match outcome {
            Ok(status) => (true, format!("restarted {service_id} ({status})")),
            Err(e) => (false, format!("restart of {service_id} failed: {e}")),
        };
        RecoveryAction {
            kind,
            scenario_id: scenario_id.to_string(),
            success,
            attempts: 1,
            message,
            result: None,
            timestamp: Utc::now(),
        }
    }

    async fn try_restart(&self, service_id: &str) -> HarnessResult<ServiceStatus> {
        let definition = self
            .config
            .service(service_id)
            .cloned()
            .ok_or_else(|| HarnessError::UnknownService(service_id.to_string()))?;

        if let Err(e) = self.controller.stop(&definition).await {
            warn!(service_id, error = %e, "stop before restart failed");
        }
        self.controller.start(&definition).await?;
        if self.monitor.status(service_id).await.is_none() {
            self.monitor.register_service(definition.clone()).await;
        }
        let health = self
            .monitor
            .wait_for_service(
                service_id,
                self.config.startup_timeout(),
                self.config.startup_poll_interval(),
            )
            .await?;
        Ok(health.status)
    }

    async fn retry_scenario(
        &self,
        plan: &TestPlan,
        scenario_id: &str,
        max_attempts: u32,
        kind: RecoveryActionKind,
    ) -> RecoveryAction {
        let Some(scenario) = plan.scenario(scenario_id) else {
            return RecoveryAction {
                kind,
                scenario_id: scenario_id.to_string(),
                success: false,
                attempts: 0,
                message: format!("scenario {scenario_id} is not part of plan {}", plan.id),
                result: None,
                timestamp: Utc::now(),
            };
        };

        let mut policy = RetryPolicy::new(RetryConfig {
            max_attempts,
            backoff: plan.retry_policy.backoff.clone(),
        });
        let timeout = plan.timeout();
        let outcome = policy
            .execute(
                |attempt| async move {
                    info!(scenario = %scenario.id, attempt = attempt + 1, "🔁 Retrying scenario");
                    if let Err(e) = self.prepare_scenario(plan, scenario).await {
                        return Err(RetryAttemptFailure::Setup(e));
                    }
                    let result = self.run_scenario(scenario, timeout).await;
                    if result.passed() {
                        Ok(result)
                    } else {
                        Err(RetryAttemptFailure::Scenario(result))
                    }
                },
                |e| matches!(e, RetryAttemptFailure::Scenario(_)),
            )
            .await;
        self.post_execution_cleanup().await;

        let attempts = policy.stats().total_retry_attempts as u32 + 1;
        match outcome {
            Ok(result) => RecoveryAction {
                kind,
                scenario_id: scenario_id.to_string(),
                success: true,
                attempts,
                message: format!("{scenario_id} passed on attempt {attempts}"),
                result: Some(result),
                timestamp: Utc::now(),
            },
            Err(e) => {
                let attempts = match &e {
                    RetryError::Exhausted { attempts, .. } => *attempts,
                    RetryError::Permanent(_) => 1,
                };
                RecoveryAction {
                    kind,
                    scenario_id: scenario_id.to_string(),
                    success: false,
                    attempts,
                    message: format!("{scenario_id} still failing after {attempts} attempt(s): {e}"),
                    result: match e.into_inner() {
                        RetryAttemptFailure::Scenario(result) => Some(result),
                        RetryAttemptFailure::Setup(_) => None,
                    },
                    timestamp: Utc::now(),
                }
            }
        }
    }
}

/// Why one retry attempt did not pass.
#[derive(Debug)]
enum RetryAttemptFailure {
    /// Auth or mock setup for the attempt failed; not retried
    Setup(HarnessError),
    Scenario(ScenarioResult),
}

impl std::fmt::Display for RetryAttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup(e) => write!(f, "setup failed: {e}"),
            Self::Scenario(result) => match result.errors.first() {
                Some(error) => write!(f, "scenario {} failed: {}", result.scenario_id, error.message),
                None => write!(f, "scenario {} failed", result.scenario_id),
            },
        }
    }
}

/// Groups definitions into startup tiers, dropping empty tiers.
pub fn startup_batches(definitions: Vec<ServiceDefinition>) -> Vec<Vec<ServiceDefinition>> {
    ServiceType::STARTUP_ORDER
        .iter()
        .map(|tier| {
            definitions
                .iter()
                .filter(|d| d.service_type == *tier)
                .cloned()
                .collect::<Vec<_>>()
        })
        .filter(|batch| !batch.is_empty())
        .collect()
}
