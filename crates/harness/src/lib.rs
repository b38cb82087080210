//! # Harness
//!
//! Coordinates the external services an end-to-end test suite depends on:
//!
//! - [`ServiceHealthMonitor`] polls health endpoints, keeps rolling metrics
//!   and raises threshold alerts
//! - [`AuthenticationFlowCoordinator`] issues, caches and persists
//!   role-scoped test sessions
//! - [`MockIntegrationManager`] drives a MockServer-compatible admin API
//! - [`TestInfrastructureManager`] starts services in tier order, runs
//!   [`TestPlan`]s and applies recovery to failures
//!
//! Every component publishes its events on a `common::EventBus`.
//!
//! ```no_run
//! use harness::{HarnessConfig, TestInfrastructureManager};
//!
//! # async fn run() -> harness::HarnessResult<()> {
//! let manager = TestInfrastructureManager::new(HarnessConfig::default());
//! manager.start_services(None).await?;
//! let report = manager.monitor().generate_health_report().await;
//! println!("overall: {}", report.overall);
//! manager.stop_services().await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod infra;
pub mod mocks;
pub mod reliability;
pub mod validation;

pub use auth::{AuthSession, AuthenticationFlowCoordinator, Role, UserSpec};
pub use config::{AlertThresholds, AuthConfig, HarnessConfig, MockConfig, MonitorConfig};
pub use error::{ErrorKind, HarnessError, HarnessResult, TestError};
pub use events::{AuthEvent, InfraEvent, MockEvent, MonitorEvent, Topics};
pub use health::{
    HealthReport, HealthStatus, HealthUpdate, HealthUpdateStream, ServiceDefinition,
    ServiceHealthMonitor, ServiceStatus, ServiceType,
};
pub use infra::{
    ExecutionStatus, RecoveryAction, ScenarioResult, ServiceController, StepAction, TestPlan,
    TestResults, TestInfrastructureManager, TestScenario, TestStep,
};
pub use mocks::{ApiContract, MockBehavior, MockIntegrationManager, MockReport};
pub use validation::ValidationResult;
