//! Component events.
//!
//! Each component owns an `EventBus` of its own event type. Subscribers can
//! listen to one topic (`bus.subscribe(Topics::SERVICE_STATUS_CHANGED)`) or
//! to everything a component emits (`bus.subscribe_all()`).

use common::{BusEvent, Topic};
use serde::Serialize;
use std::path::PathBuf;

use crate::auth::Role;
use crate::health::{HealthAlert, HealthStatus, HealthUpdate, ServiceStatus};
use crate::infra::{ExecutionPhase, ExecutionStatus, RecoveryAction, ScenarioResult};
use crate::validation::ValidationResult;

pub struct Topics;

impl Topics {
    // Health monitor
    pub const SERVICE_REGISTERED: Topic = Topic("service:registered");
    pub const SERVICE_STATUS_CHANGED: Topic = Topic("service:status_changed");
    pub const SERVICE_UNHEALTHY: Topic = Topic("service:unhealthy");
    pub const SERVICE_RECOVERED: Topic = Topic("service:recovered");
    pub const ALERT_RAISED: Topic = Topic("alert:raised");
    pub const MONITORING_STARTED: Topic = Topic("monitoring:started");
    pub const MONITORING_STOPPED: Topic = Topic("monitoring:stopped");

    // Authentication
    pub const AUTH_SUCCESS: Topic = Topic("auth:success");
    pub const AUTH_FAILED: Topic = Topic("auth:failed");
    pub const AUTH_SESSION_RESTORED: Topic = Topic("auth:session_restored");
    pub const AUTH_SESSION_PERSISTED: Topic = Topic("auth:session_persisted");
    pub const AUTH_PERSIST_FAILED: Topic = Topic("auth:persist_failed");
    pub const AUTH_TOKEN_REFRESHED: Topic = Topic("auth:token_refreshed");
    pub const AUTH_REFRESH_FAILED: Topic = Topic("auth:refresh_failed");
    pub const AUTH_MULTI_USER_READY: Topic = Topic("auth:multi_user_ready");
    pub const AUTH_MULTI_USER_FAILED: Topic = Topic("auth:multi_user_failed");
    pub const AUTH_VALIDATION_DONE: Topic = Topic("auth:validation_done");
    pub const AUTH_SESSION_INVALIDATED: Topic = Topic("auth:session_invalidated");
    pub const AUTH_RESET: Topic = Topic("auth:reset");

    // Mock server
    pub const MOCKS_CONFIGURED: Topic = Topic("mocks:configured");
    pub const MOCKS_CONFIGURE_FAILED: Topic = Topic("mocks:configure_failed");
    pub const MOCKS_VALIDATED: Topic = Topic("mocks:validated");
    pub const MOCKS_INTEGRATION_VALIDATED: Topic = Topic("mocks:integration_validated");
    pub const MOCKS_SCENARIO_CREATED: Topic = Topic("mocks:scenario_created");
    pub const MOCKS_SCENARIO_ACTIVATED: Topic = Topic("mocks:scenario_activated");
    pub const MOCKS_SCENARIO_FAILED: Topic = Topic("mocks:scenario_failed");
    pub const MOCKS_RESET: Topic = Topic("mocks:reset");

    // Infrastructure
    pub const SERVICES_STARTING: Topic = Topic("services:starting");
    pub const SERVICE_STARTED: Topic = Topic("service:started");
    pub const SERVICES_READY: Topic = Topic("services:ready");
    pub const SERVICES_START_FAILED: Topic = Topic("services:start_failed");
    pub const SERVICES_VALIDATED: Topic = Topic("services:validated");
    pub const SERVICES_STOPPED: Topic = Topic("services:stopped");
    pub const EXECUTION_PHASE: Topic = Topic("execution:phase");
    pub const SCENARIO_DONE: Topic = Topic("scenario:done");
    pub const SCENARIO_FAILED: Topic = Topic("scenario:failed");
    pub const EXECUTION_DONE: Topic = Topic("execution:done");
    pub const EXECUTION_FAILED: Topic = Topic("execution:failed");
    pub const RECOVERY_ACTION: Topic = Topic("recovery:action");
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    ServiceRegistered { service_id: String },
    StatusChanged(HealthUpdate),
    ServiceUnhealthy(HealthStatus),
    ServiceRecovered(HealthStatus),
    AlertRaised(HealthAlert),
    MonitoringStarted { services: usize },
    MonitoringStopped,
}

impl BusEvent for MonitorEvent {
    fn topic(&self) -> Topic {
        match self {
            Self::ServiceRegistered { .. } => Topics::SERVICE_REGISTERED,
            Self::StatusChanged(_) => Topics::SERVICE_STATUS_CHANGED,
            Self::ServiceUnhealthy(_) => Topics::SERVICE_UNHEALTHY,
            Self::ServiceRecovered(_) => Topics::SERVICE_RECOVERED,
            Self::AlertRaised(_) => Topics::ALERT_RAISED,
            Self::MonitoringStarted { .. } => Topics::MONITORING_STARTED,
            Self::MonitoringStopped => Topics::MONITORING_STOPPED,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuthEvent {
    Success {
        session_id: String,
        role: Role,
        scenario: Option<String>,
        reused: bool,
    },
    Failed {
        role: Role,
        error: String,
    },
    SessionRestored {
        session_id: String,
        role: Role,
    },
    SessionPersisted {
        role: Role,
        path: PathBuf,
    },
    PersistFailed {
        role: Role,
        error: String,
    },
    TokenRefreshed {
        session_id: String,
    },
    RefreshFailed {
        session_id: String,
        error: String,
    },
    MultiUserReady {
        sessions: usize,
    },
    MultiUserFailed {
        error: String,
    },
    ValidationDone(ValidationResult),
    SessionInvalidated {
        session_id: String,
        role: Role,
    },
    Reset {
        cleared: usize,
    },
}

impl BusEvent for AuthEvent {
    fn topic(&self) -> Topic {
        match self {
            Self::Success { .. } => Topics::AUTH_SUCCESS,
            Self::Failed { .. } => Topics::AUTH_FAILED,
            Self::SessionRestored { .. } => Topics::AUTH_SESSION_RESTORED,
            Self::SessionPersisted { .. } => Topics::AUTH_SESSION_PERSISTED,
            Self::PersistFailed { .. } => Topics::AUTH_PERSIST_FAILED,
            Self::TokenRefreshed { .. } => Topics::AUTH_TOKEN_REFRESHED,
            Self::RefreshFailed { .. } => Topics::AUTH_REFRESH_FAILED,
            Self::MultiUserReady { .. } => Topics::AUTH_MULTI_USER_READY,
            Self::MultiUserFailed { .. } => Topics::AUTH_MULTI_USER_FAILED,
            Self::ValidationDone(_) => Topics::AUTH_VALIDATION_DONE,
            Self::SessionInvalidated { .. } => Topics::AUTH_SESSION_INVALIDATED,
            Self::Reset { .. } => Topics::AUTH_RESET,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MockEvent {
    Configured { count: usize, services: Vec<String> },
    ConfigureFailed { error: String },
    ContractsValidated(ValidationResult),
    IntegrationValidated { tested: usize, failed: usize },
    ScenarioCreated { name: String },
    ScenarioActivated { name: String },
    ScenarioFailed { name: String, error: String },
    Reset,
}

impl BusEvent for MockEvent {
    fn topic(&self) -> Topic {
        match self {
            Self::Configured { .. } => Topics::MOCKS_CONFIGURED,
            Self::ConfigureFailed { .. } => Topics::MOCKS_CONFIGURE_FAILED,
            Self::ContractsValidated(_) => Topics::MOCKS_VALIDATED,
            Self::IntegrationValidated { .. } => Topics::MOCKS_INTEGRATION_VALIDATED,
            Self::ScenarioCreated { .. } => Topics::MOCKS_SCENARIO_CREATED,
            Self::ScenarioActivated { .. } => Topics::MOCKS_SCENARIO_ACTIVATED,
            Self::ScenarioFailed { .. } => Topics::MOCKS_SCENARIO_FAILED,
            Self::Reset => Topics::MOCKS_RESET,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InfraEvent {
    ServicesStarting {
        batches: Vec<Vec<String>>,
    },
    ServiceStarted {
        service_id: String,
        status: ServiceStatus,
    },
    ServicesReady(ValidationResult),
    StartFailed {
        error: String,
    },
    ServicesValidated(ValidationResult),
    ServicesStopped {
        stopped: Vec<String>,
    },
    Phase {
        plan_id: String,
        phase: ExecutionPhase,
    },
    ScenarioDone(ScenarioResult),
    ScenarioFailed(ScenarioResult),
    ExecutionDone {
        plan_id: String,
        status: ExecutionStatus,
    },
    ExecutionFailed {
        plan_id: String,
        error: String,
    },
    Recovery(RecoveryAction),
}

impl BusEvent for InfraEvent {
    fn topic(&self) -> Topic {
        match self {
            Self::ServicesStarting { .. } => Topics::SERVICES_STARTING,
            Self::ServiceStarted { .. } => Topics::SERVICE_STARTED,
            Self::ServicesReady(_) => Topics::SERVICES_READY,
            Self::StartFailed { .. } => Topics::SERVICES_START_FAILED,
            Self::ServicesValidated(_) => Topics::SERVICES_VALIDATED,
            Self::ServicesStopped { .. } => Topics::SERVICES_STOPPED,
            Self::Phase { .. } => Topics::EXECUTION_PHASE,
            Self::ScenarioDone(_) => Topics::SCENARIO_DONE,
            Self::ScenarioFailed(_) => Topics::SCENARIO_FAILED,
            Self::ExecutionDone { .. } => Topics::EXECUTION_DONE,
            Self::ExecutionFailed { .. } => Topics::EXECUTION_FAILED,
            Self::Recovery(_) => Topics::RECOVERY_ACTION,
        }
    }
}
