//! Error types for the harness.
//!
//! `HarnessError` is what public operations return. `TestError` is the
//! serializable record a failed step or scenario carries in its results; it
//! keeps an [`ErrorKind`] so recovery can dispatch on the kind of failure
//! instead of on message text.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::auth::Role;
use crate::validation::ValidationResult;

pub type HarnessResult<T> = Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    // === Configuration ===
    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("No user configured for role {0}")]
    MissingUserSpec(Role),

    #[error("Session {0} has no refresh token")]
    MissingRefreshToken(String),

    #[error("Role {role} lacks permission {permission}")]
    PermissionDenied { role: Role, permission: String },

    #[error("Unknown mock scenario: {0}")]
    UnknownScenario(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // === Services ===
    #[error("Service {service_id} failed to start: {reason}")]
    ServiceStart { service_id: String, reason: String },

    #[error("Service {service_id} failed to stop: {reason}")]
    ServiceStop { service_id: String, reason: String },

    #[error("Service {service_id} is unavailable: {message}")]
    ServiceUnavailable { service_id: String, message: String },

    #[error("Service validation failed: {}", .0.errors.join("; "))]
    Validation(ValidationResult),

    // === Mock server ===
    #[error("Mock server returned {status} for {operation}: {body}")]
    MockServer {
        operation: String,
        status: u16,
        body: String,
    },

    // === Execution ===
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Assertion failed: {0}")]
    Assertion(String),

    // === Transport / IO ===
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl HarnessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownService(_)
            | Self::UnknownScenario(_)
            | Self::Configuration(_)
            | Self::Yaml(_) => ErrorKind::Configuration,
            Self::MissingUserSpec(_)
            | Self::MissingRefreshToken(_)
            | Self::PermissionDenied { .. } => ErrorKind::Authentication,
            Self::ServiceStart { .. }
            | Self::ServiceStop { .. }
            | Self::ServiceUnavailable { .. }
            | Self::Validation(_) => ErrorKind::Connection,
            Self::MockServer { .. } => ErrorKind::MockServer,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Assertion(_) => ErrorKind::Assertion,
            Self::Http(e) => ErrorKind::from_reqwest(e),
            Self::Io(_) | Self::Json(_) => ErrorKind::Unknown,
        }
    }

    /// Stable machine-readable code used in `TestError::code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownService(_) => "UNKNOWN_SERVICE",
            Self::MissingUserSpec(_) => "MISSING_USER",
            Self::MissingRefreshToken(_) => "MISSING_REFRESH_TOKEN",
            Self::PermissionDenied { .. } => "PERMISSION_DENIED",
            Self::UnknownScenario(_) => "UNKNOWN_MOCK_SCENARIO",
            Self::Configuration(_) => "CONFIGURATION",
            Self::ServiceStart { .. } => "SERVICE_START_FAILED",
            Self::ServiceStop { .. } => "SERVICE_STOP_FAILED",
            Self::ServiceUnavailable { .. } => "SERVICE_UNAVAILABLE",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::MockServer { .. } => "MOCK_SERVER_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Assertion(_) => "ASSERTION_FAILED",
            Self::Http(_) => "HTTP_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Yaml(_) => "YAML_ERROR",
        }
    }
}

/// What went wrong, coarse enough to pick a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Timeout,
    Authentication,
    MockServer,
    Assertion,
    Configuration,
    Unknown,
}

impl ErrorKind {
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else if error.is_connect() {
            Self::Connection
        } else if error.is_status() {
            Self::Assertion
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestError {
    pub code: String,
    pub message: String,
    pub kind: ErrorKind,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl TestError {
    pub fn new(code: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            kind,
            context: HashMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Service the failure is attributed to, if any.
    pub fn service_id(&self) -> Option<&str> {
        self.context.get("service_id").map(String::as_str)
    }
}

impl From<&HarnessError> for TestError {
    fn from(error: &HarnessError) -> Self {
        let test_error = Self::new(error.code(), error.kind(), error.to_string());
        match error {
            HarnessError::UnknownService(id)
            | HarnessError::ServiceStart { service_id: id, .. }
            | HarnessError::ServiceStop { service_id: id, .. }
            | HarnessError::ServiceUnavailable { service_id: id, .. } => {
                test_error.with_context("service_id", id.clone())
            }
            _ => test_error,
        }
    }
}

impl From<HarnessError> for TestError {
    fn from(error: HarnessError) -> Self {
        Self::from(&error)
    }
}
