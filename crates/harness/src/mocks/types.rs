use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::validation::ValidationResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockResponse {
    pub status: u16,
    #[serde(default)]
    pub body: serde_json::Value,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub delay_ms: u64,
}

/// Extra request matching on top of method and path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConditions {
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

impl MatchConditions {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.query.is_empty() && self.body.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockBehavior {
    pub service_id: String,
    pub endpoint: String,
    pub method: String,
    pub response: MockResponse,
    #[serde(default)]
    pub conditions: Option<MatchConditions>,
}

impl MockBehavior {
    pub fn new(
        service_id: impl Into<String>,
        method: impl Into<String>,
        endpoint: impl Into<String>,
        status: u16,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            endpoint: endpoint.into(),
            method: method.into().to_uppercase(),
            response: MockResponse {
                status,
                body: serde_json::Value::Null,
                headers: BTreeMap::new(),
                delay_ms: 0,
            },
            conditions: None,
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.response.body = body;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.response.delay_ms = delay_ms;
        self
    }

    pub fn with_conditions(mut self, conditions: MatchConditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// `METHOD:endpoint`, unique among configured behaviors.
    pub fn key(&self) -> String {
        behavior_key(&self.method, &self.endpoint)
    }
}

pub fn behavior_key(method: &str, endpoint: &str) -> String {
    format!("{}:{}", method.to_uppercase(), endpoint)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseSchema {
    /// Top-level fields the response body must carry
    pub required: Vec<String>,
    pub properties: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiContract {
    pub endpoint: String,
    pub method: String,
    #[serde(default)]
    pub request_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub response_schema: ResponseSchema,
    /// Allowed response codes; empty allows any
    #[serde(default)]
    pub status_codes: Vec<u16>,
}

impl ApiContract {
    pub fn key(&self) -> String {
        behavior_key(&self.method, &self.endpoint)
    }
}

/// When a scenario should switch in. Only `Manual` is acted on; the other
/// conditions are recorded and reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivationCondition {
    #[default]
    Manual,
    AtTime {
        at: DateTime<Utc>,
    },
    OnEvent {
        event: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockScenario {
    pub name: String,
    pub description: String,
    pub behaviors: Vec<MockBehavior>,
    #[serde(default)]
    pub activation: ActivationCondition,
    pub created_at: DateTime<Utc>,
}

/// Outcome of re-requesting one configured mock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointCheck {
    pub key: String,
    pub url: String,
    pub expected_status: u16,
    pub actual_status: Option<u16>,
    pub response_time_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrationReport {
    pub tested_endpoints: usize,
    pub successful_endpoints: Vec<EndpointCheck>,
    pub failed_endpoints: Vec<EndpointCheck>,
    pub unused_mocks: Vec<String>,
    pub slow_endpoints: Vec<String>,
    pub validation: ValidationResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointUsage {
    pub key: String,
    pub requests: u64,
    pub errors: u64,
    pub average_response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockReport {
    pub generated_at: DateTime<Utc>,
    pub total_mocks: usize,
    pub active_mocks: usize,
    pub average_response_time_ms: f64,
    pub error_rate: f64,
    pub top_endpoints: Vec<EndpointUsage>,
    pub active_scenario: Option<String>,
    pub scenarios: Vec<String>,
}
