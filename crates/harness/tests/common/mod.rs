//! Shared fixtures: a MockServer-compatible admin emulator on top of
//! `wiremock`, plus config helpers pointing the harness at local servers.

#![allow(dead_code)]

use harness::{AuthConfig, HarnessConfig, MockConfig, MonitorConfig, ServiceDefinition};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Expectations received through `PUT /mockserver/expectation`.
#[derive(Clone, Default)]
pub struct ExpectationStore {
    inner: Arc<Mutex<Vec<Value>>>,
}

impl ExpectationStore {
    pub fn all(&self) -> Vec<Value> {
        self.inner.lock().expect("store lock").clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("store lock").len()
    }

    fn clear(&self) {
        self.inner.lock().expect("store lock").clear();
    }

    fn extend(&self, expectations: Vec<Value>) {
        self.inner.lock().expect("store lock").extend(expectations);
    }

    /// Most recently added expectation for `method` and `path`.
    fn find(&self, method: &str, path: &str) -> Option<Value> {
        self.inner
            .lock()
            .expect("store lock")
            .iter()
            .rev()
            .find(|e| {
                e["httpRequest"]["method"].as_str() == Some(method)
                    && e["httpRequest"]["path"].as_str() == Some(path)
            })
            .cloned()
    }
}

struct AdminEmulator {
    store: ExpectationStore,
}

impl Respond for AdminEmulator {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let method = request.method.as_str();
        let path = request.url.path();

        match (method, path) {
            ("PUT", "/mockserver/clear") => {
                self.store.clear();
                ResponseTemplate::new(200)
            }
            ("PUT", "/mockserver/expectation") => {
                match serde_json::from_slice::<Vec<Value>>(&request.body) {
                    Ok(expectations) => {
                        self.store.extend(expectations);
                        ResponseTemplate::new(201)
                    }
                    Err(e) => ResponseTemplate::new(400).set_body_string(e.to_string()),
                }
            }
            ("GET", "/liveness/probe") => ResponseTemplate::new(200),
            _ => match self.store.find(method, path) {
                Some(expectation) => render(&expectation["httpResponse"]),
                None => ResponseTemplate::new(404),
            },
        }
    }
}

fn render(response: &Value) -> ResponseTemplate {
    let status = response["statusCode"].as_u64().unwrap_or(200) as u16;
    let mut template = ResponseTemplate::new(status);

    match &response["body"] {
        Value::Null => {}
        Value::String(s) => template = template.set_body_string(s.clone()),
        other => template = template.set_body_json(other.clone()),
    }

    if let Some(headers) = response["headers"].as_object() {
        for (name, values) in headers {
            if let Some(value) = values.get(0).and_then(Value::as_str) {
                template = template.insert_header(name.as_str(), value);
            }
        }
    }

    if let Some(ms) = response["delay"]["value"].as_u64() {
        template = template.set_delay(Duration::from_millis(ms));
    }
    template
}

/// Starts a server that speaks the MockServer admin API.
pub async fn start_mock_server() -> (MockServer, ExpectationStore) {
    let server = MockServer::start().await;
    let store = ExpectationStore::default();
    Mock::given(any())
        .respond_with(AdminEmulator {
            store: store.clone(),
        })
        .mount(&server)
        .await;
    (server, store)
}

pub fn fast_monitor() -> MonitorConfig {
    MonitorConfig {
        retry_base_delay_ms: 5,
        ..MonitorConfig::default()
    }
}

pub fn auth_in(dir: &TempDir) -> AuthConfig {
    AuthConfig {
        auth_dir: dir.path().to_path_buf(),
        ..AuthConfig::default()
    }
}

pub fn harness_config(
    services: Vec<ServiceDefinition>,
    mock_server_url: &str,
    auth_dir: &TempDir,
) -> HarnessConfig {
    HarnessConfig {
        services,
        monitor: fast_monitor(),
        auth: auth_in(auth_dir),
        mocks: MockConfig {
            server_url: mock_server_url.to_string(),
            ..MockConfig::default()
        },
        startup_timeout_ms: 2_000,
        startup_poll_interval_ms: 20,
    }
}
