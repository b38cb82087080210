//! Service Health Monitoring
//!
//! Polls the health endpoints of registered services, keeps one current
//! [`HealthStatus`] and a running [`ServiceMetrics`] per service, and raises
//! threshold alerts. Status changes are published on the monitor's event bus
//! and fed to every stream returned by
//! [`ServiceHealthMonitor::monitor_continuous_health`].

mod metrics;
mod types;

pub use types::{
    AlertKind, AlertSeverity, HealthAlert, HealthReport, HealthStatus, HealthSummary,
    HealthUpdate, ResponseTimeStats, ServiceDefinition, ServiceEndpoints, ServiceMetrics,
    ServiceStatus, ServiceType,
};

use chrono::Utc;
use common::EventBus;
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::events::MonitorEvent;
use crate::reliability::{BackoffStrategy, RetryConfig, RetryPolicy};
use metrics::MetricsTracker;

/// Stream of status changes; ends when monitoring stops.
pub type HealthUpdateStream = ReceiverStream<HealthUpdate>;

/// Result of one probe before classification.
struct ProbeOutcome {
    up: bool,
    response_time_ms: Option<u64>,
    message: String,
    endpoint: &'static str,
    http_status: Option<u16>,
    body: serde_json::Value,
}

struct MonitoringState {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct MonitorInner {
    config: MonitorConfig,
    client: reqwest::Client,
    services: RwLock<HashMap<String, ServiceDefinition>>,
    statuses: RwLock<HashMap<String, HealthStatus>>,
    metrics: RwLock<HashMap<String, MetricsTracker>>,
    alerts: RwLock<VecDeque<HealthAlert>>,
    subscribers: Mutex<Vec<mpsc::Sender<HealthUpdate>>>,
    monitoring: Mutex<Option<MonitoringState>>,
    events: EventBus<MonitorEvent>,
}

#[derive(Clone)]
pub struct ServiceHealthMonitor {
    inner: Arc<MonitorInner>,
}

impl ServiceHealthMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                client: reqwest::Client::new(),
                services: RwLock::new(HashMap::new()),
                statuses: RwLock::new(HashMap::new()),
                metrics: RwLock::new(HashMap::new()),
                alerts: RwLock::new(VecDeque::new()),
                subscribers: Mutex::new(Vec::new()),
                monitoring: Mutex::new(None),
                events: EventBus::default(),
            }),
        }
    }

    pub fn events(&self) -> &EventBus<MonitorEvent> {
        &self.inner.events
    }

    /// Adds a service with zeroed metrics and an `Unknown` status. If
    /// monitoring is running the service is polled right away.
    pub async fn register_service(&self, definition: ServiceDefinition) {
        let id = definition.id.clone();
        info!(service_id = %id, health = %definition.endpoints.health, "Registering service for health monitoring");

        self.inner
            .services
            .write()
            .await
            .insert(id.clone(), definition.clone());
        self.inner
            .statuses
            .write()
            .await
            .insert(id.clone(), HealthStatus::unknown(&id));
        self.inner
            .metrics
            .write()
            .await
            .insert(id.clone(), MetricsTracker::default());

        {
            let mut monitoring = self.inner.monitoring.lock().await;
            if let Some(state) = monitoring.as_mut() {
                let task = self.spawn_poll_loop(definition, state.token.clone());
                state.tasks.push(task);
            }
        }

        self.inner
            .events
            .emit(MonitorEvent::ServiceRegistered { service_id: id })
            .await;
    }

    /// Removes a service; its poll loop ends on its next tick.
    pub async fn unregister_service(&self, service_id: &str) -> bool {
        let removed = self.inner.services.write().await.remove(service_id).is_some();
        self.inner.statuses.write().await.remove(service_id);
        self.inner.metrics.write().await.remove(service_id);
        removed
    }

    pub async fn services(&self) -> Vec<ServiceDefinition> {
        let mut services: Vec<_> = self.inner.services.read().await.values().cloned().collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        services
    }

    pub async fn status(&self, service_id: &str) -> Option<HealthStatus> {
        self.inner.statuses.read().await.get(service_id).cloned()
    }

    pub async fn metrics(&self, service_id: &str) -> Option<ServiceMetrics> {
        self.inner
            .metrics
            .read()
            .await
            .get(service_id)
            .map(MetricsTracker::snapshot)
    }

    pub async fn alerts(&self) -> Vec<HealthAlert> {
        self.inner.alerts.read().await.iter().cloned().collect()
    }

    /// Probes one service and records the outcome. Network failures become
    /// an `Unhealthy` status; only an unknown id is an error.
    pub async fn check_service_health(&self, service_id: &str) -> HarnessResult<HealthStatus> {
        let definition = self
            .inner
            .services
            .read()
            .await
            .get(service_id)
            .cloned()
            .ok_or_else(|| HarnessError::UnknownService(service_id.to_string()))?;

        let outcome = self.probe(&definition).await;
        let status = self.classify(&outcome);
        let health = HealthStatus {
            service_id: definition.id.clone(),
            status,
            message: outcome.message.clone(),
            timestamp: Utc::now(),
            response_time_ms: outcome.response_time_ms,
            metadata: serde_json::json!({
                "endpoint": outcome.endpoint,
                "http_status": outcome.http_status,
                "expected_response_time_ms": definition.expected_response_time_ms,
                "body": outcome.body,
            }),
        };

        let metrics = {
            let mut all = self.inner.metrics.write().await;
            let tracker = all.entry(definition.id.clone()).or_default();
            tracker.record(status.is_up(), outcome.response_time_ms);
            tracker.snapshot()
        };

        let previous = self
            .inner
            .statuses
            .write()
            .await
            .insert(definition.id.clone(), health.clone())
            .map(|h| h.status)
            .unwrap_or(ServiceStatus::Unknown);

        if previous != status {
            self.publish_change(previous, &health).await;
        }

        self.evaluate_alerts(&health, &metrics, previous).await;
        Ok(health)
    }

    /// Probes every registered service concurrently.
    pub async fn check_all_services(&self) -> Vec<HealthStatus> {
        let ids: Vec<String> = self.inner.services.read().await.keys().cloned().collect();
        let checks = ids.iter().map(|id| self.check_service_health(id));
        join_all(checks)
            .await
            .into_iter()
            .filter_map(Result::ok)
            .collect()
    }

    /// Polls until the service is up or `timeout` elapses.
    pub async fn wait_for_service(
        &self,
        service_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> HarnessResult<HealthStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let health = self.check_service_health(service_id).await?;
            if health.status.is_up() {
                return Ok(health);
            }
            if Instant::now() + poll_interval > deadline {
                return Err(HarnessError::ServiceStart {
                    service_id: service_id.to_string(),
                    reason: format!(
                        "not healthy after {}ms: {}",
                        timeout.as_millis(),
                        health.message
                    ),
                });
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    async fn probe(&self, definition: &ServiceDefinition) -> ProbeOutcome {
        match self.fetch_with_retry(&definition.endpoints.health, definition).await {
            Ok((code, elapsed, body)) if code.is_success() => ProbeOutcome {
                up: true,
                response_time_ms: Some(elapsed),
                message: self.describe_latency(definition, elapsed),
                endpoint: "health",
                http_status: Some(code.as_u16()),
                body,
            },
            Ok((code, _, _)) => {
                debug!(service_id = %definition.id, status = code.as_u16(), "health endpoint not ok, trying primary");
                self.probe_primary(definition, code.as_u16()).await
            }
            Err(e) => ProbeOutcome {
                up: false,
                response_time_ms: None,
                message: format!("Health check failed: {e}"),
                endpoint: "health",
                http_status: None,
                body: serde_json::Value::Null,
            },
        }
    }

    async fn probe_primary(&self, definition: &ServiceDefinition, health_code: u16) -> ProbeOutcome {
        let started = Instant::now();
        let result = self
            .inner
            .client
            .get(&definition.endpoints.primary)
            .timeout(definition.timeout())
            .send()
            .await;
        let elapsed = started.elapsed().as_millis() as u64;

        match result {
            Ok(resp) if resp.status().is_success() => ProbeOutcome {
                up: true,
                response_time_ms: Some(elapsed),
                message: format!(
                    "Health endpoint returned {health_code}, primary endpoint reachable"
                ),
                endpoint: "primary",
                http_status: Some(resp.status().as_u16()),
                body: serde_json::Value::Null,
            },
            Ok(resp) => ProbeOutcome {
                up: false,
                response_time_ms: Some(elapsed),
                message: format!(
                    "Health endpoint returned {health_code}, primary endpoint returned {}",
                    resp.status().as_u16()
                ),
                endpoint: "primary",
                http_status: Some(resp.status().as_u16()),
                body: serde_json::Value::Null,
            },
            Err(e) => ProbeOutcome {
                up: false,
                response_time_ms: None,
                message: format!("Health endpoint returned {health_code}, primary unreachable: {e}"),
                endpoint: "primary",
                http_status: None,
                body: serde_json::Value::Null,
            },
        }
    }

    /// GET with per-service timeout, retrying transport failures with
    /// `retry_base_delay * 2^attempt` backoff. HTTP error statuses are
    /// returned, not retried.
    async fn fetch_with_retry(
        &self,
        url: &str,
        definition: &ServiceDefinition,
    ) -> Result<(reqwest::StatusCode, u64, serde_json::Value), reqwest::Error> {
        let mut policy = RetryPolicy::new(RetryConfig {
            max_attempts: definition.retry_count + 1,
            backoff: BackoffStrategy::doubling(self.inner.config.retry_base_delay()),
        });
        let client = &self.inner.client;
        let timeout = definition.timeout();

        policy
            .execute(
                |_| async move {
                    let started = Instant::now();
                    let resp = client.get(url).timeout(timeout).send().await?;
                    let elapsed = started.elapsed().as_millis() as u64;
                    let code = resp.status();
                    let body = resp
                        .json::<serde_json::Value>()
                        .await
                        .unwrap_or(serde_json::Value::Null);
                    Ok::<_, reqwest::Error>((code, elapsed, body))
                },
                |_: &reqwest::Error| true,
            )
            .await
            .map_err(|e| e.into_inner())
    }

    fn describe_latency(&self, definition: &ServiceDefinition, elapsed: u64) -> String {
        let warning = self.inner.config.thresholds.response_time_warning_ms;
        if elapsed > warning {
            format!("Responding slowly ({elapsed}ms > {warning}ms)")
        } else if elapsed > definition.expected_response_time_ms {
            format!(
                "Healthy, slower than expected ({elapsed}ms > {}ms)",
                definition.expected_response_time_ms
            )
        } else {
            format!("Healthy ({elapsed}ms)")
        }
    }

    fn classify(&self, outcome: &ProbeOutcome) -> ServiceStatus {
        match (outcome.up, outcome.response_time_ms) {
            (false, _) => ServiceStatus::Unhealthy,
            (true, Some(rt)) if rt > self.inner.config.thresholds.response_time_warning_ms => {
                ServiceStatus::Degraded
            }
            (true, _) => ServiceStatus::Healthy,
        }
    }

    async fn publish_change(&self, previous: ServiceStatus, health: &HealthStatus) {
        let marker = match health.status {
            ServiceStatus::Healthy => "✅",
            ServiceStatus::Degraded => "⚠️",
            ServiceStatus::Unhealthy => "❌",
            ServiceStatus::Unknown => "❔",
        };
        info!(
            service_id = %health.service_id,
            from = %previous,
            to = %health.status,
            "{marker} Service status changed: {}",
            health.message
        );

        let update = HealthUpdate {
            service_id: health.service_id.clone(),
            previous,
            current: health.clone(),
        };
        self.push_update(update.clone()).await;

        let events = &self.inner.events;
        events.emit(MonitorEvent::StatusChanged(update)).await;
        if health.status == ServiceStatus::Unhealthy {
            events.emit(MonitorEvent::ServiceUnhealthy(health.clone())).await;
        } else if previous == ServiceStatus::Unhealthy && health.status.is_up() {
            events.emit(MonitorEvent::ServiceRecovered(health.clone())).await;
        }
    }

    async fn push_update(&self, update: HealthUpdate) {
        let mut subscribers = self.inner.subscribers.lock().await;
        subscribers.retain(|tx| match tx.try_send(update.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(service_id = %update.service_id, "health update dropped: consumer is behind");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    async fn evaluate_alerts(
        &self,
        health: &HealthStatus,
        metrics: &ServiceMetrics,
        previous: ServiceStatus,
    ) {
        let t = &self.inner.config.thresholds;
        let mut raised = Vec::new();

        if health.status == ServiceStatus::Unhealthy && previous != ServiceStatus::Unhealthy {
            raised.push((
                AlertSeverity::Critical,
                AlertKind::ServiceDown,
                format!("{} is down: {}", health.service_id, health.message),
                1.0,
                0.0,
            ));
        }

        if let Some(rt) = health.response_time_ms {
            let severity = if rt > t.response_time_critical_ms {
                Some((AlertSeverity::Critical, t.response_time_critical_ms))
            } else if rt > t.response_time_warning_ms {
                Some((AlertSeverity::Warning, t.response_time_warning_ms))
            } else {
                None
            };
            if let Some((severity, threshold)) = severity {
                raised.push((
                    severity,
                    AlertKind::ResponseTime,
                    format!("{} responded in {rt}ms (threshold {threshold}ms)", health.service_id),
                    rt as f64,
                    threshold as f64,
                ));
            }
        }

        let rate = metrics.error_rate;
        let severity = if rate > t.error_rate_critical {
            Some((AlertSeverity::Critical, t.error_rate_critical))
        } else if rate > t.error_rate_warning {
            Some((AlertSeverity::Warning, t.error_rate_warning))
        } else {
            None
        };
        if let Some((severity, threshold)) = severity {
            raised.push((
                severity,
                AlertKind::ErrorRate,
                format!(
                    "{} error rate {:.1}% (threshold {:.1}%)",
                    health.service_id,
                    rate * 100.0,
                    threshold * 100.0
                ),
                rate,
                threshold,
            ));
        }

        for (severity, kind, message, value, threshold) in raised {
            let alert = HealthAlert {
                id: Uuid::new_v4().to_string(),
                service_id: health.service_id.clone(),
                severity,
                kind,
                message,
                value,
                threshold,
                timestamp: Utc::now(),
            };
            self.dispatch_alert(alert).await;
        }
    }

    async fn dispatch_alert(&self, alert: HealthAlert) {
        match alert.severity {
            AlertSeverity::Critical => error!(service_id = %alert.service_id, kind = ?alert.kind, "🚨 {}", alert.message),
            AlertSeverity::Warning => warn!(service_id = %alert.service_id, kind = ?alert.kind, "⚠️ {}", alert.message),
        }

        {
            let mut alerts = self.inner.alerts.write().await;
            if alerts.len() >= self.inner.config.max_alerts.max(1) {
                alerts.pop_front();
            }
            alerts.push_back(alert.clone());
        }

        if let Some(url) = &self.inner.config.alert_webhook_url {
            let sent = self
                .inner
                .client
                .post(url)
                .timeout(Duration::from_secs(5))
                .json(&alert)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);
            if let Err(e) = sent {
                warn!(url = %url, error = %e, "alert webhook delivery failed");
            }
        }

        self.inner.events.emit(MonitorEvent::AlertRaised(alert)).await;
    }

    pub async fn is_monitoring(&self) -> bool {
        self.inner.monitoring.lock().await.is_some()
    }

    /// Starts one interval loop per registered service.
    pub async fn start_monitoring(&self) {
        let mut monitoring = self.inner.monitoring.lock().await;
        if monitoring.is_some() {
            warn!("Health monitoring is already running");
            return;
        }

        let token = CancellationToken::new();
        let services: Vec<ServiceDefinition> =
            self.inner.services.read().await.values().cloned().collect();
        let tasks = services
            .iter()
            .map(|def| self.spawn_poll_loop(def.clone(), token.clone()))
            .collect();
        *monitoring = Some(MonitoringState { token, tasks });
        drop(monitoring);

        info!(services = services.len(), "🔍 Health monitoring started");
        self.inner
            .events
            .emit(MonitorEvent::MonitoringStarted {
                services: services.len(),
            })
            .await;
    }

    fn spawn_poll_loop(&self, definition: ServiceDefinition, token: CancellationToken) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(definition.check_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                // An in-flight probe finishes even if monitoring stops meanwhile.
                if let Err(e) = monitor.check_service_health(&definition.id).await {
                    debug!(service_id = %definition.id, error = %e, "poll loop ending");
                    break;
                }
            }
        })
    }

    /// Stops the poll loops and ends every continuous-update stream.
    pub async fn stop_monitoring(&self) {
        let state = self.inner.monitoring.lock().await.take();
        self.inner.subscribers.lock().await.clear();

        if let Some(state) = state {
            state.token.cancel();
            debug!(tasks = state.tasks.len(), "poll loops cancelled");
            info!("Health monitoring stopped");
            self.inner.events.emit(MonitorEvent::MonitoringStopped).await;
        }
    }

    /// Starts monitoring if needed and returns a stream yielding one
    /// [`HealthUpdate`] per status change until monitoring stops.
    pub async fn monitor_continuous_health(&self) -> HealthUpdateStream {
        let (tx, rx) = mpsc::channel(self.inner.config.update_buffer.max(1));
        self.inner.subscribers.lock().await.push(tx);
        self.start_monitoring_if_idle().await;
        ReceiverStream::new(rx)
    }

    async fn start_monitoring_if_idle(&self) {
        if !self.is_monitoring().await {
            self.start_monitoring().await;
        }
    }

    pub async fn generate_health_report(&self) -> HealthReport {
        let mut services: Vec<HealthStatus> =
            self.inner.statuses.read().await.values().cloned().collect();
        services.sort_by(|a, b| a.service_id.cmp(&b.service_id));

        let metrics = self
            .inner
            .metrics
            .read()
            .await
            .iter()
            .map(|(id, t)| (id.clone(), t.snapshot()))
            .collect();

        let mut summary = HealthSummary {
            total: services.len(),
            ..HealthSummary::default()
        };
        for s in &services {
            match s.status {
                ServiceStatus::Healthy => summary.healthy += 1,
                ServiceStatus::Degraded => summary.degraded += 1,
                ServiceStatus::Unhealthy => summary.unhealthy += 1,
                ServiceStatus::Unknown => summary.unknown += 1,
            }
        }

        let overall = if summary.unhealthy > 0 {
            ServiceStatus::Unhealthy
        } else if summary.degraded > 0 {
            ServiceStatus::Degraded
        } else if summary.healthy > 0 {
            ServiceStatus::Healthy
        } else {
            ServiceStatus::Unknown
        };

        HealthReport {
            generated_at: Utc::now(),
            overall,
            recommendations: recommendations(&summary),
            services,
            metrics,
            summary,
            alerts: self.alerts().await,
        }
    }

    /// Stops monitoring and forgets every service, status, metric and alert.
    pub async fn clear(&self) {
        self.stop_monitoring().await;
        self.inner.services.write().await.clear();
        self.inner.statuses.write().await.clear();
        self.inner.metrics.write().await.clear();
        self.inner.alerts.write().await.clear();
    }
}

fn recommendations(summary: &HealthSummary) -> Vec<String> {
    let mut out = Vec::new();
    if summary.unhealthy > 0 {
        out.push(format!(
            "Immediate attention required: {} unhealthy service(s)",
            summary.unhealthy
        ));
    }
    if summary.degraded > 0 {
        out.push(format!(
            "Performance review recommended: {} degraded service(s)",
            summary.degraded
        ));
    }
    if summary.unknown > 0 {
        out.push(format!(
            "{} service(s) have not been checked yet",
            summary.unknown
        ));
    }
    if out.is_empty() {
        out.push("All services are operating normally".to_string());
    }
    out
}
