use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, Write};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

/// One JSON log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredLogEntry {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Layer writing every event as a single JSON object on stdout.
pub struct JsonFormatter;

impl<S> Layer<S> for JsonFormatter
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let duration_ms = visitor.fields.get("duration_ms").and_then(Value::as_u64);
        let entry = StructuredLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: level_name(event.metadata().level()).to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
            duration_ms,
        };

        if let Ok(json) = serde_json::to_string(&entry) {
            let _ = writeln!(io::stdout(), "{}", json);
        }
    }
}

fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARN",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: HashMap<String, Value>,
}

impl JsonVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.insert(field, Value::String(format!("{:?}", value)));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.insert(field, Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level used when `RUST_LOG` is not set
    pub level: Level,
    pub json_output: bool,
    pub color_output: bool,
    pub include_line_numbers: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_output: false,
            color_output: true,
            include_line_numbers: cfg!(debug_assertions),
        }
    }
}

impl LoggingConfig {
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            ..Self::default()
        }
    }
}

/// Installs the global subscriber. A second call is a no-op, which keeps
/// test binaries that initialise logging from several tests happy.
pub fn init_structured_logging(config: LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let installed = if config.json_output {
        let subscriber = Registry::default().with(env_filter).with(JsonFormatter);
        tracing::subscriber::set_global_default(subscriber).is_ok()
    } else {
        let fmt_layer = fmt::layer()
            .compact()
            .with_target(true)
            .with_line_number(config.include_line_numbers)
            .with_ansi(config.color_output);
        let subscriber = Registry::default().with(env_filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber).is_ok()
    };

    if !installed {
        tracing::debug!("global subscriber already installed");
    }
    Ok(())
}

/// Measures an operation and logs its duration on completion.
pub struct OperationTimer {
    start: std::time::Instant,
    operation_name: String,
}

impl OperationTimer {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            start: std::time::Instant::now(),
            operation_name: operation_name.into(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn finish_with_result<T, E: std::fmt::Display>(self, result: &Result<T, E>) -> u64 {
        let duration_ms = self.elapsed_ms();
        match result {
            Ok(_) => tracing::info!(
                operation = %self.operation_name,
                duration_ms,
                success = true,
                "Operation completed"
            ),
            Err(e) => tracing::error!(
                operation = %self.operation_name,
                duration_ms,
                success = false,
                error = %e,
                "Operation failed"
            ),
        }
        duration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_flattens_fields() {
        let mut fields = HashMap::new();
        fields.insert("service_id".to_string(), Value::String("api".into()));
        let entry = StructuredLogEntry {
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            level: "INFO".to_string(),
            target: "harness::health".to_string(),
            message: "probe finished".to_string(),
            fields,
            duration_ms: Some(12),
        };

        let json: Value = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["service_id"], "api");
        assert_eq!(json["duration_ms"], 12);
        assert_eq!(json["level"], "INFO");
    }

    #[test]
    fn init_twice_is_harmless() {
        assert!(init_structured_logging(LoggingConfig::default()).is_ok());
        assert!(init_structured_logging(LoggingConfig::verbose()).is_ok());
    }

    #[test]
    fn timer_reports_duration() {
        let timer = OperationTimer::new("unit");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let ok: Result<(), String> = Ok(());
        assert!(timer.finish_with_result(&ok) >= 5);
    }
}
