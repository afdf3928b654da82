//! Log subscriber setup and the JSON line format.
//!
//! ```json
//! {"ts":"2024-12-28T15:04:05.123Z","level":"info","type":"app","msg":"application built","ctx":{"service":"tokio_mvc"},"data":{"host":"localhost"}}
//! ```
//!
//! `type` is `access` for events with target `access`, `error` for ERROR
//! events and `app` otherwise. A `request_id` or `rid` field moves into `ctx`.

use serde_json::{json, Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber.
pub fn init(config: &LoggingConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter =
        EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("tokio_mvc=info"));

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(JsonFormatter::new(&config.service_name)),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
    }
}

/// One JSON object per event.
pub struct JsonFormatter {
    service_name: String,
}

impl JsonFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, level: Level, target: &str, fields: FieldVisitor) -> Value {
        let log_type = if target == "access" {
            "access"
        } else if level == Level::ERROR {
            "error"
        } else {
            "app"
        };

        let FieldVisitor {
            message,
            mut fields,
        } = fields;

        let mut ctx = Map::new();
        ctx.insert("service".into(), json!(self.service_name));
        if let Some(rid) = fields.remove("request_id").or_else(|| fields.remove("rid")) {
            ctx.insert("request_id".into(), rid);
        }

        json!({
            "ts": chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            "level": level_name(level),
            "type": log_type,
            "msg": message.unwrap_or_default(),
            "ctx": ctx,
            "data": fields,
        })
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::TRACE | Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

impl<S, N> FormatEvent<S, N> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let entry = self.entry(*meta.level(), meta.target(), visitor);
        writeln!(writer, "{}", entry)
    }
}

/// Collects event fields; `message` is kept apart.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let text = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(text);
        } else {
            self.insert(field, Value::String(text));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, json!(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, json!(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visitor(message: &str, fields: Value) -> FieldVisitor {
        FieldVisitor {
            message: Some(message.to_string()),
            fields: fields.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_entry_shape() {
        let formatter = JsonFormatter::new("svc");
        let entry = formatter.entry(
            Level::INFO,
            "tokio_mvc::app",
            visitor("application built", json!({"host": "localhost"})),
        );

        assert_eq!(entry["level"], "info");
        assert_eq!(entry["type"], "app");
        assert_eq!(entry["msg"], "application built");
        assert_eq!(entry["ctx"]["service"], "svc");
        assert_eq!(entry["data"]["host"], "localhost");
        let ts = entry["ts"].as_str().unwrap();
        assert!(ts.ends_with('Z') && ts.len() == 24, "{}", ts);
    }

    #[test]
    fn test_entry_types() {
        let formatter = JsonFormatter::new("svc");
        let access = formatter.entry(Level::INFO, "access", visitor("GET / 200", json!({})));
        assert_eq!(access["type"], "access");

        let error = formatter.entry(Level::ERROR, "tokio_mvc", visitor("boom", json!({})));
        assert_eq!(error["type"], "error");
        assert_eq!(error["level"], "error");

        let trace = formatter.entry(Level::TRACE, "tokio_mvc", visitor("t", json!({})));
        assert_eq!(trace["level"], "debug");
    }

    #[test]
    fn test_request_id_moves_to_ctx() {
        let formatter = JsonFormatter::new("svc");
        let entry = formatter.entry(
            Level::WARN,
            "tokio_mvc",
            visitor("CSRF token mismatch", json!({"rid": "abc", "key": "POST:/"})),
        );
        assert_eq!(entry["ctx"]["request_id"], "abc");
        assert!(entry["data"].get("rid").is_none());
        assert_eq!(entry["data"]["key"], "POST:/");
    }
}
