use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;
use comport_bus::{log_channel, MessageBus};
use comport_frame::timestamp_now;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> tracing::level_filters::LevelFilter {
        match self {
            LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
            LogLevel::Warn => tracing::level_filters::LevelFilter::WARN,
            LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
            LogLevel::Debug => tracing::level_filters::LevelFilter::DEBUG,
            LogLevel::Trace => tracing::level_filters::LevelFilter::TRACE,
        }
    }
}

/// Install the global subscriber: fmt output on stderr, plus the bus
/// mirror when one is given.
pub fn init_logging(format: LogFormat, level: LogLevel, bus_log: Option<BusLogLayer>) {
    let text = matches!(format, LogFormat::Text).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(false)
    });
    let json = matches!(format, LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(false)
    });

    let _ = tracing_subscriber::registry()
        .with(level.as_filter())
        .with(text)
        .with(json)
        .with(bus_log)
        .try_init();
}

thread_local! {
    static PUBLISHING: Cell<bool> = const { Cell::new(false) };
}

/// Publishes every event as a JSON record on the bus `log:<name>` channel.
///
/// Events raised by the bus itself are not mirrored, and neither is
/// anything logged while a record is being published.
pub struct BusLogLayer {
    bus: Arc<dyn MessageBus>,
    channel: String,
}

impl BusLogLayer {
    pub fn new(bus: Arc<dyn MessageBus>, name: &str) -> Self {
        Self {
            bus,
            channel: log_channel(name),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn record(event: &Event<'_>) -> Value {
        let meta = event.metadata();
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let mut record = Map::new();
        record.insert("timestamp".into(), Value::String(timestamp_now()));
        record.insert("level".into(), Value::String(meta.level().to_string()));
        record.insert("target".into(), Value::String(meta.target().to_string()));
        record.insert(
            "message".into(),
            Value::String(visitor.message.unwrap_or_default()),
        );
        if !visitor.fields.is_empty() {
            record.insert("fields".into(), Value::Object(visitor.fields));
        }
        Value::Object(record)
    }
}

impl<S: Subscriber> Layer<S> for BusLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target().starts_with("comport_bus") {
            return;
        }
        if PUBLISHING.with(|flag| flag.replace(true)) {
            return;
        }

        let record = Self::record(event);
        // A down bus must not take logging with it.
        let _ = self.bus.publish(&self.channel, &record.to_string());

        PUBLISHING.with(|flag| flag.set(false));
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl JsonVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(text) => text,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for JsonVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, Value::String(format!("{value:?}")));
    }
}

#[cfg(test)]
mod tests {
    use comport_bus::MemoryBus;
    use tracing::subscriber::with_default;

    use super::*;

    #[test]
    fn events_are_published_as_json() {
        let bus = Arc::new(MemoryBus::new());
        let layer = BusLogLayer::new(bus.clone(), "comport");
        assert_eq!(layer.channel(), "log:comport");

        let subscriber = tracing_subscriber::registry().with(layer);
        with_default(subscriber, || {
            tracing::warn!(device = "/dev/ttyS0", retries = 3u64, "device read failed");
        });

        let published = bus.published("log:comport");
        assert_eq!(published.len(), 1);
        let record: Value = serde_json::from_str(&published[0]).expect("record should be JSON");
        assert_eq!(record["level"], "WARN");
        assert_eq!(record["message"], "device read failed");
        assert_eq!(record["fields"]["device"], "/dev/ttyS0");
        assert_eq!(record["fields"]["retries"], 3);
        assert!(record["timestamp"].is_string());
    }

    #[test]
    fn offline_bus_is_ignored() {
        let bus = Arc::new(MemoryBus::new());
        bus.set_offline(true);
        let subscriber = tracing_subscriber::registry().with(BusLogLayer::new(bus.clone(), "x"));
        with_default(subscriber, || tracing::info!("still fine"));
        assert!(bus.published("log:x").is_empty());
    }

    #[test]
    fn bus_events_are_not_mirrored() {
        let bus = Arc::new(MemoryBus::new());
        let subscriber = tracing_subscriber::registry().with(BusLogLayer::new(bus.clone(), "x"));
        with_default(subscriber, || {
            tracing::debug!(target: "comport_bus::redis", "connected to redis");
        });
        assert!(bus.published("log:x").is_empty());
    }
}
