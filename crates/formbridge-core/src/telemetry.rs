use std::fmt as StdFmt;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use chrono::Utc;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::trace::{TraceContextExt, TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{BatchSpanProcessor, SdkTracerProvider};
use opentelemetry_sdk::{Resource, trace};
use serde_json::json;
use thiserror::Error;
use tracing::Subscriber;
use tracing_opentelemetry::{OpenTelemetrySpanExt, OtelData};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::{self, FmtContext};
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::reload;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{AppConfig, TelemetryConfig};

type OtelLayer = tracing_opentelemetry::OpenTelemetryLayer<Registry, trace::Tracer>;
type OtelReloadLayer = reload::Layer<Option<OtelLayer>, Registry>;
type TracedRegistry = Layered<OtelReloadLayer, Registry>;

/// Swaps the tracer on an already installed subscriber.
static OTEL_RELOAD: OnceLock<reload::Handle<Option<OtelLayer>, Registry>> = OnceLock::new();
/// Keeps the provider alive for the process lifetime so batched spans get flushed.
static PROCESS_PROVIDER: OnceLock<Mutex<Option<TelemetryGuard>>> = OnceLock::new();

/// Guard that owns the tracer provider so spans are flushed on drop.
#[derive(Clone)]
pub struct TelemetryGuard {
    provider: Option<Arc<SdkTracerProvider>>,
    shutdown_on_drop: bool,
}

impl TelemetryGuard {
    fn disabled() -> Self {
        Self {
            provider: None,
            shutdown_on_drop: false,
        }
    }

    pub fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if !self.shutdown_on_drop {
            return;
        }
        if let Some(provider) = self.provider.take() {
            if Arc::strong_count(&provider) == 1 {
                let _ = provider.shutdown();
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to set tracing subscriber: {0}")]
    SubscriberInit(String),
    #[error("failed to build OTLP exporter: {0}")]
    ExporterBuild(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn for_env(env: &str) -> Self {
        if env.eq_ignore_ascii_case("dev") {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        }
    }
}

/// Install the global subscriber: `RUST_LOG` filtering (default `info`), pretty
/// stderr output in dev, JSON lines elsewhere, plus OTLP export when configured.
/// Calling it again only swaps in a new tracer.
pub fn init_telemetry(
    app: &AppConfig,
    telemetry: &TelemetryConfig,
) -> Result<TelemetryGuard, TelemetryError> {
    let tracer_setup = build_tracer(app, telemetry)?;
    let (tracer, provider) = match tracer_setup {
        Some((tracer, provider)) => (Some(tracer), Some(provider)),
        None => (None, None),
    };

    if let Some(handle) = OTEL_RELOAD.get() {
        if let Some(tracer) = tracer {
            handle
                .modify(|layer| *layer = Some(tracing_opentelemetry::layer().with_tracer(tracer)))
                .map_err(|err| TelemetryError::SubscriberInit(err.to_string()))?;
        }
    } else {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("info"))
            .map_err(|err| TelemetryError::SubscriberInit(err.to_string()))?;

        match LogFormat::for_env(&app.env) {
            LogFormat::Json => {
                let fmt_layer = fmt::layer().event_format(JsonLineFormatter);
                install_subscriber(fmt_layer, env_filter, tracer)?;
            }
            LogFormat::Pretty => {
                let fmt_layer = fmt::layer()
                    .with_target(true)
                    .pretty()
                    .with_writer(std::io::stderr);
                install_subscriber(fmt_layer, env_filter, tracer)?;
            }
        }
    }

    Ok(provider.map(retain_provider).unwrap_or_else(TelemetryGuard::disabled))
}

fn build_tracer(
    app: &AppConfig,
    telemetry: &TelemetryConfig,
) -> Result<Option<(trace::Tracer, Arc<SdkTracerProvider>)>, TelemetryError> {
    if !telemetry.export_traces {
        return Ok(None);
    }
    let Some(endpoint) = telemetry
        .otlp_endpoint
        .as_deref()
        .filter(|endpoint| !endpoint.is_empty())
    else {
        return Ok(None);
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_timeout(Duration::from_secs(3))
        .with_endpoint(endpoint)
        .build()
        .map_err(|err| TelemetryError::ExporterBuild(err.to_string()))?;

    let resource = Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", app.service_name.clone()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("deployment.environment", app.env.clone()),
        ])
        .build();
    let provider = Arc::new(
        SdkTracerProvider::builder()
            .with_span_processor(BatchSpanProcessor::builder(exporter).build())
            .with_resource(resource)
            .build(),
    );

    global::set_tracer_provider(provider.as_ref().clone());
    global::set_text_map_propagator(opentelemetry_sdk::propagation::TraceContextPropagator::new());

    let tracer = provider.tracer(app.service_name.clone());
    Ok(Some((tracer, provider)))
}

fn retain_provider(provider: Arc<SdkTracerProvider>) -> TelemetryGuard {
    let slot = PROCESS_PROVIDER.get_or_init(|| Mutex::new(None));
    if let Ok(mut held) = slot.lock() {
        *held = Some(TelemetryGuard {
            provider: Some(provider.clone()),
            shutdown_on_drop: true,
        });
    }

    TelemetryGuard {
        provider: Some(provider),
        shutdown_on_drop: false,
    }
}

fn install_subscriber(
    fmt_layer: impl tracing_subscriber::Layer<TracedRegistry> + Send + Sync + 'static,
    env_filter: EnvFilter,
    tracer: Option<trace::Tracer>,
) -> Result<(), TelemetryError> {
    let (otel_layer, otel_reload): (OtelReloadLayer, _) =
        reload::Layer::new(tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer)));

    let subscriber = Registry::default()
        .with(otel_layer)
        .with(fmt_layer)
        .with(env_filter);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| TelemetryError::SubscriberInit(err.to_string()))?;
    let _ = OTEL_RELOAD.set(otel_reload);
    Ok(())
}

/// One JSON object per event, carrying the OpenTelemetry trace id when present.
struct JsonLineFormatter;

impl<S, N> FormatEvent<S, N> for JsonLineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> StdFmt::Result {
        let mut fields = FieldCollector::default();
        event.record(&mut fields);

        let current = ctx.lookup_current();
        let trace_id = current
            .as_ref()
            .and_then(|span| {
                span.extensions()
                    .get::<OtelData>()
                    .and_then(|data| data.trace_id())
            })
            .or_else(|| {
                let span_ctx = tracing::Span::current()
                    .context()
                    .span()
                    .span_context()
                    .clone();
                span_ctx.is_valid().then(|| span_ctx.trace_id())
            })
            .map(|id| id.to_string());

        let line = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": event.metadata().level().as_str().to_lowercase(),
            "target": event.metadata().target(),
            "span": current.map(|span| span.name().to_string()),
            "trace_id": trace_id,
            "fields": fields.0,
        });

        let serialized = serde_json::to_string(&line).map_err(|_| StdFmt::Error)?;
        writer.write_str(&serialized)?;
        writer.write_str("\n")
    }
}

#[derive(Default)]
struct FieldCollector(serde_json::Map<String, serde_json::Value>);

impl FieldCollector {
    fn put(&mut self, field: &tracing::field::Field, value: impl Into<serde_json::Value>) {
        self.0.insert(field.name().to_string(), value.into());
    }
}

impl tracing_subscriber::field::Visit for FieldCollector {
    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.put(field, value);
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.put(field, value);
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.put(field, value);
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.put(field, value);
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.put(field, value);
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn StdFmt::Debug) {
        self.put(field, format!("{value:?}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::io::{self, Write};

    static INIT_GUARD: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    #[derive(Clone)]
    struct BufferWriter {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.buf.lock().expect("lock buffer").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn captured_line(buffer: &Arc<Mutex<Vec<u8>>>) -> serde_json::Value {
        let output =
            String::from_utf8(buffer.lock().expect("lock buffer").clone()).expect("utf8 output");
        let line = output.lines().next().expect("log line");
        serde_json::from_str(line).expect("json line")
    }

    #[test]
    fn log_format_is_pretty_only_in_dev() {
        assert_eq!(LogFormat::for_env("dev"), LogFormat::Pretty);
        assert_eq!(LogFormat::for_env("DEV"), LogFormat::Pretty);
        assert_eq!(LogFormat::for_env("prod"), LogFormat::Json);
        assert_eq!(LogFormat::for_env("staging"), LogFormat::Json);
    }

    #[test]
    fn telemetry_init_is_idempotent_and_handles_missing_endpoint() {
        let _guard = INIT_GUARD.lock().expect("lock init");
        let app = AppConfig {
            service_name: "formbridge".into(),
            port: 0,
            env: "prod".into(),
            frontend_url: String::new(),
        };
        let telemetry = TelemetryConfig {
            otlp_endpoint: None,
            export_traces: true,
        };

        let guard = init_telemetry(&app, &telemetry).expect("initializes without endpoint");
        assert!(!guard.is_exporting());
        init_telemetry(&app, &telemetry).expect("second init is a no-op");
    }

    #[test]
    fn json_formatter_includes_trace_id_and_fields() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = {
            let buffer = buffer.clone();
            move || BufferWriter {
                buf: buffer.clone(),
            }
        };

        let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder().build();
        let tracer = provider.tracer("test");

        let subscriber = Registry::default()
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .with(
                fmt::layer()
                    .event_format(JsonLineFormatter)
                    .with_writer(writer),
            );

        let mut recorded_trace_id = None;
        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("submit_form");
            recorded_trace_id = Some(span.context().span().span_context().trace_id().to_string());

            let _entered = span.enter();
            tracing::info!(form_id = "form-1", hidden = 2, message = "validated");
        });

        let payload = captured_line(&buffer);
        assert_eq!(payload["level"], "info");
        assert_eq!(payload["span"], "submit_form");
        assert_eq!(payload["fields"]["form_id"], "form-1");
        assert_eq!(payload["fields"]["hidden"], 2);
        assert_eq!(payload["fields"]["message"], "validated");
        assert_eq!(
            payload["trace_id"],
            recorded_trace_id.expect("trace id recorded")
        );

        let ts = payload["timestamp"].as_str().expect("timestamp string");
        assert!(ts.contains('T'), "timestamp should be RFC3339, got {ts}");
    }

    #[test]
    fn json_formatter_without_span_emits_nulls() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let writer = {
            let buffer = buffer.clone();
            move || BufferWriter {
                buf: buffer.clone(),
            }
        };
        let subscriber = Registry::default().with(
            fmt::layer()
                .event_format(JsonLineFormatter)
                .with_writer(writer),
        );

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(ok = true, "bare event");
        });

        let payload = captured_line(&buffer);
        assert_eq!(payload["level"], "warn");
        assert!(payload["span"].is_null());
        assert!(payload["trace_id"].is_null());
        assert_eq!(payload["fields"]["ok"], true);
        assert_eq!(payload["fields"]["message"], "bare event");
    }
}
