//! Log subscriber setup.  `RUST_LOG` filters (default `info`),
//! `TUYABRIDGE_LOG_FORMAT=json` switches to JSON lines, and
//! `OTEL_EXPORTER_OTLP_ENDPOINT` adds span export.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    fn from_setting(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Keeps the span exporter alive; flushed when dropped.
pub struct Telemetry {
    provider: Option<SdkTracerProvider>,
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[tuyabridge] span exporter shutdown: {e}");
        }
    }
}

pub fn init(service: &str) -> Telemetry {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = LogFormat::from_setting(std::env::var("TUYABRIDGE_LOG_FORMAT").ok().as_deref());
    let provider = span_provider(service, std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok());

    let spans = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("tuyabridge")));
    let subscriber = tracing_subscriber::registry().with(filter).with(spans);
    match format {
        LogFormat::Json => subscriber
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init(),
        LogFormat::Compact => subscriber
            .with(tracing_subscriber::fmt::layer().compact().with_target(true))
            .init(),
    }

    Telemetry { provider }
}

fn span_provider(service: &str, endpoint: Option<String>) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint?)
        .build()
        .map_err(|e| eprintln!("[tuyabridge] span export disabled: {e}"))
        .ok()?;

    // No runtime exists yet, so the exporter must not spawn tasks.
    Some(
        SdkTracerProvider::builder()
            .with_resource(Resource::builder().with_service_name(service.to_string()).build())
            .with_simple_exporter(exporter)
            .build(),
    )
}
