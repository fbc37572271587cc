//! Tracing subscriber setup, with optional OpenTelemetry export.
//!
//! The server installs a registry combining an `EnvFilter`, the `fmt` layer
//! and, when enabled, an OpenTelemetry layer backed by an OTLP exporter.
//! Security events use the `security` target, so
//! `RUST_LOG=info,security=warn` style filters apply to them independently.

use std::time::Duration;

use opentelemetry::trace::{TraceError, TracerProvider};
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{BatchSpanProcessor, Sampler, SdkTracerProvider};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{OtlpProtocol, TelemetryConfig};

/// Keeps the tracer provider alive. Call [`TelemetryGuard::shutdown`] to
/// flush pending spans; dropping it does nothing.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    pub fn shutdown(mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            warn!(error = %e, "OpenTelemetry tracer provider shutdown failed");
        }
    }
}

/// Plain `fmt` logging for one-shot CLI subcommands.
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .init();
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber for the server.
///
/// An exporter that fails to build is logged and the server continues with
/// `fmt` output only.
pub fn init(config: &TelemetryConfig) -> TelemetryGuard {
    let provider = if config.enabled {
        match build_exporter(config) {
            Ok(exporter) => Some(build_provider(config, exporter)),
            Err(e) => {
                install(None);
                error!(
                    error = %e,
                    endpoint = %config.endpoint,
                    protocol = %config.protocol,
                    "failed to build OTLP exporter, falling back to fmt-only tracing"
                );
                return TelemetryGuard { provider: None };
            }
        }
    } else {
        None
    };

    install(provider.as_ref());
    if provider.is_some() {
        info!(
            endpoint = %config.endpoint,
            protocol = %config.protocol,
            sample_ratio = config.sample_ratio,
            "OpenTelemetry tracing enabled"
        );
    }
    TelemetryGuard { provider }
}

fn install(provider: Option<&SdkTracerProvider>) {
    let otel_layer = provider.map(|p| {
        global::set_tracer_provider(p.clone());
        tracing_opentelemetry::layer().with_tracer(p.tracer("strongbox"))
    });

    tracing_subscriber::registry()
        .with(default_filter())
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .init();
}

fn build_provider(config: &TelemetryConfig, exporter: SpanExporter) -> SdkTracerProvider {
    SdkTracerProvider::builder()
        .with_span_processor(BatchSpanProcessor::builder(exporter).build())
        .with_sampler(sampler(config.sample_ratio))
        .with_resource(resource(config))
        .build()
}

fn sampler(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

fn resource(config: &TelemetryConfig) -> Resource {
    let mut attributes = vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("process.pid", i64::from(std::process::id())),
    ];
    if let Ok(host) = std::env::var("HOSTNAME") {
        attributes.push(KeyValue::new("host.name", host));
    }
    attributes.extend(
        config
            .resource_attributes
            .iter()
            .map(|(k, v)| KeyValue::new(k.clone(), v.clone())),
    );
    Resource::builder().with_attributes(attributes).build()
}

fn build_exporter(config: &TelemetryConfig) -> Result<SpanExporter, TraceError> {
    let timeout = Duration::from_secs(config.timeout_seconds);
    match config.protocol {
        OtlpProtocol::Http => SpanExporter::builder()
            .with_http()
            .with_endpoint(&config.endpoint)
            .with_timeout(timeout)
            .build(),
        OtlpProtocol::Grpc => SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&config.endpoint)
            .with_timeout(timeout)
            .build(),
    }
}
