//! Tracing pipeline for the gateway binary.
//!
//! Everything except the log filter comes from the gateway [`Config`]:
//!
//! | Setting | Effect |
//! |---|---|
//! | `log_format` | `compact` console lines or newline-delimited `json`. |
//! | `otlp_endpoint` | OTLP/HTTP collector base URL.  Spans (the `dispatch_job` span among them) are exported only when set. |
//! | `RUST_LOG` env var | Log filter (default `"info"`). |
//!
//! Exported spans carry the gateway's robot endpoint, link mode and listen
//! port as resource attributes, so traces from several cells can be told
//! apart in one collector.

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, LogFormat};

/// Install the global subscriber for this gateway instance.
///
/// Hold the returned guard until the process exits; dropping it flushes
/// pending spans.
pub fn init_tracing(service_name: &str, cfg: &Config) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console: Box<dyn Layer<Registry> + Send + Sync> = match cfg.log_format {
        LogFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
    };

    let provider = build_provider(service_name, cfg);
    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("cellbridge")));

    tracing_subscriber::registry()
        .with(console)
        .with(otel)
        .with(env_filter)
        .init();

    TracerProviderGuard(provider)
}

/// Shuts the OTel [`SdkTracerProvider`] down on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[cellbridge] span export shutdown error: {e}");
        }
    }
}

/// Resource attributes identifying this gateway instance.
fn gateway_attributes(cfg: &Config) -> Vec<KeyValue> {
    vec![
        KeyValue::new("cellbridge.server_name", cfg.server_name.clone()),
        KeyValue::new("cellbridge.robot_url", cfg.robot_url.clone()),
        KeyValue::new("cellbridge.link_mode", cfg.link_mode.to_string()),
        KeyValue::new("cellbridge.listen_port", i64::from(cfg.listen_port)),
        KeyValue::new("cellbridge.simulated_robot", cfg.simulate_robot),
    ]
}

/// `None` without an `otlp_endpoint`, or when the exporter fails to build
/// (reported on stderr, since no subscriber exists yet).
fn build_provider(service_name: &str, cfg: &Config) -> Option<SdkTracerProvider> {
    let endpoint = cfg.otlp_endpoint.as_deref()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[cellbridge] OTLP exporter for {endpoint} failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .with_attributes(gateway_attributes(cfg))
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // No Tokio runtime exists yet, so the exporter must not spawn tasks.
            .with_simple_exporter(exporter)
            .build(),
    )
}
