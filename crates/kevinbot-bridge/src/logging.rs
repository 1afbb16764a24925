//! Tracing pipeline for the bridge process.
//!
//! Call [`init_tracing`] once at startup and keep the returned guard alive
//! until the process exits.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter; overrides `logging.level`. |
//! | `KEVINBOT_LOG_FORMAT` | `json` or `compact`; overrides `logging.format`. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL; enables span export over HTTP. |

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingConfig};

/// Environment variable selecting the log output format.
pub const LOG_FORMAT_VAR: &str = "KEVINBOT_LOG_FORMAT";

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `logging.level` and
/// `KEVINBOT_LOG_FORMAT` over `logging.format`. Spans from `#[instrument]`
/// (enable, disable, E-Stop, handshakes) are exported when an OTLP endpoint
/// is configured.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> TracerProviderGuard {
    let directive = filter_directive(std::env::var("RUST_LOG").ok(), &config.level);
    let env_filter = EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("[kevinbot] invalid log filter {directive:?} ({e}); using \"info\"");
        EnvFilter::new("info")
    });
    let format = output_format(std::env::var(LOG_FORMAT_VAR).ok().as_deref(), config.format);

    let provider = build_provider(service_name);
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("kevinbot")));
    let json_layer = (format == LogFormat::Json).then(|| tracing_subscriber::fmt::layer().json());
    let compact_layer = (format == LogFormat::Compact).then(|| tracing_subscriber::fmt::layer().compact());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(json_layer)
        .with(compact_layer)
        .init();

    TracerProviderGuard(provider)
}

/// A non-empty `RUST_LOG` wins over the configured level.
fn filter_directive(rust_log: Option<String>, configured: &str) -> String {
    match rust_log {
        Some(directive) if !directive.trim().is_empty() => directive,
        _ => configured.to_string(),
    }
}

/// Unknown `KEVINBOT_LOG_FORMAT` values fall back to the configured format.
fn output_format(env: Option<&str>, configured: LogFormat) -> LogFormat {
    env.and_then(|v| v.parse().ok()).unwrap_or(configured)
}

/// Shuts the span exporter down on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[kevinbot] OpenTelemetry provider shutdown error: {e}");
            }
        }
    }
}

/// `None` without `OTEL_EXPORTER_OTLP_ENDPOINT` or when the exporter cannot
/// be built.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[kevinbot] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder().with_service_name(service_name.to_string()).build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // The runtime is built after tracing, so no batch exporter.
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_endpoint_means_no_exporter() {
        // SAFETY: no other test in this crate reads this variable.
        unsafe { std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT") };
        assert!(build_provider("kevinbot-com").is_none());
    }

    #[test]
    fn empty_guard_drops_cleanly() {
        drop(TracerProviderGuard(None));
    }

    #[test]
    fn rust_log_overrides_configured_level() {
        assert_eq!(filter_directive(None, "debug"), "debug");
        assert_eq!(filter_directive(Some("kevinbot_bridge=trace".into()), "debug"), "kevinbot_bridge=trace");
        assert_eq!(filter_directive(Some("  ".into()), "warn"), "warn");
    }

    #[test]
    fn format_variable_overrides_configured_format() {
        assert_eq!(output_format(None, LogFormat::Json), LogFormat::Json);
        assert_eq!(output_format(Some("json"), LogFormat::Compact), LogFormat::Json);
        assert_eq!(output_format(Some("COMPACT"), LogFormat::Json), LogFormat::Compact);
        assert_eq!(output_format(Some("xml"), LogFormat::Json), LogFormat::Json);
    }
}
