//! Log output and span export for a scan-matcher process.
//!
//! [`init_tracing`] installs the global `tracing` subscriber from the
//! `[telemetry]` table of a [`ScanMatcherConfig`]: an `EnvFilter`, one
//! console formatter (compact or JSON) and, when an OTLP endpoint is
//! configured, an OpenTelemetry layer exporting spans over HTTP.
//!
//! Every reading handed to [`ScanMatcher::process`][crate::ScanMatcher::process]
//! runs inside a [`SCAN_MATCH_SPAN`] span carrying the sensor frame; the
//! cycle's [`CycleOutcome`][crate::CycleOutcome] label is recorded on it as
//! [`OUTCOME_FIELD`] once the cycle finishes.  Exported spans are tagged with
//! the configured frames and input kind as resource attributes.
//!
//! # Example
//!
//! ```rust,no_run
//! use scanmatch_runtime::ScanMatcherConfig;
//!
//! let config = ScanMatcherConfig::default();
//! // Hold the guard for the lifetime of the process.
//! let _guard = scanmatch_runtime::telemetry::init_tracing(&config);
//! ```

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, ScanMatcherConfig};

/// Span wrapping one scan-matching cycle.
pub const SCAN_MATCH_SPAN: &str = "scan_match";
/// Field of [`SCAN_MATCH_SPAN`] holding the cycle outcome.
pub const OUTCOME_FIELD: &str = "outcome";

const TRACER_NAME: &str = "scanmatch";
const OTLP_TRACES_PATH: &str = "/v1/traces";

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Install the global subscriber described by `config.telemetry`.
///
/// An invalid filter directive falls back to `info`.  If a global subscriber
/// is already installed the call leaves it in place.
///
/// The returned [`TracerProviderGuard`] **must** be held for the lifetime of
/// the process; dropping it flushes pending spans.
pub fn init_tracing(config: &ScanMatcherConfig) -> TracerProviderGuard {
    let telemetry = &config.telemetry;
    let env_filter = EnvFilter::try_new(&telemetry.log_filter).unwrap_or_else(|e| {
        eprintln!(
            "[scanmatch] invalid log filter {:?} ({e}); using \"info\"",
            telemetry.log_filter
        );
        EnvFilter::new("info")
    });

    let provider = telemetry
        .otlp_endpoint
        .as_deref()
        .and_then(|endpoint| build_provider(endpoint, resource(config)));

    let mut layers = Vec::new();
    if let Some(p) = &provider {
        layers.push(
            tracing_opentelemetry::layer()
                .with_tracer(p.tracer(TRACER_NAME))
                .boxed(),
        );
    }
    layers.push(match telemetry.log_format {
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    });

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
    {
        eprintln!("[scanmatch] tracing subscriber not installed: {e}");
    }

    TracerProviderGuard(provider)
}

// ─────────────────────────────────────────────────────────────────────────────
// RAII guard
// ─────────────────────────────────────────────────────────────────────────────

/// Shuts down the OTel [`SdkTracerProvider`] on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// `true` when spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[scanmatch] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

fn resource(config: &ScanMatcherConfig) -> Resource {
    Resource::builder()
        .with_service_name(config.telemetry.service_name.clone())
        .with_attributes([
            KeyValue::new("scanmatch.base_frame", config.base_frame.clone()),
            KeyValue::new("scanmatch.fixed_frame", config.fixed_frame.clone()),
            KeyValue::new("scanmatch.input", config.input_kind()),
        ])
        .build()
}

/// Collector base URL → traces URL.  An endpoint already naming the traces
/// path is used as is.
fn traces_endpoint(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with(OTLP_TRACES_PATH) {
        base.to_string()
    } else {
        format!("{base}{OTLP_TRACES_PATH}")
    }
}

/// Returns `None` when the exporter cannot be built; the error is printed
/// and the caller keeps console output only.
fn build_provider(endpoint: &str, resource: Resource) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(traces_endpoint(endpoint))
        .build()
        .map_err(|e| eprintln!("[scanmatch] OTLP exporter init failed: {e}"))
        .ok()?;

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // The pipeline runs on plain threads with no async runtime to
            // host a batch exporter.
            .with_simple_exporter(exporter)
            .build(),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traces_endpoint_appends_path_once() {
        assert_eq!(traces_endpoint("http://localhost:4318"), "http://localhost:4318/v1/traces");
        assert_eq!(traces_endpoint("http://localhost:4318/"), "http://localhost:4318/v1/traces");
        assert_eq!(
            traces_endpoint("http://collector/v1/traces"),
            "http://collector/v1/traces"
        );
    }

    #[test]
    fn resource_carries_frames_and_input_kind() {
        let config = ScanMatcherConfig {
            base_frame: "chassis".to_string(),
            use_cloud_input: true,
            ..ScanMatcherConfig::default()
        };
        let resource = resource(&config);
        let get = |key: &'static str| {
            resource
                .get(&opentelemetry::Key::from_static_str(key))
                .map(|v| v.to_string())
        };
        assert_eq!(get("service.name").as_deref(), Some("laser-scan-matcher"));
        assert_eq!(get("scanmatch.base_frame").as_deref(), Some("chassis"));
        assert_eq!(get("scanmatch.fixed_frame").as_deref(), Some("world"));
        assert_eq!(get("scanmatch.input").as_deref(), Some("cloud"));
    }

    #[test]
    fn tracer_provider_guard_drop_with_none_is_safe() {
        let guard = TracerProviderGuard(None);
        assert!(!guard.is_exporting());
        drop(guard);
    }

    #[test]
    fn init_without_endpoint_logs_to_console_only() {
        let mut config = ScanMatcherConfig::default();
        config.telemetry.log_format = LogFormat::Json;
        config.telemetry.log_filter = "not a [valid filter".to_string();
        let guard = init_tracing(&config);
        assert!(!guard.is_exporting());
        tracing::info!(service = %config.telemetry.service_name, "subscriber installed");

        // A second install keeps the first subscriber.
        drop(init_tracing(&config));
    }
}
