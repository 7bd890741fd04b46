//! Tracing and OpenTelemetry pipeline for an ecubus node.
//!
//! [`TelemetrySettings`] collects everything the pipeline needs: the node's
//! identity and the switches read from the environment.
//! [`init_tracing`] installs the global subscriber from them.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `ECUBUS_LOG_FORMAT=json` | Newline-delimited JSON logs instead of compact lines. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector base URL.  Spans are exported only when set. |
//!
//! Exported spans carry the node name and the names of its ECUs as resource
//! attributes, so a collector fed by several nodes can tell them apart.
//!
//! ```rust,no_run
//! use ecubus_runtime::telemetry::{init_tracing, TelemetrySettings};
//!
//! let settings = TelemetrySettings::for_node("ecubus", "front-left", ["A", "B"]);
//! let _guard = init_tracing(&settings);
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FORMAT_VAR: &str = "ECUBUS_LOG_FORMAT";
pub const OTLP_ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
pub const LOG_FILTER_VAR: &str = "RUST_LOG";

/// Resource attribute holding the node name.
pub const NODE_ATTRIBUTE: &str = "ecubus.node";
/// Resource attribute holding the comma-separated ECU names.
pub const ECUS_ATTRIBUTE: &str = "ecubus.ecus";

const TRACER_NAME: &str = "ecubus";
const DEFAULT_FILTER: &str = "info";

/// Console log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Inputs to [`init_tracing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySettings {
    pub service_name: String,
    pub node_name: String,
    pub ecus: Vec<String>,
    pub format: LogFormat,
    pub filter: String,
    pub otlp_endpoint: Option<String>,
}

impl TelemetrySettings {
    /// Settings for a node, with switches read from the process environment.
    pub fn for_node<I, S>(service_name: &str, node_name: &str, ecus: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_lookup(service_name, node_name, ecus, |var| std::env::var(var).ok())
    }

    /// Like [`for_node`](Self::for_node) but with an explicit variable
    /// lookup.  Empty values count as unset.
    pub fn from_lookup<I, S, F>(service_name: &str, node_name: &str, ecus: I, lookup: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let format = match var(LOG_FORMAT_VAR).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };
        Self {
            service_name: service_name.to_string(),
            node_name: node_name.to_string(),
            ecus: ecus.into_iter().map(Into::into).collect(),
            format,
            filter: var(LOG_FILTER_VAR).unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            otlp_endpoint: var(OTLP_ENDPOINT_VAR),
        }
    }

    /// OTel resource describing this node.
    pub fn resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.service_name.clone())
            .with_attributes([
                KeyValue::new(NODE_ATTRIBUTE, self.node_name.clone()),
                KeyValue::new(ECUS_ATTRIBUTE, self.ecus.join(",")),
            ])
            .build()
    }
}

/// Install the global `tracing` subscriber.
///
/// Console output is always on.  An OTLP layer is added when the settings
/// carry an endpoint and the exporter can be built; otherwise the failure is
/// printed and the node logs to the console only.
///
/// Hold the returned guard for the life of the process.
pub fn init_tracing(settings: &TelemetrySettings) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_new(&settings.filter).unwrap_or_else(|e| {
        eprintln!("[ecubus] invalid log filter '{}': {e}", settings.filter);
        EnvFilter::new(DEFAULT_FILTER)
    });
    let provider = build_provider(settings);

    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer(TRACER_NAME)));
    let (json, compact) = match settings.format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Compact => (None, Some(tracing_subscriber::fmt::layer().compact())),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(json)
        .with(compact)
        .init();

    TracerProviderGuard(provider)
}

/// Shuts the OTel provider down on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// Whether spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[ecubus] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

fn build_provider(settings: &TelemetrySettings) -> Option<SdkTracerProvider> {
    let endpoint = settings.otlp_endpoint.clone()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[ecubus] OTLP exporter init failed: {e}"))
        .ok()?;

    Some(
        SdkTracerProvider::builder()
            .with_resource(settings.resource())
            // Runs before the node's Tokio runtime exists, so no batch task.
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use opentelemetry::Key;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> TelemetrySettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TelemetrySettings::from_lookup("ecubus", "front-left", ["A", "B"], |k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let s = settings(&[]);
        assert_eq!(s.format, LogFormat::Compact);
        assert_eq!(s.filter, "info");
        assert!(s.otlp_endpoint.is_none());
        assert!(build_provider(&s).is_none());
    }

    #[test]
    fn json_format_and_filter_come_from_variables() {
        let s = settings(&[(LOG_FORMAT_VAR, "json"), (LOG_FILTER_VAR, "ecubus=debug")]);
        assert_eq!(s.format, LogFormat::Json);
        assert_eq!(s.filter, "ecubus=debug");

        assert_eq!(settings(&[(LOG_FORMAT_VAR, "pretty")]).format, LogFormat::Compact);
    }

    #[test]
    fn empty_endpoint_disables_export() {
        let s = settings(&[(OTLP_ENDPOINT_VAR, "")]);
        assert!(s.otlp_endpoint.is_none());
    }

    #[test]
    fn resource_names_the_node_and_its_ecus() {
        let resource = settings(&[]).resource();
        assert_eq!(
            resource.get(&Key::new(NODE_ATTRIBUTE)),
            Some(opentelemetry::Value::from("front-left"))
        );
        assert_eq!(
            resource.get(&Key::new(ECUS_ATTRIBUTE)),
            Some(opentelemetry::Value::from("A,B"))
        );
        assert_eq!(
            resource.get(&Key::new("service.name")),
            Some(opentelemetry::Value::from("ecubus"))
        );
    }

    #[test]
    fn idle_guard_reports_no_export() {
        let guard = TracerProviderGuard(None);
        assert!(!guard.is_exporting());
    }
}
