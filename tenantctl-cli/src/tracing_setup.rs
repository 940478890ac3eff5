//! Log output for the `tenantctl` binary.
//!
//! Events are written to stderr in compact form so stdout only carries
//! command output such as the stats JSON. `RUST_LOG` replaces the default
//! directives. Built with `telemetry`, `--otel` stacks an OTLP span exporter
//! on the same subscriber (`OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`).

use anyhow::{anyhow, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Targets that `--debug` raises to `debug`; dependencies stay at `info`.
const OWN_TARGETS: &[&str] = &["tenantctl", "tenantctl_core"];

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingConfig {
    pub debug: bool,
    pub otel: bool,
}

impl TracingConfig {
    fn directives(&self) -> String {
        let mut directives = String::from("info");
        if self.debug {
            for target in OWN_TARGETS {
                directives.push_str(&format!(",{target}=debug"));
            }
        }
        directives
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directives()))
    }
}

pub fn init(config: &TracingConfig) -> Result<()> {
    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.debug)
        .compact();
    let subscriber = tracing_subscriber::registry()
        .with(config.filter())
        .with(console);

    #[cfg(feature = "telemetry")]
    let (subscriber, otel_error) = {
        let (layer, error) = match config.otel {
            true => match otlp::layer() {
                Ok(layer) => (Some(layer), None),
                Err(e) => (None, Some(e)),
            },
            false => (None, None),
        };
        (subscriber.with(layer), error)
    };

    subscriber.try_init().map_err(|err| anyhow!(err))?;

    #[cfg(feature = "telemetry")]
    if let Some(e) = otel_error {
        tracing::warn!(error = %e, "OTLP export disabled");
    }
    #[cfg(not(feature = "telemetry"))]
    if config.otel {
        tracing::warn!("--otel ignored: built without the telemetry feature");
    }
    Ok(())
}

/// Flush spans still buffered for export.
pub fn shutdown_otel() {
    #[cfg(feature = "telemetry")]
    otlp::shutdown();
}

#[cfg(feature = "telemetry")]
mod otlp {
    use anyhow::{anyhow, Result};
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::{Tracer, TracerProvider};
    use tracing::Subscriber;
    use tracing_opentelemetry::OpenTelemetryLayer;
    use tracing_subscriber::registry::LookupSpan;

    const DEFAULT_ENDPOINT: &str = "http://localhost:4317";
    const DEFAULT_SERVICE: &str = "tenantctl";

    /// The provider is installed globally so [`shutdown`] can flush it.
    pub fn layer<S>() -> Result<OpenTelemetryLayer<S, Tracer>>
    where
        S: Subscriber + for<'span> LookupSpan<'span>,
    {
        let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        let service =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| DEFAULT_SERVICE.to_string());

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| anyhow!("failed to build OTLP exporter: {e}"))?;

        let provider = TracerProvider::builder()
            .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
            .with_resource(opentelemetry_sdk::Resource::new([KeyValue::new(
                "service.name",
                service,
            )]))
            .build();
        let tracer = provider.tracer(DEFAULT_SERVICE);
        let _ = opentelemetry::global::set_tracer_provider(provider);

        Ok(tracing_opentelemetry::layer().with_tracer(tracer))
    }

    pub fn shutdown() {
        opentelemetry::global::shutdown_tracer_provider();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_raises_only_own_targets() {
        let quiet = TracingConfig::default();
        assert_eq!(quiet.directives(), "info");

        let verbose = TracingConfig {
            debug: true,
            otel: false,
        };
        assert_eq!(
            verbose.directives(),
            "info,tenantctl=debug,tenantctl_core=debug"
        );
        assert!(verbose.directives().parse::<EnvFilter>().is_ok());
    }
}
