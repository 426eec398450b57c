use std::path::PathBuf;

use ldapsync::config::Configuration;
use ldapsync::{initialize_state, serve, telemetry};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // handle logs, traces and metrics.
    let endpoint = std::env::var(OTLP_ENDPOINT).ok();
    let otel_logs = match &endpoint {
        Some(endpoint) => {
            let provider = telemetry::setup_tracer(endpoint)?;
            opentelemetry::global::set_tracer_provider(provider);
            Some(telemetry::setup_logging(endpoint)?)
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(fmt::layer())
        .with(otel_logs)
        .init();

    let metrics = match telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(error = %err, "prometheus recorder not installed");
            None
        },
    };

    // read configuration file. let it in memory.
    let path = std::env::var("CONFIG_PATH").unwrap_or_default();
    let config = Configuration::default().path(PathBuf::from(path)).read()?;
    let port = config.port;

    let state = initialize_state(config, metrics).await?;

    serve(state, port).await
}
