//! Process entry point (SPEC_FULL.md section 1 AMBIENT process shape):
//! wires `tracing-subscriber` and OpenTelemetry, then hands off to
//! `run_from_env`, following `oxidicom`'s `main.rs` split between
//! tracing setup and `run_server_from_env`.

use opentelemetry::global;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let result = dicom_adapter::run_from_env().await;
    global::shutdown_tracer_provider();
    result
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    global::set_text_map_propagator(TraceContextPropagator::new());
    let exporter = opentelemetry_otlp::new_exporter().http().build_span_exporter()?;
    let provider = TracerProvider::builder()
        .with_simple_exporter(exporter)
        .build();
    global::set_tracer_provider(provider);
    Ok(())
}
