//! Tracing/OpenTelemetry bootstrap, lifted from the teacher's
//! `setup_tracing` in `crates/teacher_gateway/src/main.rs` and
//! parameterized by service name instead of being hardcoded to
//! `"s3s_rados"`.

use std::io::IsTerminal;
use std::time::Duration;

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{self, RandomIdGenerator, Sampler};
use opentelemetry_sdk::Resource;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub fn init(service_name: &str, otlp_endpoint: Option<&str>) -> anyhow::Result<()> {
    let Some(endpoint) = otlp_endpoint else {
        let env_filter = EnvFilter::from_default_env();
        let enable_color = std::io::stdout().is_terminal();
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter)
            .with_ansi(enable_color)
            .init();
        return Ok(());
    };

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_timeout(Duration::from_secs(3)),
        )
        .with_trace_config(
            trace::config()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_max_events_per_span(64)
                .with_max_attributes_per_span(16)
                .with_resource(Resource::new(vec![KeyValue::new("service.name", service_name.to_string())])),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    let fmt_layer = tracing_subscriber::fmt::layer();
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    tracing_subscriber::Registry::default()
        .with(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(())
}
