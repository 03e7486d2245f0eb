use crate::config::Config;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Registry};

pub type ObservabilityError = Box<dyn std::error::Error + Send + Sync>;

pub struct ObservabilityGuard;

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        shutdown();
    }
}

pub fn init(config: &Config) -> Result<ObservabilityGuard, ObservabilityError> {
    init_tracing(config)?;
    init_metrics(config)?;
    Ok(ObservabilityGuard)
}

fn init_tracing(config: &Config) -> Result<(), ObservabilityError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_thread_ids(true)
        .with_target(true);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "notesync=info,sqlx=warn".into());

    // Optional OTLP layer for distributed tracing
    if let Some(endpoint) = &config.otel_exporter_endpoint {
        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(endpoint);

        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", config.service_name.clone()),
            ])))
            .install_batch(runtime::Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        Registry::default()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        Registry::default().with(env_filter).with(fmt_layer).try_init()?;
    }

    Ok(())
}

fn init_metrics(config: &Config) -> Result<(), ObservabilityError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()?;

    describe_metrics();
    tracing::info!(
        "Metrics exporter (Prometheus) started on port {}",
        config.metrics_port
    );
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!("sync_tasks_enqueued_total", "Tasks appended to a pending queue");
    metrics::describe_counter!("sync_tasks_succeeded_total", "Tasks whose handler reported success");
    metrics::describe_counter!("sync_tasks_retried_total", "Tasks parked in the delayed queue for a retry");
    metrics::describe_counter!("sync_tasks_failed_total", "Tasks moved to the failed queue");
    metrics::describe_counter!("sync_tasks_recovered_total", "Expired leases reclaimed by recovery");
    metrics::describe_counter!("sync_tasks_timed_out_total", "Handler invocations that overran the task timeout");
}

pub fn shutdown() {
    global::shutdown_tracer_provider();
}
