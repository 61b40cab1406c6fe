use tracing_subscriber::EnvFilter;

pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}

fn describe_metrics() {
    metrics::describe_counter!("lobx_orders_submitted_total", "ADD orders accepted past the intake guard");
    metrics::describe_counter!("lobx_orders_rejected_total", "Submits and cancels refused");
    metrics::describe_counter!("lobx_fills_total", "Individual match steps");
    metrics::describe_counter!("lobx_cancels_total", "Resting orders cancelled");
    metrics::describe_counter!("lobx_events_undelivered_total", "Match events parked after a failed publish");
    metrics::describe_counter!("lobx_events_dropped_total", "Parked match events dropped from a full buffer");
}

#[cfg(feature = "metrics-exporter")]
pub fn init_metrics(listen: &str) -> anyhow::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::net::SocketAddr;

    let addr: SocketAddr = listen.parse()?;
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    tracing::info!(%addr, "Prometheus exporter listening");
    metrics::gauge!("lobx_up").set(1.0);
    Ok(())
}

#[cfg(not(feature = "metrics-exporter"))]
pub fn init_metrics(_listen: &str) -> anyhow::Result<()> {
    describe_metrics();
    Ok(())
}
