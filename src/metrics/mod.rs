use std::sync::Once;

use autometrics::prometheus_exporter;
use lazy_static::lazy_static;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::info;
use tracing::warn;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

#[cfg(test)]
mod metrics_test;

lazy_static! {
    pub static ref BUS_DROPPED_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("bus_dropped_events", "Events dropped on a full subscriber or publish buffer"),
        &["kind", "subscriber"]
    )
    .expect("metric can not be created");

    pub static ref GATEWAY_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("gateway_requests", "Control requests by kind and outcome"),
        &["kind", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref WORKER_RECONNECTS: IntCounterVec = IntCounterVec::new(
        Opts::new("worker_reconnects", "Upstream stream reopen attempts"),
        &["node_id", "stream"]
    )
    .expect("metric can not be created");

    pub static ref SUPERVISOR_RESTARTS: IntCounterVec = IntCounterVec::new(
        Opts::new("supervisor_restarts", "Service starts issued by the supervisor"),
        &["service_type"]
    )
    .expect("metric can not be created");

    pub static ref REBALANCE_ATTEMPTS: IntCounterVec = IntCounterVec::new(
        Opts::new("rebalance_attempts", "Finished rebalance attempts by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref SERVICE_STATUS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("service_status", "Current status of a supervised service (0 inactive .. 3 active)"),
        &["scope", "service_type"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

pub(crate) fn register_custom_metrics(registry: &Registry) {
    let collectors: [Box<dyn prometheus::core::Collector>; 6] = [
        Box::new(BUS_DROPPED_EVENTS.clone()),
        Box::new(GATEWAY_REQUESTS.clone()),
        Box::new(WORKER_RECONNECTS.clone()),
        Box::new(SUPERVISOR_RESTARTS.clone()),
        Box::new(REBALANCE_ATTEMPTS.clone()),
        Box::new(SERVICE_STATUS.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            warn!("collector can not be registered: {}", e);
        }
    }
}

/// Serves `/metrics` until `shutdown_signal` fires.
pub async fn start_server(
    port: u16,
    mut shutdown_signal: watch::Receiver<()>,
) {
    REGISTER.call_once(|| register_custom_metrics(&REGISTRY));

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    info!(port, "metrics endpoint listening");
    let (_, server) =
        warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            let _ = shutdown_signal.changed().await;
        });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(metrics_body())
}

/// Custom registry first, then the autometrics series.
pub fn metrics_body() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("could not encode custom metrics: {}", e);
    };
    let mut res = String::from_utf8(buffer).unwrap_or_else(|e| {
        warn!("custom metrics could not be from_utf8'd: {}", e);
        String::default()
    });

    res.push_str(&prometheus_exporter::encode_http_response().into_body());
    res
}
