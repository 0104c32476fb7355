use std::{sync::LazyLock, time::Instant};

use axum::{body::Body, extract::State, http::{Request, Response}, middleware::Next, routing::get, Router};
use prometheus::{proto::{Metric, MetricType}, register_histogram_vec, register_int_counter, register_int_counter_vec};

use crate::{api::errors::internal_and_log, ApiResult, AppState};

pub fn metrics_router(enabled: bool) -> Router<AppState> {
    if !enabled { return Router::new(); }
    tracing::info!("Metrics enabled! You can access them on /metrics");
    Router::new()
        .route("/metrics", get(metrics))
}

async fn metrics(State(state): State<AppState>) -> ApiResult<String> {
    let mut metric_families = prometheus::gather();

    // Add new custom metrics
    let clients = {
        let mut metric = prometheus::proto::Metric::default();
        metric.set_gauge(prometheus::proto::Gauge::default());
        metric.gauge.mut_or_insert_default().set_value(state.channel.client_count() as f64);
        create_mf("jobcast_clients_count".to_string(), "Number of connected WebSocket clients".to_string(), MetricType::GAUGE, metric)
    };

    metric_families.push(clients);

    prometheus::TextEncoder::new()
        .encode_to_string(&metric_families)
        .map_err(internal_and_log)
}

#[inline]
fn create_mf(name: String, help: String, field_type: MetricType, metric: Metric) -> prometheus::proto::MetricFamily {
    let mut mf = prometheus::proto::MetricFamily::default();
    mf.set_name(name);
    mf.set_help(help);
    mf.set_field_type(field_type);
    mf.mut_metric().push(metric);
    mf
}

pub async fn track_metrics(req: Request<Body>, next: Next) -> Response<Body> {
    let method = req.method().to_string();
    let route = http_route(&req).to_string();

    let start = Instant::now();

    // Call the next middleware or handler
    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();

    REQUESTS
        .with_label_values(&[method.as_str(), route.as_str(), response.status().as_str()])
        .observe(latency);

    response
}

// https://github.com/davidB/tracing-opentelemetry-instrumentation-sdk/blob/main/axum-tracing-opentelemetry/src/middleware/trace_extractor.rs#L177
#[inline]
fn http_route<B>(req: &Request<B>) -> &str {
    req.extensions()
        .get::<axum::extract::MatchedPath>()
        .map_or_else(|| "", |mp| mp.as_str())
}

pub static REQUESTS: LazyLock<prometheus::HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!("jobcast_requests_count", "Number of requests", &["method", "uri", "code"], vec![0.025, 0.250, 0.500]).expect("valid metric")
});

pub static FRAMES_SENT: LazyLock<prometheus::IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("jobcast_frames_sent", "Number of event frames handed to connections", &["kind"]).expect("valid metric")
});

pub static FRAMES_DROPPED: LazyLock<prometheus::IntCounter> = LazyLock::new(|| {
    register_int_counter!("jobcast_frames_dropped", "Number of frames dropped on full outbound queues").expect("valid metric")
});

pub static DECODE_ERRORS: LazyLock<prometheus::IntCounter> = LazyLock::new(|| {
    register_int_counter!("jobcast_decode_errors", "Number of malformed client messages").expect("valid metric")
});

pub static HEARTBEAT_EVICTIONS: LazyLock<prometheus::IntCounter> = LazyLock::new(|| {
    register_int_counter!("jobcast_heartbeat_evictions", "Number of connections terminated by the heartbeat").expect("valid metric")
});
