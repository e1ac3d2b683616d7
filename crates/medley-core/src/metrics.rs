use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower::{Layer, Service};

struct Metrics {
    registry: Registry,
    medley_up: IntGaugeVec,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    like_cache_hits_total: IntCounterVec,
    like_cache_misses_total: IntCounterVec,
    like_cache_errors_total: IntCounterVec,
    export_publish_total: IntCounterVec,
}

pub const EXPORT_RESULT_SUCCESS: &str = "success";
pub const EXPORT_RESULT_ERROR: &str = "error";

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = Registry::new();

        let medley_up = IntGaugeVec::new(Opts::new("medley_up", "Service health"), &["service"])
            .expect("medley_up metric");

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP request count"),
            &["service", "route", "method", "status"],
        )
        .expect("http_requests_total metric");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["service", "route", "method", "status"],
        )
        .expect("http_request_duration_seconds metric");

        let like_cache_hits_total = IntCounterVec::new(
            Opts::new("like_cache_hits_total", "Like-count reads served from cache"),
            &["service"],
        )
        .expect("like_cache_hits_total metric");

        let like_cache_misses_total = IntCounterVec::new(
            Opts::new(
                "like_cache_misses_total",
                "Like-count reads that fell back to the database",
            ),
            &["service"],
        )
        .expect("like_cache_misses_total metric");

        let like_cache_errors_total = IntCounterVec::new(
            Opts::new(
                "like_cache_errors_total",
                "Cache transport failures absorbed by the fallback path",
            ),
            &["service"],
        )
        .expect("like_cache_errors_total metric");

        let export_publish_total = IntCounterVec::new(
            Opts::new("export_publish_total", "Export publish outcomes"),
            &["service", "result"],
        )
        .expect("export_publish_total metric");

        registry
            .register(Box::new(medley_up.clone()))
            .expect("register medley_up");
        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("register http_requests_total");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("register http_request_duration_seconds");
        registry
            .register(Box::new(like_cache_hits_total.clone()))
            .expect("register like_cache_hits_total");
        registry
            .register(Box::new(like_cache_misses_total.clone()))
            .expect("register like_cache_misses_total");
        registry
            .register(Box::new(like_cache_errors_total.clone()))
            .expect("register like_cache_errors_total");
        registry
            .register(Box::new(export_publish_total.clone()))
            .expect("register export_publish_total");

        Metrics {
            registry,
            medley_up,
            http_requests_total,
            http_request_duration_seconds,
            like_cache_hits_total,
            like_cache_misses_total,
            like_cache_errors_total,
            export_publish_total,
        }
    })
}

pub fn init(service_name: &'static str) {
    metrics()
        .medley_up
        .with_label_values(&[service_name])
        .set(1);
}

pub fn record_http_request(
    service_name: &'static str,
    method: &str,
    route: &str,
    status: u16,
    duration: Duration,
) {
    let status_str = status.to_string();
    let labels = &[service_name, route, method, status_str.as_str()];
    let metrics = metrics();
    metrics.http_requests_total.with_label_values(labels).inc();
    metrics
        .http_request_duration_seconds
        .with_label_values(labels)
        .observe(duration.as_secs_f64());
}

pub fn inc_like_cache_hit(service_name: &'static str) {
    metrics()
        .like_cache_hits_total
        .with_label_values(&[service_name])
        .inc();
}

pub fn inc_like_cache_miss(service_name: &'static str) {
    metrics()
        .like_cache_misses_total
        .with_label_values(&[service_name])
        .inc();
}

pub fn inc_like_cache_error(service_name: &'static str) {
    metrics()
        .like_cache_errors_total
        .with_label_values(&[service_name])
        .inc();
}

pub fn inc_export_publish(service_name: &'static str, result: &str) {
    metrics()
        .export_publish_total
        .with_label_values(&[service_name, result])
        .inc();
}

pub fn metrics_response(service_name: &'static str) -> impl IntoResponse {
    init(service_name);
    let metrics = metrics();
    let metric_families = metrics.registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            HeaderMap::new(),
            "failed to encode metrics".to_string(),
        );
    }

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        "text/plain; version=0.0.4".parse().unwrap(),
    );
    (
        StatusCode::OK,
        headers,
        String::from_utf8_lossy(&buffer).to_string(),
    )
}

#[derive(Clone)]
pub struct MetricsLayer {
    service_name: &'static str,
}

impl MetricsLayer {
    pub fn new(service_name: &'static str) -> Self {
        Self { service_name }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    service_name: &'static str,
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            service_name: self.service_name,
        }
    }
}

impl<S, ReqBody, ResBody> Service<axum::http::Request<ReqBody>> for MetricsService<S>
where
    S: Service<axum::http::Request<ReqBody>, Response = axum::response::Response<ResBody>>
        + Send
        + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = axum::response::Response<ResBody>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: axum::http::Request<ReqBody>) -> Self::Future {
        let service_name = self.service_name;
        let method = request.method().to_string();
        let route = request.uri().path().to_string();
        let start = Instant::now();
        let fut = self.inner.call(request);
        Box::pin(async move {
            match fut.await {
                Ok(response) => {
                    record_http_request(
                        service_name,
                        &method,
                        &route,
                        response.status().as_u16(),
                        start.elapsed(),
                    );
                    Ok(response)
                }
                Err(err) => {
                    record_http_request(service_name, &method, &route, 500, start.elapsed());
                    Err(err)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn metrics_response_sets_content_type() {
        let response = metrics_response("medley-test").into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get(header::CONTENT_TYPE).unwrap();
        assert_eq!(content_type, "text/plain; version=0.0.4");
    }

    #[test]
    fn cache_counters_increment() {
        inc_like_cache_hit("medley-test");
        inc_like_cache_miss("medley-test");
        inc_like_cache_error("medley-test");

        let hits = metrics()
            .like_cache_hits_total
            .with_label_values(&["medley-test"])
            .get();
        assert!(hits >= 1);
    }
}
