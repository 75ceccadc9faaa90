//! Prometheus metrics for the HTTP frontend.
//!
//! Registration happens exactly once per process; both the middleware and
//! the `/metrics` handler go through [`metrics`].

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

pub struct Metrics {
    registry: Registry,
    pub requests_total: IntCounterVec,
    pub request_duration: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// The process-wide metrics handle, registered on first use.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                "mcp_proxy_requests_total",
                "Total number of requests received",
            ),
            &["method", "endpoint", "status"],
        )
        .expect("valid counter opts");

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "mcp_proxy_request_duration_seconds",
                "Histogram of request durations",
            ),
            &["method", "endpoint"],
        )
        .expect("valid histogram opts");

        registry
            .register(Box::new(requests_total.clone()))
            .expect("register requests_total");
        registry
            .register(Box::new(request_duration.clone()))
            .expect("register request_duration");

        Metrics {
            registry,
            requests_total,
            request_duration,
        }
    })
}

/// Render the registry in the Prometheus text exposition format.
pub fn gather() -> String {
    let metric_families = metrics().registry.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("failed to encode metrics: {e}");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_idempotent_and_exposition_contains_counters() {
        metrics()
            .requests_total
            .with_label_values(&["GET", "/tools", "200"])
            .inc();
        metrics()
            .request_duration
            .with_label_values(&["GET", "/tools"])
            .observe(0.01);

        // A second call must hand back the same registry, not re-register.
        let text = gather();
        assert!(
            text.contains("mcp_proxy_requests_total"),
            "exposition missing counter: {text}"
        );
        assert!(
            text.contains("mcp_proxy_request_duration_seconds"),
            "exposition missing histogram: {text}"
        );
    }
}
