//! Prometheus metrics.
//!
//! Counters and histograms are updated inline by the engine; pool gauges are
//! refreshed at scrape time by the `/metrics` handler.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter, IntGauge,
    TextEncoder,
};

pub static REQUESTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "radix_serve_requests_total",
        "Total generation requests received"
    )
    .expect("register radix_serve_requests_total")
});

pub static REQUEST_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "radix_serve_request_failures_total",
        "Generation requests that failed in the compute stage"
    )
    .expect("register radix_serve_request_failures_total")
});

pub static TOKENS_SAVED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "radix_serve_tokens_saved_total",
        "Prompt tokens served from the prefix cache instead of recomputed"
    )
    .expect("register radix_serve_tokens_saved_total")
});

pub static REQUEST_LATENCY_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "radix_serve_request_latency_seconds",
        "End-to-end generation latency"
    )
    .expect("register radix_serve_request_latency_seconds")
});

pub static CACHE_FREE_BLOCKS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "radix_serve_cache_free_blocks",
        "Free blocks in the cache pool"
    )
    .expect("register radix_serve_cache_free_blocks")
});

pub static CACHE_TOTAL_BLOCKS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "radix_serve_cache_total_blocks",
        "Total blocks in the cache pool"
    )
    .expect("register radix_serve_cache_total_blocks")
});

/// Encode all registered metrics in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&prometheus::gather())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_registered_metrics() {
        REQUESTS_TOTAL.inc();
        CACHE_TOTAL_BLOCKS.set(1024);

        let body = render().unwrap();
        assert!(body.contains("radix_serve_requests_total"));
        assert!(body.contains("radix_serve_cache_total_blocks"));
    }
}
