use lazy_static::lazy_static;
use prometheus::{Counter, Histogram, register_counter, register_histogram};


lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("relay_requests_total", "Total number of inbound requests")
            .unwrap();
    pub static ref KEY_RATE_LIMITED: Counter =
        register_counter!("relay_key_rate_limited_total", "Requests refused because every API key was over quota")
            .unwrap();
    pub static ref PATH_FALLBACKS: Counter =
        register_counter!("relay_path_fallbacks_total", "Requests forwarded while every outbound path was over quota")
            .unwrap();
    pub static ref UPSTREAM_ERRORS: Counter =
        register_counter!("relay_upstream_errors_total", "Requests that failed to reach the upstream")
            .unwrap();
    pub static ref STREAM_COPY_FAILURES: Counter =
        register_counter!("relay_stream_copy_failures_total", "Responses truncated while streaming the upstream body")
            .unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "relay_request_latency_seconds",
        "Time until upstream response headers arrive"
    )
    .unwrap();
}
