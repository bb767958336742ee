use lazy_static::lazy_static;
use prometheus::{
    Counter, Histogram, IntCounterVec, register_counter, register_histogram,
    register_int_counter_vec,
};

lazy_static! {
    pub static ref LEAD_REQUESTS_TOTAL: Counter =
        register_counter!("lead_requests_total", "Total number of lead endpoint requests").unwrap();
    pub static ref RATE_LIMITED_TOTAL: Counter =
        register_counter!("lead_rate_limited_total", "Requests rejected by the rate limiter").unwrap();
    pub static ref RATE_LIMIT_FAIL_OPEN_TOTAL: Counter = register_counter!(
        "lead_rate_limit_fail_open_total",
        "Requests admitted because the rate limiter store failed"
    )
    .unwrap();
    pub static ref SINK_RESULTS: IntCounterVec = register_int_counter_vec!(
        "lead_sink_results_total",
        "Fan-out outcomes per sink",
        &["sink", "status"]
    )
    .unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "lead_request_latency_seconds",
        "Lead request latency in seconds"
    )
    .unwrap();
    pub static ref FAN_OUT_LATENCY: Histogram = register_histogram!(
        "lead_fan_out_latency_seconds",
        "Time spent waiting for all sinks in seconds"
    )
    .unwrap();
}
