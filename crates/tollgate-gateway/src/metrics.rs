use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Gateway calls by how the pipeline ended
pub static CALLS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("tollgate_calls_total", "Gateway calls by outcome"),
        &["outcome"],
    )
    .unwrap()
});

// Payment gate
pub static PAYMENTS_VERIFIED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tollgate_payments_verified_total",
        "Payments confirmed by the facilitator",
    )
    .unwrap()
});

pub static PAYMENTS_REJECTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("tollgate_payments_rejected_total", "Rejected payment evidence"),
        &["stage"],
    )
    .unwrap()
});

pub static PROGRAMMATIC_PAYMENTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tollgate_programmatic_payments_total",
            "Pay-and-fetch calls by facilitator result",
        ),
        &["result"],
    )
    .unwrap()
});

// Forwarding
pub static PROXY_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("tollgate_proxy_latency_seconds", "Origin round-trip latency")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .unwrap()
});

pub static UPSTREAM_RESPONSES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("tollgate_upstream_responses_total", "Origin responses by status class"),
        &["class"],
    )
    .unwrap()
});

// Background writes
pub static MONETIZED_URLS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tollgate_monetized_url_writes_total",
            "Monetized URL materialization attempts",
        ),
        &["result"],
    )
    .unwrap()
});

pub static LEDGER_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("tollgate_ledger_failures_total", "Failed ledger writes"),
        &["kind"],
    )
    .unwrap()
});

pub static LEDGER_DROPPED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tollgate_ledger_dropped_total",
        "Ledger writes dropped because the queue was full",
    )
    .unwrap()
});

/// Status class label ("2xx", "4xx", ...) for a status code.
pub fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

/// Register all metrics with the registry
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(CALLS_TOTAL.clone()),
        Box::new(PAYMENTS_VERIFIED.clone()),
        Box::new(PAYMENTS_REJECTED.clone()),
        Box::new(PROGRAMMATIC_PAYMENTS.clone()),
        Box::new(PROXY_LATENCY.clone()),
        Box::new(UPSTREAM_RESPONSES.clone()),
        Box::new(MONETIZED_URLS.clone()),
        Box::new(LEDGER_FAILURES.clone()),
        Box::new(LEDGER_DROPPED.clone()),
    ];
    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            tracing::warn!(error = %e, "failed to register metric");
        }
    }
}
