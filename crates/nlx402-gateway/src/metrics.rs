use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use std::sync::{LazyLock, Once};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Quote counters
pub static QUOTES_ISSUED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("nlx402_quotes_issued_total", "Quotes issued per tier"),
        &["query_count"],
    )
    .expect("valid metric definition")
});

// Unlock counters
pub static UNLOCKS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("nlx402_unlocks_total", "Unlock attempts by result"),
        &["result"],
    )
    .expect("valid metric definition")
});

pub static UNLOCK_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "nlx402_unlock_latency_seconds",
            "Unlock latency including finality wait",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 45.0, 60.0]),
    )
    .expect("valid metric definition")
});

// Gate counters
pub static GATE_DECISIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("nlx402_gate_decisions_total", "Metered call admissions by result"),
        &["result"],
    )
    .expect("valid metric definition")
});

// Upstream metrics
pub static UPSTREAM_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("nlx402_upstream_latency_seconds", "Upstream RPC latency")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .expect("valid metric definition")
});

static REGISTER: Once = Once::new();

/// Register all metrics with the registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(QUOTES_ISSUED.clone()),
            Box::new(UNLOCKS_TOTAL.clone()),
            Box::new(UNLOCK_LATENCY.clone()),
            Box::new(GATE_DECISIONS.clone()),
            Box::new(UPSTREAM_LATENCY.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::error!(error = %e, "failed to register metric");
            }
        }
    });
}
