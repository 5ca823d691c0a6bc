//! Prometheus metrics for the replication coordinator.
//!
//! All metrics live in a custom registry with the `quorus` prefix so the
//! crate never collides with an embedder using the default registry.
//! Registration failures fall back to unregistered no-op metrics instead
//! of panicking.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::warn;

/// Custom registry for all coordinator metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("quorus".to_string()), None).unwrap_or_else(|_| Registry::new())
});

fn register_counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)
        .expect("static metric definition is valid");
    if let Err(err) = REGISTRY.register(Box::new(counter.clone())) {
        warn!(metric = name, %err, "failed to register metric");
    }
    counter
}

fn register_counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("static metric definition is valid");
    if let Err(err) = REGISTRY.register(Box::new(counter.clone())) {
        warn!(metric = name, %err, "failed to register metric");
    }
    counter
}

fn register_histogram_vec(name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help), labels)
        .expect("static metric definition is valid");
    if let Err(err) = REGISTRY.register(Box::new(histogram.clone())) {
        warn!(metric = name, %err, "failed to register metric");
    }
    histogram
}

/// Replication requests broadcast by this node, per database.
pub static MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "messages_sent_total",
        "Replication requests broadcast by this node",
        &["database"],
    )
});

/// Inbound requests applied by the executor, per database and outcome.
pub static MESSAGES_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "messages_processed_total",
        "Inbound replication requests applied by the local executor",
        &["database", "outcome"],
    )
});

/// Responses that arrived after their pending request was gone.
pub static RESPONSES_DISCARDED: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "responses_discarded_total",
        "Responses received with no pending request registered",
    )
});

/// Undo-record replays performed at startup, per database.
pub static UNDO_RESTORES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_counter_vec(
        "undo_restores_total",
        "Inbound requests replayed from the undo record after a crash",
        &["database"],
    )
});

/// Duration of resync rounds, per database.
pub static RESYNC_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec(
        "resync_duration_seconds",
        "Wall-clock duration of periodic resync rounds",
        &["database"],
    )
});

/// Render every registered metric in the Prometheus text format.
pub fn gather() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!(%err, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
