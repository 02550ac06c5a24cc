//! In-process metrics registry.
//!
//! Built once by the construction root and passed around as an `Arc`, in
//! keeping with the "no global mutable state" design constraint: nothing
//! in this crate exposes the encoded text over HTTP, that remains an
//! external collaborator's job.

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub retrieval_calls: IntCounterVec,
    pub retrieval_latency: Histogram,
    pub cache_hits: IntCounterVec,
    pub episodic_runs: IntCounterVec,
    pub episodic_groups_produced: IntCounterVec,
    pub optimizer_dropped: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let retrieval_calls = IntCounterVec::new(
            Opts::new("retrieval_calls_total", "Retrieval calls by outcome"),
            &["outcome"],
        )
        .expect("valid metric");
        let retrieval_latency = Histogram::with_opts(HistogramOpts::new(
            "retrieval_latency_seconds",
            "Hybrid retrieval latency",
        ))
        .expect("valid metric");
        let cache_hits = IntCounterVec::new(
            Opts::new("cache_hits_total", "Cache lookups by kind"),
            &["kind"],
        )
        .expect("valid metric");
        let episodic_runs = IntCounterVec::new(
            Opts::new("episodic_runs_total", "Episodic job runs by job and outcome"),
            &["job", "outcome"],
        )
        .expect("valid metric");
        let episodic_groups_produced = IntCounterVec::new(
            Opts::new("episodic_groups_produced_total", "Episode groups closed"),
            &["source_kind"],
        )
        .expect("valid metric");
        let optimizer_dropped = IntCounterVec::new(
            Opts::new("optimizer_dropped_total", "Candidates dropped per optimizer step"),
            &["step"],
        )
        .expect("valid metric");

        for m in [&retrieval_calls, &cache_hits, &episodic_runs, &episodic_groups_produced, &optimizer_dropped] {
            registry.register(Box::new(m.clone())).ok();
        }
        registry.register(Box::new(retrieval_latency.clone())).ok();

        Self {
            registry,
            retrieval_calls,
            retrieval_latency,
            cache_hits,
            episodic_runs,
            episodic_groups_produced,
            optimizer_dropped,
        }
    }

    /// Prometheus text exposition format; callers decide how (or whether) to serve it.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf).expect("encode metrics");
        String::from_utf8(buf).expect("prometheus text is utf8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_includes_registered_families() {
        let m = Metrics::new();
        m.retrieval_calls.with_label_values(&["hit"]).inc();
        let text = m.encode();
        assert!(text.contains("retrieval_calls_total"));
    }
}
