//! Prometheus metrics, constructed and registered the way the teacher's
//! `Metrics` does: one `Registry`, a handful of `IntCounterVec`/`HistogramVec`
//! instruments built in `new()`, and small `observe_*` helpers callers use
//! instead of touching the vecs directly.

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder, Encoder};

pub struct Metrics {
    registry: Registry,
    pub oracle_calls: IntCounterVec,
    pub oracle_failures: IntCounterVec,
    pub matrix_violations: IntCounterVec,
    pub proposal_fallbacks: IntCounterVec,
    pub vote_fallbacks: IntCounterVec,
    pub tournament_evolutions: IntCounterVec,
    pub phase_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let oracle_calls = IntCounterVec::new(
            Opts::new("oracle_calls_total", "Agent Oracle calls by outcome"),
            &["outcome"],
        )
        .expect("metric construction");
        let oracle_failures = IntCounterVec::new(
            Opts::new("oracle_failures_total", "Agent Oracle failures by reason"),
            &["reason"],
        )
        .expect("metric construction");
        let matrix_violations = IntCounterVec::new(
            Opts::new("matrix_violations_total", "Matrix row validation failures by kind"),
            &["kind"],
        )
        .expect("metric construction");
        let proposal_fallbacks = IntCounterVec::new(
            Opts::new(
                "proposal_fallbacks_total",
                "Proposal rounds that fell back to the canonical default",
            ),
            &["reason"],
        )
        .expect("metric construction");
        let vote_fallbacks = IntCounterVec::new(
            Opts::new(
                "vote_fallbacks_total",
                "Vote rounds that fell back to the canonical default",
            ),
            &["reason"],
        )
        .expect("metric construction");
        let tournament_evolutions = IntCounterVec::new(
            Opts::new("tournament_evolutions_total", "Tournament evolution events by kind"),
            &["kind"],
        )
        .expect("metric construction");
        let phase_duration = HistogramVec::new(
            HistogramOpts::new("phase_duration_seconds", "Wall time spent in each phase"),
            &["phase"],
        )
        .expect("metric construction");

        for collector in [
            Box::new(oracle_calls.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(oracle_failures.clone()),
            Box::new(matrix_violations.clone()),
            Box::new(proposal_fallbacks.clone()),
            Box::new(vote_fallbacks.clone()),
            Box::new(tournament_evolutions.clone()),
            Box::new(phase_duration.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric registration");
        }

        Self {
            registry,
            oracle_calls,
            oracle_failures,
            matrix_violations,
            proposal_fallbacks,
            vote_fallbacks,
            tournament_evolutions,
            phase_duration,
        }
    }

    pub fn observe_oracle_call(&self, outcome: &str) {
        self.oracle_calls.with_label_values(&[outcome]).inc();
    }

    pub fn observe_oracle_failure(&self, reason: &str) {
        self.oracle_failures.with_label_values(&[reason]).inc();
    }

    pub fn observe_matrix_violation(&self, kind: &str) {
        self.matrix_violations.with_label_values(&[kind]).inc();
    }

    pub fn observe_proposal_fallback(&self, reason: &str) {
        self.proposal_fallbacks.with_label_values(&[reason]).inc();
    }

    pub fn observe_vote_fallback(&self, reason: &str) {
        self.vote_fallbacks.with_label_values(&[reason]).inc();
    }

    pub fn observe_evolution(&self, kind: &str) {
        self.tournament_evolutions.with_label_values(&[kind]).inc();
    }

    pub fn observe_phase_duration(&self, phase: &str, seconds: f64) {
        self.phase_duration.with_label_values(&[phase]).observe(seconds);
    }

    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf)?)
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
    fn render_includes_registered_metric_names() {
        let metrics = Metrics::new();
        metrics.observe_oracle_call("ok");
        let rendered = metrics.render().unwrap();
        assert!(rendered.contains("oracle_calls_total"));
    }
}
