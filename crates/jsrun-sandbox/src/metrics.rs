//! Prometheus metrics for the jsrun sandbox.
//!
//! This module is only compiled when the `metrics` feature is enabled.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use crate::report::OutcomeKind;

/// Label set for execution metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    /// `success`, `syntax_error`, `runtime_error`, `timeout` or `internal_error`.
    pub outcome: String,
}

/// Prometheus metrics for sandbox executions.
pub struct SandboxMetrics {
    /// Total number of executions by outcome.
    pub executions_total: Family<OutcomeLabels, Counter>,
    /// Execution duration in seconds.
    pub execution_duration_seconds: Histogram,
}

impl SandboxMetrics {
    /// Create the metrics and register them with `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let executions_total = Family::default();
        registry.register(
            "jsrun_executions",
            "Total sandbox executions by outcome",
            executions_total.clone(),
        );

        let execution_duration_seconds =
            Histogram::new([0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0].into_iter());
        registry.register(
            "jsrun_execution_duration_seconds",
            "Sandbox execution duration",
            execution_duration_seconds.clone(),
        );

        Self {
            executions_total,
            execution_duration_seconds,
        }
    }

    /// Record one finished execution.
    pub fn record(&self, kind: OutcomeKind, duration_secs: f64) {
        let labels = OutcomeLabels {
            outcome: kind.as_str().to_string(),
        };
        self.executions_total.get_or_create(&labels).inc();
        self.execution_duration_seconds.observe(duration_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    fn count(metrics: &SandboxMetrics, kind: OutcomeKind) -> u64 {
        metrics
            .executions_total
            .get_or_create(&OutcomeLabels {
                outcome: kind.as_str().into(),
            })
            .get()
    }

    #[test]
    fn counts_by_outcome() {
        let mut registry = Registry::default();
        let metrics = SandboxMetrics::new(&mut registry);
        metrics.record(OutcomeKind::Success, 0.01);
        metrics.record(OutcomeKind::Success, 0.02);
        metrics.record(OutcomeKind::Timeout, 5.0);

        assert_eq!(count(&metrics, OutcomeKind::Success), 2);
        assert_eq!(count(&metrics, OutcomeKind::Timeout), 1);
        assert_eq!(count(&metrics, OutcomeKind::SyntaxError), 0);
    }

    #[test]
    fn encodes_to_text() {
        let mut registry = Registry::default();
        let metrics = SandboxMetrics::new(&mut registry);
        metrics.record(OutcomeKind::RuntimeError, 0.5);

        let mut buf = String::new();
        encode(&mut buf, &registry).unwrap();
        assert!(buf.contains("jsrun_executions_total"), "{buf}");
        assert!(buf.contains("outcome=\"runtime_error\""), "{buf}");
        assert!(buf.contains("jsrun_execution_duration_seconds"), "{buf}");
    }

    #[test]
    fn metrics_are_shareable_across_threads() {
        let mut registry = Registry::default();
        let metrics = std::sync::Arc::new(SandboxMetrics::new(&mut registry));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = metrics.clone();
                std::thread::spawn(move || m.record(OutcomeKind::Success, 0.1))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(count(&metrics, OutcomeKind::Success), 4);
    }
}
