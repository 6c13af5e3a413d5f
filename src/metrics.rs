use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Outcome of the most recent call to an external capability.
#[derive(Debug, Default)]
pub struct CapabilityHealth {
    failing: AtomicBool,
    failures: AtomicU64,
}

impl CapabilityHealth {
    /// Record whether the latest call succeeded.
    pub fn record(&self, succeeded: bool) {
        self.failing.store(!succeeded, Ordering::Relaxed);
        if !succeeded {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// False once the latest call failed, until a later one succeeds.
    pub fn is_healthy(&self) -> bool {
        !self.failing.load(Ordering::Relaxed)
    }

    /// Failed calls since startup.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Thread-safe counters describing service activity since startup.
#[derive(Default)]
pub struct ServiceMetrics {
    syncs_completed: AtomicU64,
    documents_ingested: AtomicU64,
    chunks_embedded: AtomicU64,
    questions_answered: AtomicU64,
    feedback_analyzed: AtomicU64,
    degraded_analyses: AtomicU64,
    analyzer: CapabilityHealth,
}

impl ServiceMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished sync and how much work it did.
    pub fn record_sync(&self, documents_ingested: u64, chunks_embedded: u64) {
        self.syncs_completed.fetch_add(1, Ordering::Relaxed);
        self.documents_ingested
            .fetch_add(documents_ingested, Ordering::Relaxed);
        self.chunks_embedded
            .fetch_add(chunks_embedded, Ordering::Relaxed);
    }

    /// Record an answered question.
    pub fn record_answer(&self) {
        self.questions_answered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a feedback analysis, noting whether it ran degraded.
    pub fn record_feedback(&self, degraded: bool) {
        self.feedback_analyzed.fetch_add(1, Ordering::Relaxed);
        if degraded {
            self.degraded_analyses.fetch_add(1, Ordering::Relaxed);
        }
        self.analyzer.record(!degraded);
    }

    /// Whether the latest feedback analysis got a judgment from the analyzer.
    pub fn analyzer_healthy(&self) -> bool {
        self.analyzer.is_healthy()
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            syncs_completed: self.syncs_completed.load(Ordering::Relaxed),
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            chunks_embedded: self.chunks_embedded.load(Ordering::Relaxed),
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
            feedback_analyzed: self.feedback_analyzed.load(Ordering::Relaxed),
            degraded_analyses: self.degraded_analyses.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of the service counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Completed `sync` runs.
    pub syncs_completed: u64,
    /// Documents extracted and embedded (cache hits excluded).
    pub documents_ingested: u64,
    /// Chunks sent to the embedding capability.
    pub chunks_embedded: u64,
    /// Questions answered.
    pub questions_answered: u64,
    /// Feedback items analysed.
    pub feedback_analyzed: u64,
    /// Feedback analyses that fell back to the degraded path.
    pub degraded_analyses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_syncs_and_chunks() {
        let metrics = ServiceMetrics::new();
        metrics.record_sync(2, 7);
        metrics.record_sync(0, 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.syncs_completed, 2);
        assert_eq!(snapshot.documents_ingested, 2);
        assert_eq!(snapshot.chunks_embedded, 7);
    }

    #[test]
    fn degraded_analyses_are_counted_separately() {
        let metrics = ServiceMetrics::new();
        metrics.record_feedback(false);
        metrics.record_feedback(true);
        metrics.record_answer();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.feedback_analyzed, 2);
        assert_eq!(snapshot.degraded_analyses, 1);
        assert_eq!(snapshot.questions_answered, 1);
    }

    #[test]
    fn health_follows_the_latest_outcome() {
        let health = CapabilityHealth::default();
        assert!(health.is_healthy());
        health.record(false);
        assert!(!health.is_healthy());
        health.record(true);
        assert!(health.is_healthy());
        assert_eq!(health.failures(), 1);

        let metrics = ServiceMetrics::new();
        metrics.record_feedback(true);
        assert!(!metrics.analyzer_healthy());
        metrics.record_feedback(false);
        assert!(metrics.analyzer_healthy());
    }
}
