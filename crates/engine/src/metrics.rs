use std::sync::atomic::{AtomicU64, Ordering};

/// Fire-and-forget hooks called by sessions.
///
/// Implementations must not block; the engine never reads anything back.
pub trait MetricsHooks: Send + Sync {
    /// A firing pass completed in `duration_ms`.
    fn record_evaluation_latency(&self, duration_ms: u64);

    /// A firing pass was abandoned after exceeding its bound.
    fn record_rule_timeout(&self);

    /// `count` spans were accepted into a session.
    fn record_spans_ingested(&self, count: u64);

    /// A cross-tenant access was refused.
    fn record_isolation_violation(&self);
}

/// Hooks that discard everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsHooks for NoopMetrics {
    fn record_evaluation_latency(&self, _duration_ms: u64) {}
    fn record_rule_timeout(&self) {}
    fn record_spans_ingested(&self, _count: u64) {}
    fn record_isolation_violation(&self) {}
}

/// Atomic counters implementing [`MetricsHooks`].
///
/// All counters use relaxed ordering. For a consistent point-in-time view,
/// call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Completed firing passes.
    pub evaluations: AtomicU64,
    /// Sum of completed pass latencies in milliseconds.
    pub evaluation_ms_total: AtomicU64,
    /// Slowest completed pass in milliseconds.
    pub evaluation_ms_max: AtomicU64,
    /// Abandoned firing passes.
    pub rule_timeouts: AtomicU64,
    /// Spans accepted into sessions.
    pub spans_ingested: AtomicU64,
    /// Refused cross-tenant accesses.
    pub isolation_violations: AtomicU64,
}

impl EngineMetrics {
    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            evaluations: self.evaluations.load(Ordering::Relaxed),
            evaluation_ms_total: self.evaluation_ms_total.load(Ordering::Relaxed),
            evaluation_ms_max: self.evaluation_ms_max.load(Ordering::Relaxed),
            rule_timeouts: self.rule_timeouts.load(Ordering::Relaxed),
            spans_ingested: self.spans_ingested.load(Ordering::Relaxed),
            isolation_violations: self.isolation_violations.load(Ordering::Relaxed),
        }
    }
}

impl MetricsHooks for EngineMetrics {
    fn record_evaluation_latency(&self, duration_ms: u64) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        self.evaluation_ms_total
            .fetch_add(duration_ms, Ordering::Relaxed);
        self.evaluation_ms_max
            .fetch_max(duration_ms, Ordering::Relaxed);
    }

    fn record_rule_timeout(&self) {
        self.rule_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_spans_ingested(&self, count: u64) {
        self.spans_ingested.fetch_add(count, Ordering::Relaxed);
    }

    fn record_isolation_violation(&self) {
        self.isolation_violations.fetch_add(1, Ordering::Relaxed);
    }
}

/// A plain data snapshot of [`EngineMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub evaluations: u64,
    pub evaluation_ms_total: u64,
    pub evaluation_ms_max: u64,
    pub rule_timeouts: u64,
    pub spans_ingested: u64,
    pub isolation_violations: u64,
}
