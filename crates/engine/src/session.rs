//! Per-tenant working memory and bounded rule firing.
//!
//! A [`TenantSession`] owns one tenant's facts and dedup ledger behind a
//! single async mutex, so inserts and firing passes on the same session are
//! serialized while different sessions proceed independently. Firing runs
//! on the blocking thread pool under a semaphore shared by every session,
//! and is abandoned through a cancellation token once its wall-clock bound
//! elapses.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use tracewarden_core::{Span, TenantId};
use tracewarden_rules::{EvalError, TraceView};
use tracewarden_violations::{
    Emission, RuleMatch, Violation, ViolationEmitter, ViolationSink,
};

use crate::capability::ViolationCapability;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::facts::{FactSnapshot, FactStore, InsertOutcome};
use crate::metrics::MetricsHooks;
use crate::ruleset::RuleSet;

/// Where a session is in its firing cycle.
///
/// `Idle -> Firing -> Idle` on success, `Idle -> Firing -> TimedOut -> Idle`
/// when a pass is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Firing,
    TimedOut,
}

impl SessionPhase {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Firing => 1,
            Self::TimedOut => 2,
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Firing,
            2 => Self::TimedOut,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Firing => "firing",
            Self::TimedOut => "timed_out",
        })
    }
}

/// Outcome of one completed firing pass.
#[derive(Debug, Clone, Default)]
pub struct FiringResult {
    /// Newly emitted violations, ordered by rule id then trace id.
    pub violations: Vec<Violation>,
    /// Rule/trace pairs that matched, including suppressed ones.
    pub matched: usize,
    /// Matches suppressed by the dedup ledger.
    pub suppressed: usize,
    pub rules_evaluated: usize,
    pub traces_evaluated: usize,
    /// Violations the sink refused.
    pub publish_failures: usize,
    pub elapsed: Duration,
}

impl FiringResult {
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }
}

struct SessionState {
    facts: FactStore,
    emitter: ViolationEmitter,
}

/// What a firing pass hands back before anything is emitted.
struct PassOutput {
    matches: Vec<RuleMatch>,
    rules_evaluated: usize,
    traces_evaluated: usize,
}

/// One tenant's isolated evaluation scope.
pub struct TenantSession {
    tenant: TenantId,
    config: Arc<EngineConfig>,
    rules: RwLock<Arc<RuleSet>>,
    state: Mutex<SessionState>,
    phase: AtomicU8,
    pool: Arc<Semaphore>,
    sink: Option<Arc<dyn ViolationSink>>,
    metrics: Arc<dyn MetricsHooks>,
    timeouts: AtomicU64,
}

impl fmt::Debug for TenantSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantSession")
            .field("tenant", &self.tenant)
            .field("phase", &self.phase())
            .field("rules", &self.rules.read().len())
            .finish_non_exhaustive()
    }
}

impl TenantSession {
    /// Create an empty session bound to `tenant`.
    ///
    /// `pool` bounds how many firing passes run at once; it is normally
    /// shared by every session of an engine.
    pub fn new(
        tenant: TenantId,
        config: Arc<EngineConfig>,
        pool: Arc<Semaphore>,
        sink: Option<Arc<dyn ViolationSink>>,
        metrics: Arc<dyn MetricsHooks>,
    ) -> Self {
        let state = SessionState {
            facts: FactStore::new(tenant.clone(), config.facts.clone()),
            emitter: ViolationEmitter::new(tenant.clone(), config.dedup),
        };
        Self {
            tenant,
            config,
            rules: RwLock::new(Arc::new(RuleSet::default())),
            state: Mutex::new(state),
            phase: AtomicU8::new(SessionPhase::Idle.as_u8()),
            pool,
            sink,
            metrics,
            timeouts: AtomicU64::new(0),
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn phase(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.phase.store(phase.as_u8(), Ordering::Release);
    }

    /// Number of passes abandoned on this session.
    pub fn timeout_count(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// The active rule set.
    pub fn rules(&self) -> Arc<RuleSet> {
        Arc::clone(&self.rules.read())
    }

    /// Replace the active rule set. A pass already running finishes with
    /// the set it started with.
    pub fn deploy(&self, rules: RuleSet) {
        let mut current = self.rules.write();
        let next = rules.succeeding(&current);
        info!(
            tenant = %self.tenant,
            rules = next.len(),
            enabled = next.enabled().count(),
            version = %next.version(),
            "rule set deployed"
        );
        *current = Arc::new(next);
    }

    /// Number of facts held.
    pub async fn fact_count(&self) -> usize {
        self.state.lock().await.facts.len()
    }

    /// Drop every fact and forget every emitted dedup key.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.facts.clear();
        state.emitter.reset();
        info!(tenant = %self.tenant, "session cleared");
    }

    fn refuse(&self, err: EngineError) -> EngineError {
        if let EngineError::TenantIsolation(ref violation) = err {
            error!(
                tenant = %self.tenant,
                actual = %violation.actual,
                context = violation.context,
                "tenant isolation violation"
            );
            self.metrics.record_isolation_violation();
        }
        err
    }

    /// Add one fact. Does not fire rules.
    #[instrument(skip_all, fields(tenant = %self.tenant))]
    pub async fn insert(&self, span: Span) -> Result<InsertOutcome, EngineError> {
        let mut state = self.state.lock().await;
        let outcome = state.facts.insert(span).map_err(|e| self.refuse(e))?;
        if outcome == InsertOutcome::Inserted {
            self.metrics.record_spans_ingested(1);
        }
        Ok(outcome)
    }

    /// Add many facts, then fire once under the batch bound.
    ///
    /// If any span is refused nothing is inserted and nothing fires. A
    /// timeout keeps the inserted facts.
    #[instrument(skip_all, fields(tenant = %self.tenant, spans = spans.len()))]
    pub async fn insert_batch(&self, spans: Vec<Span>) -> Result<FiringResult, EngineError> {
        let mut state = self.state.lock().await;
        let inserted = state.facts.insert_all(spans).map_err(|e| self.refuse(e))?;
        self.metrics
            .record_spans_ingested(u64::try_from(inserted).unwrap_or(u64::MAX));
        debug!(tenant = %self.tenant, inserted, "batch inserted");
        self.fire_locked(&mut state, self.config.batch_timeout()).await
    }

    /// Evaluate every enabled rule against the current facts under the
    /// single-call bound.
    #[instrument(skip_all, fields(tenant = %self.tenant))]
    pub async fn fire_all(&self) -> Result<FiringResult, EngineError> {
        let mut state = self.state.lock().await;
        self.fire_locked(&mut state, self.config.fire_timeout()).await
    }

    async fn fire_locked(
        &self,
        state: &mut SessionState,
        limit: Duration,
    ) -> Result<FiringResult, EngineError> {
        let started = Instant::now();
        let rules = self.rules();
        let snapshot = state.facts.snapshot();
        let tenant = self.tenant.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let pool = Arc::clone(&self.pool);

        self.set_phase(SessionPhase::Firing);
        let pass = tokio::time::timeout(limit, async move {
            let permit = pool
                .acquire_owned()
                .await
                .map_err(|_| EngineError::Evaluation("worker pool is closed".into()))?;
            tokio::task::spawn_blocking(move || {
                // Held until the pass returns, even if the caller gave up.
                let _permit = permit;
                evaluate_pass(&tenant, &rules, &snapshot, &token)
            })
            .await
            .map_err(|e| EngineError::Evaluation(format!("firing task failed: {e}")))?
        })
        .await;

        let output = match pass {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                self.set_phase(SessionPhase::Idle);
                return Err(self.refuse(err));
            }
            Err(_elapsed) => {
                cancel.cancel();
                self.set_phase(SessionPhase::TimedOut);
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_rule_timeout();
                warn!(
                    tenant = %self.tenant,
                    limit_ms = limit.as_millis(),
                    "firing pass timed out and was abandoned"
                );
                self.set_phase(SessionPhase::Idle);
                return Err(EngineError::EvaluationTimeout {
                    tenant: self.tenant.clone(),
                    limit,
                });
            }
        };

        let mut result = FiringResult {
            matched: output.matches.len(),
            rules_evaluated: output.rules_evaluated,
            traces_evaluated: output.traces_evaluated,
            ..FiringResult::default()
        };
        self.emit_matches(&mut state.emitter, output.matches, &mut result)?;
        result.violations.sort_by(|a, b| {
            a.rule_id()
                .cmp(b.rule_id())
                .then_with(|| a.primary_trace_id().cmp(b.primary_trace_id()))
        });

        if let Some(sink) = &self.sink {
            for violation in &result.violations {
                if let Err(e) = sink.publish(violation.clone()).await {
                    warn!(
                        tenant = %self.tenant,
                        violation = violation.id(),
                        rule = %violation.rule_id(),
                        error = %e,
                        "violation sink rejected publish"
                    );
                    result.publish_failures += 1;
                }
            }
        }

        result.elapsed = started.elapsed();
        self.metrics
            .record_evaluation_latency(u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX));
        self.set_phase(SessionPhase::Idle);
        debug!(
            tenant = %self.tenant,
            emitted = result.violations.len(),
            suppressed = result.suppressed,
            elapsed_ms = result.elapsed.as_millis(),
            "firing pass complete"
        );
        Ok(result)
    }

    /// Turn a completed pass's matches into violations. A refused match
    /// ends the pass and returns the session to `Idle`.
    fn emit_matches(
        &self,
        emitter: &mut ViolationEmitter,
        matches: Vec<RuleMatch>,
        result: &mut FiringResult,
    ) -> Result<(), EngineError> {
        emitter.begin_batch();
        for m in matches {
            match emitter.emit(m) {
                Ok(Emission::Emitted(violation)) => result.violations.push(violation),
                Ok(Emission::Suppressed(_)) => result.suppressed += 1,
                Err(e) => {
                    self.set_phase(SessionPhase::Idle);
                    return Err(self.refuse(e.into()));
                }
            }
        }
        Ok(())
    }
}

/// Run every enabled rule over every trace in `snapshot`.
///
/// Matchers only see a [`TraceView`]; matches go through a capability bound
/// to `tenant`. A matcher failure skips that rule for that trace, while a
/// cancellation or isolation failure aborts the whole pass.
fn evaluate_pass(
    tenant: &TenantId,
    rules: &RuleSet,
    snapshot: &FactSnapshot,
    cancel: &CancellationToken,
) -> Result<PassOutput, EngineError> {
    let mut capability = ViolationCapability::new(tenant, snapshot.tenant())?;
    let enabled: Vec<_> = rules.enabled().collect();

    for (trace_id, spans) in snapshot.traces() {
        let view = TraceView::new(snapshot.tenant(), trace_id, spans);
        for rule in &enabled {
            if cancel.is_cancelled() {
                return Err(EngineError::Evaluation("firing pass cancelled".into()));
            }
            match rule.matcher().evaluate(&view, cancel) {
                Ok(Some(evidence)) => {
                    debug!(rule = %rule.id(), trace = %trace_id, "rule matched");
                    capability.emit(&view, &rule.definition().meta(), &evidence)?;
                }
                Ok(None) => {}
                Err(EvalError::Cancelled) => {
                    return Err(EngineError::Evaluation("firing pass cancelled".into()));
                }
                Err(e) => {
                    warn!(rule = %rule.id(), trace = %trace_id, error = %e, "rule skipped");
                }
            }
        }
    }

    Ok(PassOutput {
        matches: capability.into_matches(),
        rules_evaluated: enabled.len(),
        traces_evaluated: snapshot.trace_count(),
    })
}

#[cfg(test)]
mod tests {
    use tracewarden_rules::RuleDefinition;
    use tracewarden_violations::DedupWindow;
    use tracewarden_violations_memory::MemoryViolationSink;

    use super::*;
    use crate::metrics::{EngineMetrics, NoopMetrics};
    use crate::ruleset::RuleCompiler;

    fn session_with(
        config: EngineConfig,
        sink: Option<Arc<dyn ViolationSink>>,
        metrics: Arc<dyn MetricsHooks>,
    ) -> TenantSession {
        TenantSession::new(
            TenantId::new("acme"),
            Arc::new(config),
            Arc::new(Semaphore::new(2)),
            sink,
            metrics,
        )
    }

    fn session() -> TenantSession {
        session_with(EngineConfig::default(), None, Arc::new(NoopMetrics))
    }

    fn rules(exprs: &[(&str, &str)]) -> RuleSet {
        let defs = exprs
            .iter()
            .map(|(id, e)| RuleDefinition::new(*id, format!("rule {id}"), *e))
            .collect();
        RuleCompiler::default().compile_all(defs).unwrap().0
    }

    fn span(trace: &str, id: &str, op: &str) -> Span {
        Span::new("acme", trace, id, op, "payments")
    }

    #[test]
    fn phase_round_trips_through_u8() {
        for p in [SessionPhase::Idle, SessionPhase::Firing, SessionPhase::TimedOut] {
            assert_eq!(SessionPhase::from_u8(p.as_u8()), p);
        }
        assert_eq!(SessionPhase::TimedOut.to_string(), "timed_out");
    }

    #[test]
    fn refused_match_returns_session_to_idle() {
        let metrics = Arc::new(EngineMetrics::default());
        let s = session_with(EngineConfig::default(), None, metrics.clone());
        let mut emitter = ViolationEmitter::new(TenantId::new("acme"), DedupWindow::Session);
        let foreign = RuleMatch {
            tenant: TenantId::new("other"),
            rule: RuleDefinition::new("r1", "rule", "trace.has(a.b)").meta(),
            trace_id: "t1".into(),
            spans: Vec::new(),
        };

        s.set_phase(SessionPhase::Firing);
        let mut result = FiringResult::default();
        let err = s
            .emit_matches(&mut emitter, vec![foreign], &mut result)
            .unwrap_err();
        assert!(err.is_isolation_violation());
        assert_eq!(s.phase(), SessionPhase::Idle);
        assert!(result.violations.is_empty());
        assert_eq!(metrics.snapshot().isolation_violations, 1);
    }

    #[tokio::test]
    async fn insert_does_not_fire() {
        let sink = Arc::new(MemoryViolationSink::new());
        let s = session_with(
            EngineConfig::default(),
            Some(sink.clone()),
            Arc::new(NoopMetrics),
        );
        s.deploy(rules(&[("r1", "trace.has(payment.charge_card)")]));
        s.insert(span("t1", "s1", "payment.charge_card")).await.unwrap();
        assert_eq!(s.fact_count().await, 1);
        assert!(sink.is_empty());
        assert_eq!(s.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn fire_emits_and_publishes() {
        let sink = Arc::new(MemoryViolationSink::new());
        let metrics = Arc::new(EngineMetrics::default());
        let s = session_with(EngineConfig::default(), Some(sink.clone()), metrics.clone());
        s.deploy(rules(&[("r1", "trace.has(payment.charge_card)")]));
        s.insert(span("t1", "s1", "payment.charge_card")).await.unwrap();

        let result = s.fire_all().await.unwrap();
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.rules_evaluated, 1);
        assert_eq!(result.traces_evaluated, 1);
        assert_eq!(sink.len(), 1);

        let snap = metrics.snapshot();
        assert_eq!(snap.evaluations, 1);
        assert_eq!(snap.spans_ingested, 1);
    }

    #[tokio::test]
    async fn refire_without_new_facts_is_empty() {
        let s = session();
        s.deploy(rules(&[("r1", "trace.has(payment.charge_card)")]));
        s.insert(span("t1", "s1", "payment.charge_card")).await.unwrap();
        assert_eq!(s.fire_all().await.unwrap().violations.len(), 1);

        let second = s.fire_all().await.unwrap();
        assert!(second.is_empty());
        assert_eq!(second.matched, 1);
        assert_eq!(second.suppressed, 1);
    }

    #[tokio::test]
    async fn batch_window_re_emits_on_next_pass() {
        let s = session_with(
            EngineConfig::default().with_dedup(DedupWindow::Batch),
            None,
            Arc::new(NoopMetrics),
        );
        s.deploy(rules(&[("r1", "trace.has(payment.charge_card)")]));
        s.insert(span("t1", "s1", "payment.charge_card")).await.unwrap();
        assert_eq!(s.fire_all().await.unwrap().violations.len(), 1);
        assert_eq!(s.fire_all().await.unwrap().violations.len(), 1);
    }

    #[tokio::test]
    async fn clear_forgets_facts_and_ledger() {
        let s = session();
        s.deploy(rules(&[("r1", "trace.has(payment.charge_card)")]));
        s.insert(span("t1", "s1", "payment.charge_card")).await.unwrap();
        s.fire_all().await.unwrap();
        s.clear().await;
        assert_eq!(s.fact_count().await, 0);

        s.insert(span("t1", "s1", "payment.charge_card")).await.unwrap();
        assert_eq!(s.fire_all().await.unwrap().violations.len(), 1);
    }

    #[tokio::test]
    async fn disabled_rules_do_not_fire() {
        let s = session();
        let defs = vec![
            RuleDefinition::new("r1", "off", "trace.has(payment.charge_card)").with_enabled(false),
        ];
        s.deploy(RuleCompiler::default().compile_all(defs).unwrap().0);
        s.insert(span("t1", "s1", "payment.charge_card")).await.unwrap();
        let result = s.fire_all().await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.rules_evaluated, 0);
    }

    #[tokio::test]
    async fn foreign_span_is_refused_and_counted() {
        let metrics = Arc::new(EngineMetrics::default());
        let s = session_with(EngineConfig::default(), None, metrics.clone());
        let err = s
            .insert(Span::new("other", "t1", "s1", "payment.charge_card", "payments"))
            .await
            .unwrap_err();
        assert!(err.is_isolation_violation());
        assert_eq!(s.fact_count().await, 0);
        assert_eq!(metrics.snapshot().isolation_violations, 1);
    }

    #[tokio::test]
    async fn redeploy_swaps_rules() {
        let s = session();
        s.deploy(rules(&[("r1", "trace.has(payment.charge_card)")]));
        let first = s.rules().version().to_owned();
        s.deploy(rules(&[("r1", "trace.has(payment.refund)")]));
        assert_ne!(s.rules().version(), first);

        s.insert(span("t1", "s1", "payment.charge_card")).await.unwrap();
        assert!(s.fire_all().await.unwrap().is_empty());
    }
}
