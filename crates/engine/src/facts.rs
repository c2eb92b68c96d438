//! Working memory for one tenant session.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracewarden_core::{Span, SpanId, TenantId, TenantIsolationError, TraceId};

use crate::config::{FactLimits, within};
use crate::error::EngineError;

/// Whether an insert added a new fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A span with the same trace and span id is already present; the first
    /// copy is kept.
    Duplicate,
}

#[derive(Debug, Default)]
struct TraceFacts {
    spans: Vec<Arc<Span>>,
    ids: HashSet<SpanId>,
}

/// Append-only span facts grouped by trace.
///
/// Facts are never mutated once inserted. Rule evaluation works on a
/// [`FactSnapshot`] so the store can keep accepting inserts between passes.
#[derive(Debug)]
pub struct FactStore {
    tenant: TenantId,
    limits: FactLimits,
    traces: HashMap<TraceId, TraceFacts>,
    len: usize,
}

impl FactStore {
    pub fn new(tenant: TenantId, limits: FactLimits) -> Self {
        Self {
            tenant,
            limits,
            traces: HashMap::new(),
            len: 0,
        }
    }

    /// Check that `span` belongs to this store's tenant and fits the
    /// per-span limits.
    pub fn admit(&self, span: &Span) -> Result<(), EngineError> {
        TenantIsolationError::check(&self.tenant, span.tenant(), "span insert")?;
        self.limits.check_span(span)
    }

    /// Check that `incoming` more facts, `per_trace` of them in each trace,
    /// would fit.
    fn check_capacity(&self, incoming: usize, per_trace: &HashMap<&TraceId, usize>) -> Result<(), EngineError> {
        within(
            "facts per session",
            self.len.saturating_add(incoming),
            self.limits.max_facts_per_session,
        )?;
        for (trace_id, added) in per_trace {
            let existing = self.traces.get(*trace_id).map_or(0, |t| t.spans.len());
            within(
                "spans per trace",
                existing.saturating_add(*added),
                self.limits.max_spans_per_trace,
            )?;
        }
        Ok(())
    }

    /// Insert one fact. Nothing is stored if any check fails.
    pub fn insert(&mut self, span: Span) -> Result<InsertOutcome, EngineError> {
        self.admit(&span)?;
        if self.contains(span.trace_id(), span.span_id()) {
            return Ok(InsertOutcome::Duplicate);
        }
        self.check_capacity(1, &HashMap::from([(span.trace_id(), 1)]))?;
        Ok(self.push(span))
    }

    /// Insert many facts. Every span is checked before any is stored, so a
    /// rejected batch leaves the store unchanged.
    pub fn insert_all(&mut self, spans: Vec<Span>) -> Result<usize, EngineError> {
        let mut per_trace: HashMap<&TraceId, usize> = HashMap::new();
        let mut fresh: HashSet<(&TraceId, &SpanId)> = HashSet::new();
        for span in &spans {
            self.admit(span)?;
            if !self.contains(span.trace_id(), span.span_id())
                && fresh.insert((span.trace_id(), span.span_id()))
            {
                *per_trace.entry(span.trace_id()).or_default() += 1;
            }
        }
        self.check_capacity(fresh.len(), &per_trace)?;

        let mut inserted = 0;
        for span in spans {
            if self.push(span) == InsertOutcome::Inserted {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn contains(&self, trace_id: &TraceId, span_id: &SpanId) -> bool {
        self.traces
            .get(trace_id)
            .is_some_and(|t| t.ids.contains(span_id))
    }

    fn push(&mut self, span: Span) -> InsertOutcome {
        let trace = self.traces.entry(span.trace_id().clone()).or_default();
        if !trace.ids.insert(span.span_id().clone()) {
            return InsertOutcome::Duplicate;
        }
        trace.spans.push(Arc::new(span));
        self.len += 1;
        InsertOutcome::Inserted
    }

    /// Number of facts held.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of distinct traces held.
    pub fn trace_count(&self) -> usize {
        self.traces.len()
    }

    /// Drop every fact.
    pub fn clear(&mut self) {
        self.traces.clear();
        self.len = 0;
    }

    /// A consistent, ordered copy of the current facts.
    ///
    /// Traces are ordered by id and spans within a trace by start time then
    /// span id, so evaluation order does not depend on insertion order.
    pub fn snapshot(&self) -> FactSnapshot {
        let mut traces: Vec<(TraceId, Arc<[Arc<Span>]>)> = self
            .traces
            .iter()
            .map(|(id, facts)| {
                let mut spans = facts.spans.clone();
                spans.sort_by(|a, b| {
                    a.start_time()
                        .cmp(&b.start_time())
                        .then_with(|| a.span_id().cmp(b.span_id()))
                });
                (id.clone(), Arc::from(spans))
            })
            .collect();
        traces.sort_by(|a, b| a.0.cmp(&b.0));
        FactSnapshot {
            tenant: self.tenant.clone(),
            traces,
        }
    }
}

/// Immutable view of a session's facts taken at the start of a firing pass.
#[derive(Debug, Clone)]
pub struct FactSnapshot {
    tenant: TenantId,
    traces: Vec<(TraceId, Arc<[Arc<Span>]>)>,
}

impl FactSnapshot {
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn traces(&self) -> impl Iterator<Item = (&TraceId, &[Arc<Span>])> {
        self.traces.iter().map(|(id, spans)| (id, &spans[..]))
    }

    pub fn trace_count(&self) -> usize {
        self.traces.len()
    }
}
