//! The capability handed to a firing pass.
//!
//! Rule logic never receives the engine, the session, or the emitter. A
//! firing pass receives read-only [`TraceView`]s and a
//! [`ViolationCapability`] whose tenant is fixed when it is built. Every use
//! is checked against that tenant and a mismatch aborts the pass.
//!
//! Read-only access to facts is enforced by the types: spans are shared as
//! `Arc<Span>` with no mutating methods and attribute maps expose only
//! borrowing accessors. A mutation attempt is a compile error rather than a
//! silent no-op.

use tracewarden_core::{TenantId, TenantIsolationError};
use tracewarden_rules::{MatchEvidence, RuleMeta, TraceView};
use tracewarden_violations::{RuleMatch, SpanRef};

/// Tenant-bound handle through which a firing pass reports matches.
///
/// Matches are buffered, not emitted. The session turns them into
/// violations only after the pass completes, so an abandoned pass leaves
/// nothing behind.
#[derive(Debug)]
pub struct ViolationCapability {
    tenant: TenantId,
    matches: Vec<RuleMatch>,
}

impl ViolationCapability {
    /// Build a capability for `requested` inside a scope bound to `bound`.
    ///
    /// Fails if the two tenants differ.
    pub fn new(bound: &TenantId, requested: &TenantId) -> Result<Self, TenantIsolationError> {
        TenantIsolationError::check(bound, requested, "capability construction")?;
        Ok(Self {
            tenant: bound.clone(),
            matches: Vec::new(),
        })
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Record that `rule` matched `trace`, citing the spans in `evidence`.
    ///
    /// The trace and every cited span must belong to this capability's
    /// tenant. Evidence indexes outside the trace are ignored, and a match
    /// left citing nothing cites the trace's root span instead.
    pub fn emit(
        &mut self,
        trace: &TraceView<'_>,
        rule: &RuleMeta,
        evidence: &MatchEvidence,
    ) -> Result<(), TenantIsolationError> {
        TenantIsolationError::check(&self.tenant, trace.tenant(), "violation capability")?;

        let cited: Vec<usize> = evidence
            .span_indexes()
            .iter()
            .copied()
            .filter(|i| *i < trace.len())
            .collect();
        let cited = MatchEvidence::new(cited).or_root(trace);

        let mut spans = Vec::with_capacity(cited.span_indexes().len());
        for span in cited.span_indexes().iter().filter_map(|i| trace.span(*i)) {
            TenantIsolationError::check(&self.tenant, span.tenant(), "violation capability")?;
            spans.push(SpanRef::new(
                span.trace_id().clone(),
                span.span_id().clone(),
                span.service_name(),
            ));
        }

        self.matches.push(RuleMatch {
            tenant: self.tenant.clone(),
            rule: rule.clone(),
            trace_id: trace.trace_id().clone(),
            spans,
        });
        Ok(())
    }

    /// Number of matches recorded so far.
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub(crate) fn into_matches(self) -> Vec<RuleMatch> {
        self.matches
    }
}
