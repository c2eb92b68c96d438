//! Turns rule matches into violations, suppressing repeats.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use tracewarden_core::{TenantId, TenantIsolationError, TraceId};
use tracewarden_rules::RuleMeta;

use crate::record::{DedupKey, SpanRef, Violation};

/// One rule matching one trace, as reported by a firing pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub tenant: TenantId,
    pub rule: RuleMeta,
    pub trace_id: TraceId,
    /// Spans that contributed to the match.
    pub spans: Vec<SpanRef>,
}

/// Result of [`ViolationEmitter::emit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    Emitted(Violation),
    Suppressed(DedupKey),
}

/// How long a `(rule, trace)` pair stays suppressed after it was emitted.
///
/// A pair is never emitted twice within one firing pass, whatever the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupWindow {
    /// Only within the current firing pass.
    Batch,
    /// Until the session is cleared.
    #[default]
    Session,
    /// For a fixed time after emission.
    Ttl { seconds: u64 },
}

/// Deduplicating violation factory for one tenant.
#[derive(Debug)]
pub struct ViolationEmitter {
    tenant: TenantId,
    window: DedupWindow,
    /// Emission time per key, kept across passes according to `window`.
    ledger: HashMap<DedupKey, DateTime<Utc>>,
    /// Keys emitted in the current pass.
    batch: HashSet<DedupKey>,
}

impl ViolationEmitter {
    pub fn new(tenant: TenantId, window: DedupWindow) -> Self {
        Self {
            tenant,
            window,
            ledger: HashMap::new(),
            batch: HashSet::new(),
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn window(&self) -> DedupWindow {
        self.window
    }

    /// Start a new firing pass.
    pub fn begin_batch(&mut self) {
        self.batch.clear();
        match self.window {
            DedupWindow::Batch => self.ledger.clear(),
            DedupWindow::Session => {}
            DedupWindow::Ttl { seconds } => {
                let now = Utc::now();
                let ttl = ttl(seconds);
                self.ledger.retain(|_, at| now - *at < ttl);
            }
        }
    }

    /// Convert a match into a violation unless its key is still suppressed.
    ///
    /// A match tagged with another tenant is refused.
    pub fn emit(&mut self, m: RuleMatch) -> Result<Emission, TenantIsolationError> {
        TenantIsolationError::check(&self.tenant, &m.tenant, "violation emit")?;

        let key = DedupKey::new(m.rule.id.clone(), m.trace_id.clone());
        let now = Utc::now();
        if self.batch.contains(&key) || self.is_suppressed(&key, now) {
            debug!(rule = %key.rule_id, trace = %key.trace_id, "violation suppressed");
            return Ok(Emission::Suppressed(key));
        }
        self.batch.insert(key.clone());
        self.ledger.insert(key, now);

        Ok(Emission::Emitted(Violation::new(
            m.tenant,
            m.rule.id,
            m.rule.name,
            m.rule.severity,
            m.trace_id,
            m.spans,
        )))
    }

    fn is_suppressed(&self, key: &DedupKey, now: DateTime<Utc>) -> bool {
        self.ledger.get(key).is_some_and(|at| match self.window {
            DedupWindow::Batch | DedupWindow::Session => true,
            DedupWindow::Ttl { seconds } => now - *at < ttl(seconds),
        })
    }

    /// Forget every emitted key.
    pub fn reset(&mut self) {
        self.ledger.clear();
        self.batch.clear();
    }

    /// Number of keys currently remembered.
    pub fn ledger_len(&self) -> usize {
        self.ledger.len()
    }
}

fn ttl(seconds: u64) -> TimeDelta {
    i64::try_from(seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}
