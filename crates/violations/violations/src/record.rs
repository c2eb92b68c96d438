use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tracewarden_core::{RuleId, Severity, SpanId, TenantId, TraceId};

use crate::error::SinkError;

/// Deduplication key for violations: one rule against one trace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub rule_id: RuleId,
    pub trace_id: TraceId,
}

impl DedupKey {
    pub fn new(rule_id: impl Into<RuleId>, trace_id: impl Into<TraceId>) -> Self {
        Self {
            rule_id: rule_id.into(),
            trace_id: trace_id.into(),
        }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.rule_id, self.trace_id)
    }
}

/// Reference to a span that contributed to a match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpanRef {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub service_name: String,
}

impl SpanRef {
    pub fn new(
        trace_id: impl Into<TraceId>,
        span_id: impl Into<SpanId>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            service_name: service_name.into(),
        }
    }
}

/// An append-only evidence record of a rule matching a trace.
///
/// Fields are read through accessors only. Once created, a violation is never
/// changed; signing produces a copy carrying the signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Unique identifier (UUID v7).
    id: String,
    tenant: TenantId,

    // -- Rule --
    rule_id: RuleId,
    rule_name: String,
    severity: Severity,
    message: String,

    // -- Evidence --
    trace_ids: Vec<TraceId>,
    span_refs: Vec<SpanRef>,

    created_at: DateTime<Utc>,
    dedup_key: DedupKey,

    /// Detached signature over [`canonical_bytes`](Self::canonical_bytes),
    /// present only after passing through a signing sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
}

/// The signed portion of a violation. Field order is fixed by this struct.
#[derive(Serialize)]
struct Canonical<'a> {
    id: &'a str,
    tenant: &'a TenantId,
    rule_id: &'a RuleId,
    rule_name: &'a str,
    severity: Severity,
    message: &'a str,
    trace_ids: &'a [TraceId],
    span_refs: &'a [SpanRef],
    created_at: String,
    dedup_key: &'a DedupKey,
}

impl Violation {
    /// Create a violation for `rule_id` against `trace_id`.
    ///
    /// `span_refs` are sorted so two violations built from the same evidence
    /// compare equal regardless of scan order.
    pub fn new(
        tenant: TenantId,
        rule_id: RuleId,
        rule_name: impl Into<String>,
        severity: Severity,
        trace_id: TraceId,
        mut span_refs: Vec<SpanRef>,
    ) -> Self {
        span_refs.sort();
        span_refs.dedup();
        let rule_name = rule_name.into();
        let message = format!(
            "rule '{rule_name}' ({severity}) matched trace {trace_id} on {} span(s)",
            span_refs.len()
        );
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            tenant,
            dedup_key: DedupKey::new(rule_id.clone(), trace_id.clone()),
            rule_id,
            rule_name,
            severity,
            message,
            trace_ids: vec![trace_id],
            span_refs,
            created_at: Utc::now(),
            signature: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn rule_id(&self) -> &RuleId {
        &self.rule_id
    }

    pub fn rule_name(&self) -> &str {
        &self.rule_name
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn trace_ids(&self) -> &[TraceId] {
        &self.trace_ids
    }

    /// The trace that triggered the violation.
    pub fn primary_trace_id(&self) -> &TraceId {
        &self.dedup_key.trace_id
    }

    pub fn span_refs(&self) -> &[SpanRef] {
        &self.span_refs
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn dedup_key(&self) -> &DedupKey {
        &self.dedup_key
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    /// Deterministic JSON serialization of everything except the signature.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, SinkError> {
        serde_json::to_vec(&Canonical {
            id: &self.id,
            tenant: &self.tenant,
            rule_id: &self.rule_id,
            rule_name: &self.rule_name,
            severity: self.severity,
            message: &self.message,
            trace_ids: &self.trace_ids,
            span_refs: &self.span_refs,
            created_at: self.created_at.to_rfc3339(),
            dedup_key: &self.dedup_key,
        })
        .map_err(|e| SinkError::Serialization(e.to_string()))
    }

    /// SHA-256 hex digest of [`canonical_bytes`](Self::canonical_bytes).
    pub fn content_digest(&self) -> Result<String, SinkError> {
        Ok(hex::encode(Sha256::digest(self.canonical_bytes()?)))
    }

    pub(crate) fn with_signature(mut self, signature: String) -> Self {
        self.signature = Some(signature);
        self
    }
}
