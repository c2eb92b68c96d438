use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{SpanId, TenantId, TraceId};

/// A scalar attribute value attached to a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    /// Length of the value in bytes when rendered as text.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::String(s) => s.len(),
            other => other.to_string().len(),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// A read-only attribute map.
///
/// Once a span is built there is no way to obtain a mutable reference to its
/// attributes: the map exposes lookups and iteration only. Rule logic that
/// wants a modified copy must call [`Attributes::to_map`] and work on its own
/// clone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    /// Create an empty attribute map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an attribute by key.
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Return an owned copy of the underlying map.
    pub fn to_map(&self) -> BTreeMap<String, AttributeValue> {
        self.0.clone()
    }

    /// The largest value in the map, measured in bytes.
    pub fn max_value_len(&self) -> usize {
        self.0.values().map(AttributeValue::byte_len).max().unwrap_or(0)
    }
}

impl<K, V> FromIterator<(K, V)> for Attributes
where
    K: Into<String>,
    V: Into<AttributeValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Completion status of a span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error,
}

impl SpanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "UNSET",
            Self::Ok => "OK",
            Self::Error => "ERROR",
        }
    }
}

/// The role a span plays in its trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "INTERNAL",
            Self::Server => "SERVER",
            Self::Client => "CLIENT",
            Self::Producer => "PRODUCER",
            Self::Consumer => "CONSUMER",
        }
    }
}

/// One recorded operation within a distributed trace.
///
/// Spans are immutable facts. Every span carries the tenant that produced it
/// as a required constructor argument; nothing about tenancy is inferred from
/// attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SpanRecord")]
pub struct Span {
    tenant: TenantId,
    span_id: SpanId,
    trace_id: TraceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_span_id: Option<SpanId>,
    operation_name: String,
    service_name: String,
    kind: SpanKind,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    duration_nanos: u64,
    attributes: Attributes,
    status: SpanStatus,
}

impl Span {
    /// Create a span with required fields. Start and end are set to now.
    #[must_use]
    pub fn new(
        tenant: impl Into<TenantId>,
        trace_id: impl Into<TraceId>,
        span_id: impl Into<SpanId>,
        operation_name: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            tenant: tenant.into(),
            span_id: span_id.into(),
            trace_id: trace_id.into(),
            parent_span_id: None,
            operation_name: operation_name.into(),
            service_name: service_name.into(),
            kind: SpanKind::default(),
            start_time: now,
            end_time: now,
            duration_nanos: 0,
            attributes: Attributes::new(),
            status: SpanStatus::default(),
        }
    }

    /// Set the parent span.
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<SpanId>) -> Self {
        self.parent_span_id = Some(parent.into());
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: SpanStatus) -> Self {
        self.status = status;
        self
    }

    /// Set start and end time. The duration is derived from them.
    #[must_use]
    pub fn with_timing(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self.duration_nanos = duration_between(start, end);
        self
    }

    /// Add a single attribute.
    #[must_use]
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        self.attributes.0.insert(key.into(), value.into());
        self
    }

    /// Replace the attribute map.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn span_id(&self) -> &SpanId {
        &self.span_id
    }

    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    pub fn parent_span_id(&self) -> Option<&SpanId> {
        self.parent_span_id.as_ref()
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn kind(&self) -> SpanKind {
        self.kind
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn duration_nanos(&self) -> u64 {
        self.duration_nanos
    }

    /// Read-only view of the span's attributes.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn status(&self) -> SpanStatus {
        self.status
    }

    /// Whether this span has no parent within its trace.
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }
}

fn duration_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start)
        .num_nanoseconds()
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0)
}

/// Wire form of a span. `duration_nanos` is optional on input and derived
/// from the timestamps when absent.
#[derive(Deserialize)]
struct SpanRecord {
    tenant: TenantId,
    span_id: SpanId,
    trace_id: TraceId,
    #[serde(default)]
    parent_span_id: Option<SpanId>,
    operation_name: String,
    service_name: String,
    #[serde(default)]
    kind: SpanKind,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    #[serde(default)]
    duration_nanos: Option<u64>,
    #[serde(default)]
    attributes: Attributes,
    #[serde(default)]
    status: SpanStatus,
}

impl From<SpanRecord> for Span {
    fn from(r: SpanRecord) -> Self {
        let duration_nanos = r
            .duration_nanos
            .unwrap_or_else(|| duration_between(r.start_time, r.end_time));
        Self {
            tenant: r.tenant,
            span_id: r.span_id,
            trace_id: r.trace_id,
            parent_span_id: r.parent_span_id,
            operation_name: r.operation_name,
            service_name: r.service_name,
            kind: r.kind,
            start_time: r.start_time,
            end_time: r.end_time,
            duration_nanos,
            attributes: r.attributes,
            status: r.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sample() -> Span {
        Span::new("tenant-a", "trace-1", "span-1", "payment.charge_card", "payments")
    }

    #[test]
    fn span_builder_sets_fields() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = start + chrono::Duration::milliseconds(250);
        let span = sample()
            .with_parent("span-0")
            .with_kind(SpanKind::Server)
            .with_status(SpanStatus::Error)
            .with_timing(start, end)
            .with_attribute("amount", 1200_i64);

        assert_eq!(span.tenant().as_str(), "tenant-a");
        assert_eq!(span.parent_span_id().map(SpanId::as_str), Some("span-0"));
        assert_eq!(span.kind(), SpanKind::Server);
        assert_eq!(span.status(), SpanStatus::Error);
        assert_eq!(span.duration_nanos(), 250_000_000);
        assert_eq!(span.attributes().get("amount"), Some(&AttributeValue::Int(1200)));
        assert!(!span.is_root());
    }

    #[test]
    fn negative_timing_clamps_to_zero() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 1).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(sample().with_timing(start, end).duration_nanos(), 0);
    }

    #[test]
    fn attribute_copy_does_not_touch_span() {
        let span = sample().with_attribute("pii", true);
        let mut copy = span.attributes().to_map();
        copy.insert("pii".into(), AttributeValue::Bool(false));
        copy.insert("extra".into(), AttributeValue::Int(1));

        assert_eq!(span.attributes().get("pii"), Some(&AttributeValue::Bool(true)));
        assert_eq!(span.attributes().len(), 1);
    }

    #[test]
    fn untagged_attribute_values_deserialize() {
        let attrs: Attributes =
            serde_json::from_str(r#"{"a": true, "b": 7, "c": 1.5, "d": "x"}"#).unwrap();
        assert_eq!(attrs.get("a"), Some(&AttributeValue::Bool(true)));
        assert_eq!(attrs.get("b"), Some(&AttributeValue::Int(7)));
        assert_eq!(attrs.get("c"), Some(&AttributeValue::Float(1.5)));
        assert_eq!(attrs.get("d"), Some(&AttributeValue::from("x")));
    }

    #[test]
    fn span_deserialize_derives_duration() {
        let json = r#"{
            "tenant": "t1",
            "span_id": "s1",
            "trace_id": "tr1",
            "operation_name": "retry.attempt",
            "service_name": "worker",
            "start_time": "2025-01-01T00:00:00Z",
            "end_time": "2025-01-01T00:00:02Z",
            "status": "ERROR"
        }"#;
        let span: Span = serde_json::from_str(json).unwrap();
        assert_eq!(span.duration_nanos(), 2_000_000_000);
        assert_eq!(span.status(), SpanStatus::Error);
        assert_eq!(span.kind(), SpanKind::Internal);
        assert!(span.is_root());
        assert!(span.attributes().is_empty());
    }

    #[test]
    fn span_deserialize_keeps_explicit_duration() {
        let json = r#"{
            "tenant": "t1",
            "span_id": "s1",
            "trace_id": "tr1",
            "operation_name": "op",
            "service_name": "svc",
            "start_time": "2025-01-01T00:00:00Z",
            "end_time": "2025-01-01T00:00:00Z",
            "duration_nanos": 99
        }"#;
        let span: Span = serde_json::from_str(json).unwrap();
        assert_eq!(span.duration_nanos(), 99);
    }

    #[test]
    fn max_value_len_measures_bytes() {
        let attrs: Attributes = [("k", "héllo"), ("j", "ab")].into_iter().collect();
        assert_eq!(attrs.max_value_len(), 6);
        assert_eq!(Attributes::new().max_value_len(), 0);
    }
}
