use async_trait::async_trait;
use dashmap::DashMap;

use tracewarden_core::TenantId;
use tracewarden_violations::{SinkError, Violation, ViolationSink};

/// In-memory violation sink using `DashMap`. Suitable for development and
/// testing.
///
/// Violations are stored by id, with a secondary index from tenant to
/// violation ids so that one tenant's view never includes another's records.
pub struct MemoryViolationSink {
    /// Primary store: violation id -> `Violation`.
    records: DashMap<String, Violation>,
    /// Secondary index: tenant -> violation ids in publish order.
    tenant_index: DashMap<TenantId, Vec<String>>,
}

impl MemoryViolationSink {
    /// Create a new empty sink.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            tenant_index: DashMap::new(),
        }
    }

    /// Violations published for `tenant`, in publish order.
    pub fn by_tenant(&self, tenant: &TenantId) -> Vec<Violation> {
        let Some(ids) = self.tenant_index.get(tenant) else {
            return Vec::new();
        };
        ids.value()
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| r.value().clone()))
            .collect()
    }

    /// Look up a violation by id.
    pub fn get(&self, id: &str) -> Option<Violation> {
        self.records.get(id).map(|r| r.value().clone())
    }

    /// Total number of stored violations across all tenants.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for MemoryViolationSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ViolationSink for MemoryViolationSink {
    async fn publish(&self, violation: Violation) -> Result<(), SinkError> {
        let id = violation.id().to_owned();
        let tenant = violation.tenant().clone();
        if self.records.contains_key(&id) {
            return Err(SinkError::Publish(format!(
                "violation {id} already published; records are append-only"
            )));
        }
        self.records.insert(id.clone(), violation);
        self.tenant_index.entry(tenant).or_default().push(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tracewarden_core::{RuleId, Severity, TraceId};

    use super::*;

    fn violation(tenant: &str, trace: &str) -> Violation {
        Violation::new(
            TenantId::new(tenant),
            RuleId::new("r-1"),
            "rule",
            Severity::High,
            TraceId::new(trace),
            vec![],
        )
    }

    #[tokio::test]
    async fn publish_and_query_by_tenant() {
        let sink = MemoryViolationSink::new();
        sink.publish(violation("a", "t1")).await.unwrap();
        sink.publish(violation("a", "t2")).await.unwrap();
        sink.publish(violation("b", "t1")).await.unwrap();

        let a = sink.by_tenant(&TenantId::new("a"));
        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|v| v.tenant().as_str() == "a"));
        assert_eq!(a[0].primary_trace_id().as_str(), "t1");
        assert_eq!(sink.by_tenant(&TenantId::new("b")).len(), 1);
        assert!(sink.by_tenant(&TenantId::new("c")).is_empty());
        assert_eq!(sink.len(), 3);
    }

    #[tokio::test]
    async fn republishing_same_record_is_rejected() {
        let sink = MemoryViolationSink::new();
        let v = violation("a", "t1");
        sink.publish(v.clone()).await.unwrap();
        assert!(matches!(
            sink.publish(v.clone()).await,
            Err(SinkError::Publish(_))
        ));
        assert_eq!(sink.get(v.id()), Some(v));
        assert_eq!(sink.len(), 1);
    }
}
