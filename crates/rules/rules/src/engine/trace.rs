use std::sync::Arc;

use tracewarden_core::{Span, TenantId, TraceId};

/// Read-only view of one trace handed to a matcher.
///
/// The view borrows immutable spans; a matcher cannot insert, remove, or
/// modify facts through it.
#[derive(Debug, Clone, Copy)]
pub struct TraceView<'a> {
    tenant: &'a TenantId,
    trace_id: &'a TraceId,
    spans: &'a [Arc<Span>],
}

impl<'a> TraceView<'a> {
    pub fn new(tenant: &'a TenantId, trace_id: &'a TraceId, spans: &'a [Arc<Span>]) -> Self {
        Self {
            tenant,
            trace_id,
            spans,
        }
    }

    pub fn tenant(&self) -> &'a TenantId {
        self.tenant
    }

    pub fn trace_id(&self) -> &'a TraceId {
        self.trace_id
    }

    /// Spans of the trace in insertion-independent order (start time, then
    /// span id).
    pub fn spans(&self) -> impl ExactSizeIterator<Item = &'a Span> + 'a {
        self.spans.iter().map(AsRef::as_ref)
    }

    pub fn span(&self, index: usize) -> Option<&'a Span> {
        self.spans.get(index).map(AsRef::as_ref)
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Index of the first span without a parent.
    pub fn root_index(&self) -> Option<usize> {
        self.spans.iter().position(|s| s.is_root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_index_skips_children() {
        let tenant = TenantId::new("t");
        let trace = TraceId::new("tr");
        let spans = vec![
            Arc::new(Span::new("t", "tr", "s2", "child.op", "svc").with_parent("s1")),
            Arc::new(Span::new("t", "tr", "s1", "root.op", "svc")),
        ];
        let view = TraceView::new(&tenant, &trace, &spans);
        assert_eq!(view.root_index(), Some(1));
        assert_eq!(view.len(), 2);
        assert_eq!(view.span(0).map(Span::operation_name), Some("child.op"));
    }

    #[test]
    fn root_index_none_without_root() {
        let tenant = TenantId::new("t");
        let trace = TraceId::new("tr");
        let spans = vec![Arc::new(
            Span::new("t", "tr", "s2", "child.op", "svc").with_parent("s1"),
        )];
        let view = TraceView::new(&tenant, &trace, &spans);
        assert_eq!(view.root_index(), None);
    }
}
