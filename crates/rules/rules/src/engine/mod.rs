pub mod eval;
pub mod trace;
pub mod value;

use std::fmt;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::ir::rule::RuleMeta;

pub use eval::CompiledMatcher;
pub use trace::TraceView;

/// Why a matcher stopped without producing a verdict.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    /// The firing pass was cancelled while the matcher was running.
    #[error("evaluation cancelled")]
    Cancelled,

    /// The trace exceeds a bound the matcher enforces.
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    /// A custom matcher reported a failure.
    #[error("matcher failed: {0}")]
    Failed(String),
}

/// Spans that caused a rule to match, as indexes into [`TraceView::spans`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchEvidence {
    spans: Vec<usize>,
}

impl MatchEvidence {
    pub fn new(mut spans: Vec<usize>) -> Self {
        spans.sort_unstable();
        spans.dedup();
        Self { spans }
    }

    pub fn span_indexes(&self) -> &[usize] {
        &self.spans
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Evidence that is never empty: absence-only matches point at the
    /// trace's root span, or its earliest span if no root was recorded.
    #[must_use]
    pub fn or_root(self, trace: &TraceView<'_>) -> Self {
        if !self.spans.is_empty() || trace.is_empty() {
            return self;
        }
        Self {
            spans: vec![trace.root_index().unwrap_or(0)],
        }
    }
}

/// A compiled rule body.
///
/// Matchers are pure functions of the trace they are given: they see a
/// read-only [`TraceView`] and nothing else. Long-running matchers must poll
/// `cancel` and return [`EvalError::Cancelled`] once it fires.
pub trait TraceMatcher: Send + Sync + fmt::Debug {
    /// Identity of the rule this matcher implements.
    fn meta(&self) -> &RuleMeta;

    /// Evaluate the rule against one trace. `Ok(Some(_))` means the rule
    /// matched.
    fn evaluate(
        &self,
        trace: &TraceView<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<MatchEvidence>, EvalError>;
}
