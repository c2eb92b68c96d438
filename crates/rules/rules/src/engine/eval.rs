use tokio_util::sync::CancellationToken;

use tracewarden_core::Span;

use super::value::{FieldRef, ValueTest};
use super::{EvalError, MatchEvidence, TraceMatcher, TraceView};
use crate::ir::expr::{CompareOp, OperationPattern};
use crate::ir::rule::RuleMeta;

/// A lowered where clause.
#[derive(Debug, Clone)]
pub(crate) struct Predicate {
    pub(crate) field: FieldRef,
    pub(crate) test: ValueTest,
}

impl Predicate {
    fn matches(&self, span: &Span) -> bool {
        self.field
            .resolve(span)
            .is_some_and(|value| self.test.test(&value))
    }
}

/// Lowered expression tree evaluated by [`CompiledMatcher`].
#[derive(Debug, Clone)]
pub(crate) enum Node {
    Has {
        pattern: OperationPattern,
        filter: Option<Predicate>,
    },
    Count {
        pattern: OperationPattern,
        op: CompareOp,
        threshold: u64,
    },
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
}

/// The matcher produced by compiling a rule expression.
///
/// Holds no state besides the lowered tree, so the same matcher can be shared
/// between firing passes and threads. Two tenants compiling the same source
/// get two independent matchers with identical behaviour.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    meta: RuleMeta,
    root: Node,
}

impl CompiledMatcher {
    pub(crate) fn new(meta: RuleMeta, root: Node) -> Self {
        Self { meta, root }
    }

    /// Evaluate a node. `Ok(Some(spans))` means the node holds, with the
    /// indexes of the spans that made it hold.
    fn eval(
        &self,
        node: &Node,
        trace: &TraceView<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<usize>>, EvalError> {
        match node {
            Node::Has { pattern, filter } => {
                let mut hits = Vec::new();
                for (i, span) in trace.spans().enumerate() {
                    if cancel.is_cancelled() {
                        return Err(EvalError::Cancelled);
                    }
                    if pattern.matches(span.operation_name())
                        && filter.as_ref().is_none_or(|p| p.matches(span))
                    {
                        hits.push(i);
                    }
                }
                Ok((!hits.is_empty()).then_some(hits))
            }
            Node::Count {
                pattern,
                op,
                threshold,
            } => {
                let mut hits = Vec::new();
                for (i, span) in trace.spans().enumerate() {
                    if cancel.is_cancelled() {
                        return Err(EvalError::Cancelled);
                    }
                    if pattern.matches(span.operation_name()) {
                        hits.push(i);
                    }
                }
                let count = hits.len() as u64;
                Ok(op.holds(&count, threshold).then_some(hits))
            }
            Node::And(l, r) => {
                let Some(mut left) = self.eval(l, trace, cancel)? else {
                    return Ok(None);
                };
                let Some(right) = self.eval(r, trace, cancel)? else {
                    return Ok(None);
                };
                left.extend(right);
                Ok(Some(left))
            }
            Node::Or(l, r) => match self.eval(l, trace, cancel)? {
                Some(left) => Ok(Some(left)),
                None => self.eval(r, trace, cancel),
            },
            Node::Not(inner) => Ok(match self.eval(inner, trace, cancel)? {
                Some(_) => None,
                None => Some(Vec::new()),
            }),
        }
    }
}

impl TraceMatcher for CompiledMatcher {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn evaluate(
        &self,
        trace: &TraceView<'_>,
        cancel: &CancellationToken,
    ) -> Result<Option<MatchEvidence>, EvalError> {
        Ok(self
            .eval(&self.root, trace, cancel)?
            .map(|spans| MatchEvidence::new(spans).or_root(trace)))
    }
}
