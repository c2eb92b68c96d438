//! Advisory diagnostics for rule expressions.
//!
//! Lints never stop a rule from compiling. They flag expressions that are
//! legal but likely to behave differently from what the author meant.

use std::fmt;

use crate::ir::expr::{CompareOp, Expr, Literal};

/// Count thresholds above this are flagged as probably unintended.
pub const HIGH_COUNT_THRESHOLD: u64 = 1_000;

/// Operation names shorter than this are flagged.
pub const MIN_OPERATION_NAME_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LintLevel {
    Warning,
    Error,
}

/// A single lint finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lint {
    pub level: LintLevel,
    pub message: String,
}

impl Lint {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: LintLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: LintLevel::Error,
            message: message.into(),
        }
    }
}

impl fmt::Display for Lint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            LintLevel::Warning => "warning",
            LintLevel::Error => "error",
        };
        write!(f, "{level}: {}", self.message)
    }
}

/// Run every lint over an expression.
pub fn lint(expr: &Expr) -> Vec<Lint> {
    let mut out = Vec::new();
    let mut uses_or = false;
    let mut positive_leaf = false;

    expr.walk(&mut |node| match node {
        Expr::Or(..) => uses_or = true,
        Expr::Has { pattern, clause } => {
            check_operation(pattern.as_str(), &mut out);
            if let Some(c) = clause
                && c.op == CompareOp::In
                && matches!(&c.value, Literal::List(items) if items.is_empty())
            {
                out.push(Lint::warning(format!(
                    "'{} in []' on {pattern} can never match",
                    c.field
                )));
            }
        }
        Expr::Count {
            pattern,
            op,
            threshold,
        } => {
            check_operation(pattern.as_str(), &mut out);
            if *threshold > HIGH_COUNT_THRESHOLD {
                out.push(Lint::warning(format!(
                    "count threshold {threshold} for {pattern} is unusually high"
                )));
            }
            if *op == CompareOp::Eq {
                out.push(Lint::warning(format!(
                    "exact count match on {pattern} is brittle; consider >= or <="
                )));
            }
        }
        Expr::And(..) | Expr::Not(_) => {}
    });

    mark_positive(expr, false, &mut positive_leaf);
    if uses_or {
        out.push(Lint::warning(
            "'or' combination: a violation does not record which branch matched",
        ));
    }
    if !positive_leaf {
        out.push(Lint::warning(
            "rule matches only on absence; violations will reference the trace root span",
        ));
    }
    out
}

/// Whether any predicate appears under an even number of `not`s.
fn mark_positive(expr: &Expr, negated: bool, found: &mut bool) {
    match expr {
        Expr::Has { .. } | Expr::Count { .. } => {
            if !negated {
                *found = true;
            }
        }
        Expr::Not(inner) => mark_positive(inner, !negated, found),
        Expr::And(l, r) | Expr::Or(l, r) => {
            mark_positive(l, negated, found);
            mark_positive(r, negated, found);
        }
    }
}

fn check_operation(name: &str, out: &mut Vec<Lint>) {
    if name.len() < MIN_OPERATION_NAME_LEN {
        out.push(Lint::error(format!(
            "operation name '{name}' is shorter than {MIN_OPERATION_NAME_LEN} characters"
        )));
    } else if !name.contains('.') {
        out.push(Lint::warning(format!(
            "operation name '{name}' is not qualified as service.operation"
        )));
    }
}

/// Whether any lint is an error.
pub fn has_errors(lints: &[Lint]) -> bool {
    lints.iter().any(|l| l.level == LintLevel::Error)
}
