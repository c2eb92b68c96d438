//! Lowers a rule expression into an executable [`CompiledMatcher`].
//!
//! Compilation resolves where-clause fields, type-checks literals against
//! their operators, and builds regexes once so that evaluation does no
//! parsing or allocation beyond collecting evidence.

use regex::RegexBuilder;
use tracing::debug;

use crate::engine::eval::{Node, Predicate};
use crate::engine::value::{FieldRef, ValueTest};
use crate::engine::CompiledMatcher;
use crate::error::RuleError;
use crate::ir::expr::{CompareOp, Expr, Literal, OperationPattern, WhereClause};
use crate::ir::optimize::optimize;
use crate::ir::rule::RuleMeta;

/// Maximum depth of a compiled expression tree.
pub const MAX_AST_DEPTH: usize = 100;

/// Upper bound on the compiled size of a `matches` pattern.
pub const MAX_REGEX_SIZE: usize = 1 << 20;

/// Compile an expression into a matcher for the rule described by `meta`.
pub fn compile(expr: &Expr, meta: RuleMeta) -> Result<CompiledMatcher, RuleError> {
    let expr = optimize(expr.clone());
    let depth = expr.depth();
    if depth > MAX_AST_DEPTH {
        return Err(RuleError::Compile(format!(
            "expression nests {depth} levels deep; the maximum is {MAX_AST_DEPTH}"
        )));
    }
    let root = lower(&expr)?;
    debug!(rule = %meta.id, depth, "compiled rule expression");
    Ok(CompiledMatcher::new(meta, root))
}

fn lower(expr: &Expr) -> Result<Node, RuleError> {
    match expr {
        Expr::Has { pattern, clause } => {
            check_pattern(pattern)?;
            let filter = clause.as_ref().map(lower_clause).transpose()?;
            Ok(Node::Has {
                pattern: pattern.clone(),
                filter,
            })
        }
        Expr::Count {
            pattern,
            op,
            threshold,
        } => {
            check_pattern(pattern)?;
            if matches!(op, CompareOp::In | CompareOp::Matches) {
                return Err(RuleError::Compile(format!(
                    "trace.count({pattern}) cannot use '{op}'; use ==, !=, >, >=, < or <="
                )));
            }
            Ok(Node::Count {
                pattern: pattern.clone(),
                op: *op,
                threshold: *threshold,
            })
        }
        Expr::And(l, r) => Ok(Node::And(Box::new(lower(l)?), Box::new(lower(r)?))),
        Expr::Or(l, r) => Ok(Node::Or(Box::new(lower(l)?), Box::new(lower(r)?))),
        Expr::Not(inner) => Ok(Node::Not(Box::new(lower(inner)?))),
    }
}

fn check_pattern(pattern: &OperationPattern) -> Result<(), RuleError> {
    if pattern.is_well_formed() {
        Ok(())
    } else {
        Err(RuleError::Compile(format!(
            "invalid operation name {:?}; expected dotted identifiers such as payment.charge_card",
            pattern.as_str()
        )))
    }
}

fn lower_clause(clause: &WhereClause) -> Result<Predicate, RuleError> {
    if clause.field.trim().is_empty() {
        return Err(RuleError::Compile("where clause has an empty field name".into()));
    }
    let field = FieldRef::from_name(&clause.field);
    let test = match (clause.op, &clause.value) {
        (CompareOp::Eq | CompareOp::Ne, Literal::List(_)) => {
            return Err(RuleError::Compile(format!(
                "'{}' cannot compare {} against a list; use 'in'",
                clause.op, clause.field
            )));
        }
        (CompareOp::Eq, lit) => ValueTest::Eq(lit.clone()),
        (CompareOp::Ne, lit) => ValueTest::Ne(lit.clone()),
        (op, lit) if op.is_ordering() => match lit.as_f64() {
            Some(bound) => ValueTest::Ordered(op, bound),
            None => {
                return Err(RuleError::Compile(format!(
                    "'{op}' on {} needs a numeric value, got {}",
                    clause.field,
                    describe(lit)
                )));
            }
        },
        (CompareOp::In, Literal::List(items)) => {
            if items.iter().any(|i| matches!(i, Literal::List(_))) {
                return Err(RuleError::Compile(format!(
                    "'in' on {} does not accept nested lists",
                    clause.field
                )));
            }
            ValueTest::In(items.clone())
        }
        (CompareOp::In, lit) => {
            return Err(RuleError::Compile(format!(
                "'in' on {} needs a list such as [\"a\", \"b\"], got {}",
                clause.field,
                describe(lit)
            )));
        }
        (CompareOp::Matches, Literal::String(pattern)) => {
            let re = RegexBuilder::new(pattern)
                .size_limit(MAX_REGEX_SIZE)
                .build()
                .map_err(|e| {
                    RuleError::Compile(format!("invalid regex for {}: {e}", clause.field))
                })?;
            ValueTest::Matches(re)
        }
        (CompareOp::Matches, lit) => {
            return Err(RuleError::Compile(format!(
                "'matches' on {} needs a string pattern, got {}",
                clause.field,
                describe(lit)
            )));
        }
        (op, _) => {
            return Err(RuleError::Compile(format!("unsupported operator '{op}'")));
        }
    };
    Ok(Predicate { field, test })
}

fn describe(lit: &Literal) -> &'static str {
    match lit {
        Literal::String(_) => "a string",
        Literal::Int(_) | Literal::Float(_) => "a number",
        Literal::Bool(_) => "a boolean",
        Literal::List(_) => "a list",
    }
}
