use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RuleError;

/// Comparison operators usable in `.where(...)` clauses and `trace.count(...)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// Membership in a list literal.
    In,
    /// Regular-expression match against a string literal.
    Matches,
}

impl CompareOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::In => "in",
            Self::Matches => "matches",
        }
    }

    /// Whether the operator orders numbers (`>`, `>=`, `<`, `<=`).
    pub fn is_ordering(self) -> bool {
        matches!(self, Self::Gt | Self::Ge | Self::Lt | Self::Le)
    }

    /// Apply the operator to two ordered values. `In` and `Matches` never hold.
    pub fn holds<T: PartialOrd>(self, lhs: &T, rhs: &T) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::In | Self::Matches => false,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dotted operation name such as `payment.charge_card`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationPattern(String);

impl OperationPattern {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The dot-separated segments of the name.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Whether every segment is a non-empty identifier.
    pub fn is_well_formed(&self) -> bool {
        !self.0.is_empty() && self.segments().all(is_identifier)
    }

    /// Whether an operation name matches this pattern.
    pub fn matches(&self, operation_name: &str) -> bool {
        self.0 == operation_name
    }
}

impl fmt::Display for OperationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether `s` is an identifier segment: a letter or `_` followed by
/// letters, digits, `_` or `-`.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(is_identifier_char)
}

/// Characters allowed after the first character of an identifier segment.
pub fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// A literal value on the right-hand side of a where clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<Literal>),
}

impl Literal {
    /// Numeric view of the literal, for ordering comparisons.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    /// Render the literal in grammar v1 syntax.
    pub fn to_source(&self) -> Result<String, RuleError> {
        match self {
            Self::String(s) => Ok(quote(s)),
            Self::Int(n) => Ok(n.to_string()),
            Self::Float(f) if !f.is_finite() => Err(RuleError::Unrepresentable(format!(
                "non-finite number {f}"
            ))),
            Self::Float(f) => {
                let text = f.to_string();
                if text.contains('.') {
                    Ok(text)
                } else {
                    Ok(format!("{text}.0"))
                }
            }
            Self::Bool(b) => Ok(b.to_string()),
            Self::List(items) => {
                let parts = items
                    .iter()
                    .map(|item| match item {
                        Self::List(_) => Err(RuleError::Unrepresentable(
                            "nested list literal".into(),
                        )),
                        other => other.to_source(),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("[{}]", parts.join(", ")))
            }
        }
    }
}

/// Plain-text form used when comparing values of different types.
impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// `field op value` filter attached to a `trace.has(...)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereClause {
    /// A built-in span field (`operationName`, `serviceName`, `status`,
    /// `kind`, `duration`) or an attribute key.
    pub field: String,
    pub op: CompareOp,
    pub value: Literal,
}

impl WhereClause {
    pub fn new(field: impl Into<String>, op: CompareOp, value: Literal) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }
}

/// The rule expression AST.
///
/// A rule is a boolean combination of two trace-level predicates: "the trace
/// has a span named P (optionally filtered by a where clause)" and "the
/// number of spans named P compares to N".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// `trace.has(pattern)` with an optional `.where(clause)`.
    Has {
        pattern: OperationPattern,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        clause: Option<WhereClause>,
    },
    /// `trace.count(pattern) op threshold`.
    Count {
        pattern: OperationPattern,
        op: CompareOp,
        threshold: u64,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// `trace.has(pattern)`.
    pub fn has(pattern: impl Into<String>) -> Self {
        Self::Has {
            pattern: OperationPattern::new(pattern),
            clause: None,
        }
    }

    /// `trace.has(pattern).where(clause)`.
    pub fn has_where(pattern: impl Into<String>, clause: WhereClause) -> Self {
        Self::Has {
            pattern: OperationPattern::new(pattern),
            clause: Some(clause),
        }
    }

    /// `trace.count(pattern) op threshold`.
    pub fn count(pattern: impl Into<String>, op: CompareOp, threshold: u64) -> Self {
        Self::Count {
            pattern: OperationPattern::new(pattern),
            op,
            threshold,
        }
    }

    #[must_use]
    pub fn and(self, rhs: Expr) -> Self {
        Self::And(Box::new(self), Box::new(rhs))
    }

    #[must_use]
    pub fn or(self, rhs: Expr) -> Self {
        Self::Or(Box::new(self), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    #[must_use]
    pub fn not(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Height of the tree; a leaf predicate has depth 1.
    pub fn depth(&self) -> usize {
        match self {
            Self::Has { .. } | Self::Count { .. } => 1,
            Self::Not(inner) => 1 + inner.depth(),
            Self::And(l, r) | Self::Or(l, r) => 1 + l.depth().max(r.depth()),
        }
    }

    /// Visit every node, parents before children.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Self::Has { .. } | Self::Count { .. } => {}
            Self::Not(inner) => inner.walk(f),
            Self::And(l, r) | Self::Or(l, r) => {
                l.walk(f);
                r.walk(f);
            }
        }
    }

    /// Re-emit the expression as grammar v1 source text.
    ///
    /// Grammar v1 has no grouping parentheses and folds `and`/`or` left to
    /// right, so only left-leaning combinator chains with `not` applied to
    /// single predicates can be written back. Other shapes return
    /// [`RuleError::Unrepresentable`].
    pub fn to_source(&self) -> Result<String, RuleError> {
        match self {
            Self::And(l, r) => Ok(format!("{} and {}", l.to_source()?, r.term_source()?)),
            Self::Or(l, r) => Ok(format!("{} or {}", l.to_source()?, r.term_source()?)),
            term => term.term_source(),
        }
    }

    fn term_source(&self) -> Result<String, RuleError> {
        match self {
            Self::Has { pattern, clause } => {
                let mut out = format!("trace.has({pattern})");
                if let Some(c) = clause {
                    out.push_str(&format!(
                        ".where({} {} {})",
                        c.field,
                        c.op,
                        c.value.to_source()?
                    ));
                }
                Ok(out)
            }
            Self::Count {
                pattern,
                op,
                threshold,
            } => Ok(format!("trace.count({pattern}) {op} {threshold}")),
            Self::Not(inner) => Ok(format!("not {}", inner.term_source()?)),
            Self::And(..) | Self::Or(..) => Err(RuleError::Unrepresentable(
                "a combined expression cannot appear on the right of and/or or under not \
                 without grouping parentheses"
                    .into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_source_simple_predicates() {
        assert_eq!(
            Expr::has("payment.charge_card").to_source().unwrap(),
            "trace.has(payment.charge_card)"
        );
        assert_eq!(
            Expr::count("retry.attempt", CompareOp::Gt, 3)
                .to_source()
                .unwrap(),
            "trace.count(retry.attempt) > 3"
        );
    }

    #[test]
    fn to_source_where_clause_quotes_strings() {
        let expr = Expr::has_where(
            "db.query",
            WhereClause::new("statement", CompareOp::Matches, Literal::String("a\"b".into())),
        );
        assert_eq!(
            expr.to_source().unwrap(),
            r#"trace.has(db.query).where(statement matches "a\"b")"#
        );
    }

    #[test]
    fn to_source_left_chain() {
        let expr = Expr::has("a.b")
            .and(Expr::has("c.d").not())
            .or(Expr::count("e.f", CompareOp::Ge, 2));
        assert_eq!(
            expr.to_source().unwrap(),
            "trace.has(a.b) and not trace.has(c.d) or trace.count(e.f) >= 2"
        );
    }

    #[test]
    fn to_source_rejects_right_nested() {
        let expr = Expr::has("a.b").and(Expr::has("c.d").or(Expr::has("e.f")));
        assert!(matches!(
            expr.to_source(),
            Err(RuleError::Unrepresentable(_))
        ));
    }

    #[test]
    fn to_source_rejects_not_over_combinator() {
        let expr = Expr::has("a.b").and(Expr::has("c.d")).not();
        assert!(expr.to_source().is_err());
    }

    #[test]
    fn literal_sources() {
        assert_eq!(Literal::Float(2.0).to_source().unwrap(), "2.0");
        assert_eq!(Literal::Float(-0.5).to_source().unwrap(), "-0.5");
        assert_eq!(Literal::Int(-7).to_source().unwrap(), "-7");
        assert_eq!(
            Literal::List(vec![Literal::String("x".into()), Literal::Int(1)])
                .to_source()
                .unwrap(),
            r#"["x", 1]"#
        );
        assert!(Literal::Float(f64::NAN).to_source().is_err());
        assert!(
            Literal::List(vec![Literal::List(vec![])])
                .to_source()
                .is_err()
        );
    }

    #[test]
    fn depth_counts_levels() {
        assert_eq!(Expr::has("a.b").depth(), 1);
        assert_eq!(Expr::has("a.b").not().not().depth(), 3);
        let chain = Expr::has("a.b").and(Expr::has("c.d")).and(Expr::has("e.f"));
        assert_eq!(chain.depth(), 3);
    }

    #[test]
    fn pattern_well_formed() {
        assert!(OperationPattern::new("payment.charge_card").is_well_formed());
        assert!(OperationPattern::new("checkout").is_well_formed());
        assert!(!OperationPattern::new("").is_well_formed());
        assert!(!OperationPattern::new("a..b").is_well_formed());
        assert!(!OperationPattern::new("9lives").is_well_formed());
    }

    #[test]
    fn compare_op_holds() {
        assert!(CompareOp::Gt.holds(&4, &3));
        assert!(!CompareOp::Gt.holds(&3, &3));
        assert!(CompareOp::Le.holds(&3, &3));
        assert!(!CompareOp::In.holds(&1, &1));
    }

    #[test]
    fn expr_serde_roundtrip() {
        let expr = Expr::has_where(
            "http.request",
            WhereClause::new("status", CompareOp::Eq, Literal::String("ERROR".into())),
        )
        .and(Expr::count("retry.attempt", CompareOp::Gt, 3).not());
        let json = serde_json::to_string(&expr).unwrap();
        let back: Expr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, expr);
    }
}
