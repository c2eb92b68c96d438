//! Field resolution and literal comparison for where clauses.

use std::fmt;

use regex::Regex;

use tracewarden_core::{AttributeValue, Span};

use crate::ir::expr::{CompareOp, Literal};

/// Tolerance used when comparing numbers for equality.
pub const FLOAT_TOLERANCE: f64 = 0.0001;

/// A span field referenced by a where clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRef {
    OperationName,
    ServiceName,
    Status,
    Kind,
    /// Span duration in nanoseconds.
    Duration,
    Attribute(String),
}

impl FieldRef {
    /// Resolve a clause identifier. Built-in names win over attributes.
    pub fn from_name(name: &str) -> Self {
        match name {
            "operationName" | "operation_name" => Self::OperationName,
            "serviceName" | "service_name" => Self::ServiceName,
            "status" => Self::Status,
            "kind" => Self::Kind,
            "duration" | "durationNanos" | "duration_nanos" => Self::Duration,
            other => Self::Attribute(other.to_owned()),
        }
    }

    /// Read the field from a span. Missing attributes resolve to `None`.
    #[allow(clippy::cast_precision_loss)]
    pub fn resolve<'s>(&self, span: &'s Span) -> Option<FieldValue<'s>> {
        match self {
            Self::OperationName => Some(FieldValue::Str(span.operation_name())),
            Self::ServiceName => Some(FieldValue::Str(span.service_name())),
            Self::Status => Some(FieldValue::Str(span.status().as_str())),
            Self::Kind => Some(FieldValue::Str(span.kind().as_str())),
            Self::Duration => Some(FieldValue::Num(span.duration_nanos() as f64)),
            Self::Attribute(key) => span.attributes().get(key).map(FieldValue::from),
        }
    }
}

/// A borrowed scalar read from a span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Str(&'a str),
    Num(f64),
    Bool(bool),
}

impl<'a> From<&'a AttributeValue> for FieldValue<'a> {
    #[allow(clippy::cast_precision_loss)]
    fn from(v: &'a AttributeValue) -> Self {
        match v {
            AttributeValue::Bool(b) => Self::Bool(*b),
            AttributeValue::Int(n) => Self::Num(*n as f64),
            AttributeValue::Float(f) => Self::Num(*f),
            AttributeValue::String(s) => Self::Str(s),
        }
    }
}

impl FieldValue<'_> {
    /// Numeric payload. Strings are never read as numbers.
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            Self::Str(_) | Self::Bool(_) => None,
        }
    }
}

impl fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Num(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Equality between a span value and a literal.
///
/// Strings compare exactly, numbers within [`FLOAT_TOLERANCE`], booleans
/// exactly. Mixed types fall back to comparing their text forms.
pub fn values_equal(actual: &FieldValue<'_>, expected: &Literal) -> bool {
    match (actual, expected) {
        (FieldValue::Str(a), Literal::String(b)) => *a == b.as_str(),
        (FieldValue::Num(a), Literal::Int(_) | Literal::Float(_)) => expected
            .as_f64()
            .is_some_and(|b| (a - b).abs() < FLOAT_TOLERANCE),
        (FieldValue::Bool(a), Literal::Bool(b)) => a == b,
        (_, Literal::List(_)) => false,
        _ => actual.to_string() == expected.to_string(),
    }
}

/// Ordering comparison. Only numeric values order; anything else is false.
///
/// `>=` and `<=` accept values within [`FLOAT_TOLERANCE`] of the bound, the
/// same slack `==` allows.
pub fn values_ordered(actual: &FieldValue<'_>, op: CompareOp, bound: f64) -> bool {
    let Some(a) = actual.as_f64() else {
        return false;
    };
    let near = (a - bound).abs() < FLOAT_TOLERANCE;
    match op {
        CompareOp::Ge => a > bound || near,
        CompareOp::Le => a < bound || near,
        other => other.holds(&a, &bound),
    }
}

/// A lowered where-clause test.
#[derive(Debug, Clone)]
pub enum ValueTest {
    Eq(Literal),
    Ne(Literal),
    Ordered(CompareOp, f64),
    In(Vec<Literal>),
    Matches(Regex),
}

impl ValueTest {
    pub fn test(&self, actual: &FieldValue<'_>) -> bool {
        match self {
            Self::Eq(lit) => values_equal(actual, lit),
            Self::Ne(lit) => !values_equal(actual, lit),
            Self::Ordered(op, bound) => values_ordered(actual, *op, *bound),
            Self::In(items) => items.iter().any(|item| values_equal(actual, item)),
            Self::Matches(re) => match actual {
                FieldValue::Str(s) => re.is_match(s),
                other => re.is_match(&other.to_string()),
            },
        }
    }
}
