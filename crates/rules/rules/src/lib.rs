//! Rule model and compiled-matcher runtime for Tracewarden.
//!
//! A rule expression is parsed (by a frontend crate) into an [`Expr`],
//! lowered by [`compile`] into a [`CompiledMatcher`], and evaluated against
//! one trace at a time through the [`TraceMatcher`] trait.

pub mod artifact;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod frontend;
pub mod ir;
pub mod lint;

pub use artifact::RuleArtifact;
pub use compiler::compile;
pub use engine::{CompiledMatcher, EvalError, MatchEvidence, TraceMatcher, TraceView};
pub use error::{ParseError, ParseErrorKind, RuleError};
pub use frontend::RuleFrontend;
pub use ir::expr::{CompareOp, Expr, Literal, OperationPattern, WhereClause};
pub use ir::limits::RuleLimits;
pub use ir::rule::{Rule, RuleDefinition, RuleMeta};
pub use lint::{Lint, LintLevel, lint};
