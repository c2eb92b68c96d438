//! Text frontend for Tracewarden rules.
//!
//! [`parse_expression`] turns grammar v1 source into an
//! [`Expr`](tracewarden_rules::Expr); [`DslFrontend`] loads YAML rule files
//! whose `expression` fields are written in that grammar.

pub mod frontend;
pub mod parser;

pub use frontend::DslFrontend;
pub use parser::{parse_expression, parse_rule_expression};
