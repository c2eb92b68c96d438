//! Simplification passes run on a parsed expression before lowering.
//!
//! Supported transformations:
//! - Double negation removal (`not not x` -> `x`).

use super::expr::Expr;

/// Run all simplification passes on an expression tree.
pub fn optimize(expr: Expr) -> Expr {
    remove_double_negation(expr)
}

/// Remove pairs of `not`. An odd chain keeps a single `not`.
fn remove_double_negation(expr: Expr) -> Expr {
    match expr {
        Expr::Not(inner) => {
            let mut negated = true;
            let mut current = *inner;
            while let Expr::Not(next) = current {
                negated = !negated;
                current = *next;
            }
            let current = remove_double_negation(current);
            if negated {
                Expr::Not(Box::new(current))
            } else {
                current
            }
        }
        Expr::And(l, r) => Expr::And(
            Box::new(remove_double_negation(*l)),
            Box::new(remove_double_negation(*r)),
        ),
        Expr::Or(l, r) => Expr::Or(
            Box::new(remove_double_negation(*l)),
            Box::new(remove_double_negation(*r)),
        ),
        leaf @ (Expr::Has { .. } | Expr::Count { .. }) => leaf,
    }
}
