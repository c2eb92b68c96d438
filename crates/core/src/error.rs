use thiserror::Error;

use crate::types::TenantId;

/// Errors raised by core value types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid severity: {0:?} (expected LOW, MEDIUM, HIGH or CRITICAL)")]
    InvalidSeverity(String),
}

/// An attempt to cross a tenant boundary.
///
/// This is a security-class failure. It is never downgraded to a softer error
/// kind by any layer that propagates it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "tenant isolation violation during {context}: bound to tenant '{expected}', got '{actual}'"
)]
pub struct TenantIsolationError {
    /// The tenant the session or capability is bound to.
    pub expected: TenantId,
    /// The tenant carried by the offending fact or request.
    pub actual: TenantId,
    /// The operation that was refused.
    pub context: &'static str,
}

impl TenantIsolationError {
    /// Return an error unless `actual` equals `expected`.
    pub fn check(
        expected: &TenantId,
        actual: &TenantId,
        context: &'static str,
    ) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self {
                expected: expected.clone(),
                actual: actual.clone(),
                context,
            })
        }
    }
}
