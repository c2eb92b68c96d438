use std::time::Duration;

use tracewarden_core::{TenantId, TenantIsolationError};
use tracewarden_rules::RuleError;

/// Errors surfaced by sessions and the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A fact, match, or capability crossed a tenant boundary. Never
    /// recovered; the offending operation is aborted.
    #[error(transparent)]
    TenantIsolation(#[from] TenantIsolationError),

    /// A firing pass exceeded its wall-clock bound and was abandoned.
    ///
    /// No violations from the pass were emitted and inserted facts are
    /// retained. The session accepts further calls.
    #[error(
        "evaluation for tenant '{tenant}' exceeded {}ms and was abandoned; consider raising the timeout or simplifying the rule set",
        limit.as_millis()
    )]
    EvaluationTimeout { tenant: TenantId, limit: Duration },

    /// A rule failed to load, parse, or compile.
    #[error(transparent)]
    Rule(#[from] RuleError),

    /// A span or session exceeded a configured fact limit.
    #[error("{field} exceeds limit of {limit} (got {actual})")]
    FactLimit {
        field: &'static str,
        limit: usize,
        actual: usize,
    },

    /// A firing pass failed for a reason other than a timeout.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// No session exists for the tenant.
    #[error("no session for tenant '{0}'")]
    UnknownTenant(TenantId),

    /// The rule store failed.
    #[error("rule store error: {0}")]
    Store(String),

    /// The engine configuration is invalid.
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Whether this is a security-class failure.
    pub fn is_isolation_violation(&self) -> bool {
        matches!(self, Self::TenantIsolation(_))
    }

    /// Whether this is an abandoned firing pass.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::EvaluationTimeout { .. })
    }
}
