//! The multi-tenant front door.
//!
//! The engine keeps one isolated [`TenantSession`] per tenant. Tenants never
//! share facts, rule sets, or dedup ledgers; they only share the worker pool
//! that bounds how many firing passes run at once.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use tracewarden_core::{RuleId, Span, TenantId, TenantIsolationError};
use tracewarden_rules::{Lint, RuleDefinition};
use tracewarden_violations::ViolationSink;

use crate::builder::EngineBuilder;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::facts::InsertOutcome;
use crate::metrics::MetricsHooks;
use crate::ruleset::{RuleCompiler, RuleSet};
use crate::session::{FiringResult, TenantSession};
use crate::store::RuleStore;

/// Summary of a rule deployment.
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub tenant: TenantId,
    /// Content hash of the deployed rule set.
    pub version: String,
    pub rules: usize,
    pub enabled: usize,
    /// Advisory findings; none of them blocked the deployment.
    pub lints: Vec<(RuleId, Lint)>,
}

/// Per-tenant sessions plus shared compilation and worker pool.
pub struct Engine {
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) compiler: RuleCompiler,
    pub(crate) sessions: DashMap<TenantId, Arc<TenantSession>>,
    pub(crate) pool: Arc<Semaphore>,
    pub(crate) sink: Option<Arc<dyn ViolationSink>>,
    pub(crate) metrics: Arc<dyn MetricsHooks>,
    pub(crate) store: Option<Arc<dyn RuleStore>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("tenants", &self.sessions.len())
            .field("has_sink", &self.sink.is_some())
            .field("has_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The session for `tenant`, created on first use.
    pub fn session(&self, tenant: &TenantId) -> Arc<TenantSession> {
        if let Some(existing) = self.sessions.get(tenant) {
            return Arc::clone(existing.value());
        }
        let entry = self.sessions.entry(tenant.clone()).or_insert_with(|| {
            info!(tenant = %tenant, "session created");
            Arc::new(TenantSession::new(
                tenant.clone(),
                Arc::clone(&self.config),
                Arc::clone(&self.pool),
                self.sink.clone(),
                Arc::clone(&self.metrics),
            ))
        });
        Arc::clone(entry.value())
    }

    /// The session for `tenant`, if one exists.
    pub fn get_session(&self, tenant: &TenantId) -> Option<Arc<TenantSession>> {
        self.sessions.get(tenant).map(|s| Arc::clone(s.value()))
    }

    /// Tenants with a live session, sorted.
    pub fn tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        tenants.sort();
        tenants
    }

    /// Compile and deploy a tenant's rule set.
    ///
    /// The set is all or nothing: if any rule fails to parse, compile, or
    /// fit the limits, the previous set stays active.
    pub fn deploy_rules(
        &self,
        tenant: &TenantId,
        definitions: Vec<RuleDefinition>,
    ) -> Result<DeployReport, EngineError> {
        let (rules, lints) = self
            .compiler
            .compile_all(definitions)
            .inspect_err(|e| warn!(tenant = %tenant, error = %e, "rule set rejected"))?;
        for (rule, l) in &lints {
            warn!(tenant = %tenant, rule = %rule, lint = %l, "rule lint");
        }
        Ok(self.install(tenant, rules, lints))
    }

    /// Deploy an already-built rule set, for example one holding custom
    /// matchers.
    pub fn deploy_rule_set(
        &self,
        tenant: &TenantId,
        rules: RuleSet,
    ) -> Result<DeployReport, EngineError> {
        self.compiler.limits().check_rule_count(rules.len())?;
        Ok(self.install(tenant, rules, Vec::new()))
    }

    fn install(&self, tenant: &TenantId, rules: RuleSet, lints: Vec<(RuleId, Lint)>) -> DeployReport {
        let session = self.session(tenant);
        session.deploy(rules);
        let active = session.rules();
        DeployReport {
            tenant: tenant.clone(),
            version: active.version().to_owned(),
            rules: active.len(),
            enabled: active.enabled().count(),
            lints,
        }
    }

    /// Rebuild and deploy a tenant's rules from the configured store.
    ///
    /// Stored artifacts are used when present so rules are not re-parsed. A
    /// damaged artifact fails the load; it is never silently replaced by a
    /// re-parse of the source.
    #[instrument(skip_all, fields(tenant = %tenant))]
    pub async fn load_tenant_rules(&self, tenant: &TenantId) -> Result<DeployReport, EngineError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| EngineError::Store("no rule store configured".into()))?;
        let definitions = store.load_by_tenant(tenant).await?;
        self.compiler.limits().check_rule_count(definitions.len())?;

        let mut rules = Vec::with_capacity(definitions.len());
        let mut lints = Vec::new();
        for def in definitions {
            let id = def.id.clone();
            let compiled = match store.load_artifact(tenant, &id).await? {
                Some(artifact) => {
                    if artifact.definition.expression != def.expression {
                        warn!(rule = %id, "stored artifact is stale; recompiling from source");
                        self.compiler.compile(def)
                    } else {
                        self.compiler.compile_parsed(def, artifact.expression)
                    }
                }
                None => self.compiler.compile(def),
            }
            .map_err(|e| e.in_rule(id.as_str()))?;
            lints.extend(compiled.lints.into_iter().map(|l| (id.clone(), l)));
            rules.push(compiled.rule);
        }

        let report = self.install(tenant, RuleSet::new(rules), lints);
        info!(tenant = %tenant, rules = report.rules, "rules loaded from store");
        Ok(report)
    }

    /// Insert one span into its tenant's session.
    ///
    /// `tenant` is the caller's authenticated scope; a span tagged with any
    /// other tenant is refused.
    pub async fn insert(&self, tenant: &TenantId, span: Span) -> Result<InsertOutcome, EngineError> {
        self.session(tenant).insert(span).await
    }

    /// Insert a batch into a tenant's session and fire once.
    pub async fn insert_batch(
        &self,
        tenant: &TenantId,
        spans: Vec<Span>,
    ) -> Result<FiringResult, EngineError> {
        self.session(tenant).insert_batch(spans).await
    }

    /// Fire a tenant's session.
    pub async fn fire_all(&self, tenant: &TenantId) -> Result<FiringResult, EngineError> {
        self.get_session(tenant)
            .ok_or_else(|| EngineError::UnknownTenant(tenant.clone()))?
            .fire_all()
            .await
    }

    /// Fire every session concurrently. A failure in one tenant does not
    /// affect the others.
    pub async fn fire_all_tenants(&self) -> Vec<(TenantId, Result<FiringResult, EngineError>)> {
        let sessions: Vec<Arc<TenantSession>> =
            self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        let mut results = join_all(sessions.into_iter().map(|session| async move {
            let result = session.fire_all().await;
            (session.tenant().clone(), result)
        }))
        .await;
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Check that `session` is the one this engine holds for `tenant`.
    pub fn verify_session(&self, tenant: &TenantId, session: &TenantSession) -> Result<(), EngineError> {
        TenantIsolationError::check(tenant, session.tenant(), "session lookup").map_err(|e| {
            self.metrics.record_isolation_violation();
            EngineError::from(e)
        })
    }

    /// Drop a tenant's session with all its facts.
    pub fn teardown(&self, tenant: &TenantId) -> bool {
        let removed = self.sessions.remove(tenant).is_some();
        if removed {
            info!(tenant = %tenant, "session torn down");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use tracewarden_violations_memory::MemoryViolationSink;

    use super::*;
    use crate::store::MemoryRuleStore;

    fn def(id: &str, expr: &str) -> RuleDefinition {
        RuleDefinition::new(id, format!("rule {id}"), expr)
    }

    #[test]
    fn build_rejects_invalid_config() {
        let err = Engine::builder()
            .config(EngineConfig::default().with_max_concurrent_firings(0))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn sessions_are_created_once() {
        let engine = Engine::builder().build().unwrap();
        let a = TenantId::new("a");
        let first = engine.session(&a);
        let second = engine.session(&a);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.tenants(), vec![a.clone()]);
        assert!(engine.teardown(&a));
        assert!(!engine.teardown(&a));
        assert!(engine.get_session(&a).is_none());
    }

    #[test]
    fn failed_deploy_keeps_previous_rules() {
        let engine = Engine::builder().build().unwrap();
        let a = TenantId::new("a");
        let report = engine
            .deploy_rules(&a, vec![def("r1", "trace.has(payment.charge_card)")])
            .unwrap();
        assert_eq!(report.rules, 1);

        let err = engine
            .deploy_rules(&a, vec![def("r2", "trace.has(")])
            .unwrap_err();
        assert!(matches!(err, EngineError::Rule(_)));
        assert_eq!(engine.session(&a).rules().version(), report.version);
    }

    #[test]
    fn deploy_reports_lints() {
        let engine = Engine::builder().build().unwrap();
        let report = engine
            .deploy_rules(&TenantId::new("a"), vec![def("r1", "trace.has(checkout)")])
            .unwrap();
        assert_eq!(report.lints.len(), 1);
        assert_eq!(report.lints[0].0.as_str(), "r1");
    }

    #[test]
    fn verify_session_checks_tenant() {
        let engine = Engine::builder().build().unwrap();
        let b = engine.session(&TenantId::new("b"));
        assert!(engine.verify_session(&TenantId::new("b"), &b).is_ok());
        let err = engine.verify_session(&TenantId::new("a"), &b).unwrap_err();
        assert!(err.is_isolation_violation());
    }

    #[tokio::test]
    async fn fire_unknown_tenant() {
        let engine = Engine::builder().build().unwrap();
        assert!(matches!(
            engine.fire_all(&TenantId::new("nobody")).await,
            Err(EngineError::UnknownTenant(_))
        ));
    }

    #[tokio::test]
    async fn load_without_store_fails() {
        let engine = Engine::builder().build().unwrap();
        assert!(matches!(
            engine.load_tenant_rules(&TenantId::new("a")).await,
            Err(EngineError::Store(_))
        ));
    }

    #[tokio::test]
    async fn load_tenant_rules_from_store() {
        let store = Arc::new(MemoryRuleStore::new());
        let a = TenantId::new("a");
        let b = TenantId::new("b");
        store.save(&a, &def("r1", "trace.count(retry.attempt) > 3")).await.unwrap();
        store.save(&b, &def("r9", "trace.has(other.op)")).await.unwrap();

        let sink = Arc::new(MemoryViolationSink::new());
        let engine = Engine::builder()
            .rule_store(store)
            .sink(sink.clone())
            .build()
            .unwrap();
        let report = engine.load_tenant_rules(&a).await.unwrap();
        assert_eq!(report.rules, 1);
        assert!(engine.session(&a).rules().get(&RuleId::new("r9")).is_none());

        let spans = (0..4)
            .map(|i| Span::new("a", "t1", format!("s{i}"), "retry.attempt", "client"))
            .collect();
        let result = engine.insert_batch(&a, spans).await.unwrap();
        assert_eq!(result.violations.len(), 1);
        assert_eq!(sink.by_tenant(&a).len(), 1);
        assert!(sink.by_tenant(&b).is_empty());
    }

    #[tokio::test]
    async fn fire_all_tenants_is_per_tenant() {
        let engine = Engine::builder().build().unwrap();
        for t in ["a", "b"] {
            let tenant = TenantId::new(t);
            engine
                .deploy_rules(&tenant, vec![def("r1", "trace.has(payment.charge_card)")])
                .unwrap();
            engine
                .insert(&tenant, Span::new(t, "t1", "s1", "payment.charge_card", "pay"))
                .await
                .unwrap();
        }
        let results = engine.fire_all_tenants().await;
        assert_eq!(results.len(), 2);
        for (tenant, result) in results {
            let result = result.unwrap();
            assert_eq!(result.violations.len(), 1);
            assert_eq!(result.violations[0].tenant(), &tenant);
        }
    }
}
