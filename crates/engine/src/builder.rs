use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Semaphore;

use tracewarden_violations::ViolationSink;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::metrics::{MetricsHooks, NoopMetrics};
use crate::ruleset::RuleCompiler;
use crate::store::RuleStore;

/// Fluent builder for constructing an [`Engine`].
///
/// Every field is optional: the default engine uses
/// [`EngineConfig::default`], publishes to no sink, discards metrics, and
/// has no rule store.
pub struct EngineBuilder {
    config: EngineConfig,
    sink: Option<Arc<dyn ViolationSink>>,
    metrics: Arc<dyn MetricsHooks>,
    store: Option<Arc<dyn RuleStore>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            sink: None,
            metrics: Arc::new(NoopMetrics),
            store: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Where emitted violations are published.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn ViolationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsHooks>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The store [`Engine::load_tenant_rules`] reads from.
    #[must_use]
    pub fn rule_store(mut self, store: Arc<dyn RuleStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate the configuration and build the engine.
    pub fn build(self) -> Result<Engine, EngineError> {
        self.config.validate()?;
        let pool = Arc::new(Semaphore::new(self.config.max_concurrent_firings));
        Ok(Engine {
            compiler: RuleCompiler::new(self.config.rules.clone()),
            config: Arc::new(self.config),
            sessions: DashMap::new(),
            pool,
            sink: self.sink,
            metrics: self.metrics,
            store: self.store,
        })
    }
}
