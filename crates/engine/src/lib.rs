//! Multi-tenant rule evaluation over trace spans.
//!
//! Each tenant gets a [`TenantSession`] holding its compiled [`RuleSet`]
//! and its span facts. Inserting spans never fires rules; [`fire_all`] and
//! [`insert_batch`] evaluate every enabled rule under a wall-clock bound and
//! hand matches to a deduplicating emitter, which publishes the resulting
//! violations to a sink.
//!
//! [`fire_all`]: TenantSession::fire_all
//! [`insert_batch`]: TenantSession::insert_batch

pub mod builder;
pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod facts;
pub mod metrics;
pub mod ruleset;
pub mod session;
pub mod store;

pub use builder::EngineBuilder;
pub use capability::ViolationCapability;
pub use config::{EngineConfig, FactLimits};
pub use engine::{DeployReport, Engine};
pub use error::EngineError;
pub use facts::{FactSnapshot, FactStore, InsertOutcome};
pub use metrics::{EngineMetrics, MetricsHooks, MetricsSnapshot, NoopMetrics};
pub use ruleset::{CompiledRule, RuleCompiler, RuleSet};
pub use session::{FiringResult, SessionPhase, TenantSession};
pub use store::{MemoryRuleStore, RuleMetadata, RuleStore};
