use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use tracewarden_core::{RuleId, Severity, TenantId};
use tracewarden_rules::{RuleArtifact, RuleDefinition, RuleError};
use tracewarden_rules_dsl::parse_rule_expression;

use crate::error::EngineError;

/// The stored facts about a rule the engine needs to rebuild it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMetadata {
    pub expression: String,
    pub severity: Severity,
    /// Where the compiled artifact lives, if one was stored.
    pub artifact_ref: Option<String>,
}

/// Durable storage for tenant rules.
///
/// Every lookup is scoped by tenant; a store never returns one tenant's
/// rules for another.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Insert or replace a rule.
    async fn save(&self, tenant: &TenantId, definition: &RuleDefinition)
    -> Result<(), EngineError>;

    /// Every rule stored for `tenant`, ordered by id.
    async fn load_by_tenant(&self, tenant: &TenantId) -> Result<Vec<RuleDefinition>, EngineError>;

    async fn load_metadata(
        &self,
        tenant: &TenantId,
        rule_id: &RuleId,
    ) -> Result<Option<RuleMetadata>, EngineError>;

    /// The stored compiled artifact. A damaged artifact is an error, not
    /// `None`.
    async fn load_artifact(
        &self,
        tenant: &TenantId,
        rule_id: &RuleId,
    ) -> Result<Option<RuleArtifact>, EngineError>;
}

#[derive(Debug, Clone)]
struct StoredRule {
    definition: RuleDefinition,
    artifact: Vec<u8>,
}

/// In-memory rule store using `DashMap`. Suitable for development and
/// testing.
///
/// `save` parses the expression and keeps an encoded [`RuleArtifact`] next
/// to the definition, so a rule that does not parse is never stored.
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    rules: DashMap<(TenantId, RuleId), StoredRule>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored rules across all tenants.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn artifact_ref(tenant: &TenantId, rule_id: &RuleId) -> String {
    format!("memory://{tenant}/{rule_id}")
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn save(
        &self,
        tenant: &TenantId,
        definition: &RuleDefinition,
    ) -> Result<(), EngineError> {
        let ast = parse_rule_expression(&definition.expression)
            .map_err(|e| e.in_rule(definition.id.as_str()))?;
        let artifact = RuleArtifact::new(definition.clone(), ast).encode()?;
        self.rules.insert(
            (tenant.clone(), definition.id.clone()),
            StoredRule {
                definition: definition.clone(),
                artifact,
            },
        );
        Ok(())
    }

    async fn load_by_tenant(&self, tenant: &TenantId) -> Result<Vec<RuleDefinition>, EngineError> {
        let mut defs: Vec<RuleDefinition> = self
            .rules
            .iter()
            .filter(|entry| &entry.key().0 == tenant)
            .map(|entry| entry.value().definition.clone())
            .collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(defs)
    }

    async fn load_metadata(
        &self,
        tenant: &TenantId,
        rule_id: &RuleId,
    ) -> Result<Option<RuleMetadata>, EngineError> {
        Ok(self
            .rules
            .get(&(tenant.clone(), rule_id.clone()))
            .map(|stored| RuleMetadata {
                expression: stored.definition.expression.clone(),
                severity: stored.definition.severity,
                artifact_ref: Some(artifact_ref(tenant, rule_id)),
            }))
    }

    async fn load_artifact(
        &self,
        tenant: &TenantId,
        rule_id: &RuleId,
    ) -> Result<Option<RuleArtifact>, EngineError> {
        let Some(stored) = self.rules.get(&(tenant.clone(), rule_id.clone())) else {
            return Ok(None);
        };
        let artifact = RuleArtifact::decode(&stored.artifact)
            .map_err(|e| EngineError::Rule(e.in_rule(rule_id.as_str())))?;
        if artifact.definition.id != *rule_id {
            return Err(EngineError::Rule(RuleError::CorruptedState(format!(
                "artifact for '{rule_id}' holds rule '{}'",
                artifact.definition.id
            ))));
        }
        Ok(Some(artifact))
    }
}
