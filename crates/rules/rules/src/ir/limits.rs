use serde::{Deserialize, Serialize};

use crate::error::RuleError;
use crate::ir::rule::RuleDefinition;

/// Default maximum rule name length in bytes.
pub const DEFAULT_MAX_NAME_LEN: usize = 255;

/// Default maximum description length in bytes.
pub const DEFAULT_MAX_DESCRIPTION_LEN: usize = 2_000;

/// Default maximum expression length in bytes.
pub const DEFAULT_MAX_EXPRESSION_LEN: usize = 5_000;

/// Default maximum number of tags per rule.
pub const DEFAULT_MAX_TAGS: usize = 32;

/// Default maximum number of rules deployed for one tenant.
pub const DEFAULT_MAX_RULES_PER_TENANT: usize = 10_000;

/// Size limits applied to rule definitions before they are parsed.
///
/// Lengths are measured in bytes. A value exactly at the limit is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleLimits {
    pub max_name_len: usize,
    pub max_description_len: usize,
    pub max_expression_len: usize,
    pub max_tags: usize,
    pub max_rules_per_tenant: usize,
}

impl Default for RuleLimits {
    fn default() -> Self {
        Self {
            max_name_len: DEFAULT_MAX_NAME_LEN,
            max_description_len: DEFAULT_MAX_DESCRIPTION_LEN,
            max_expression_len: DEFAULT_MAX_EXPRESSION_LEN,
            max_tags: DEFAULT_MAX_TAGS,
            max_rules_per_tenant: DEFAULT_MAX_RULES_PER_TENANT,
        }
    }
}

impl RuleLimits {
    /// Check a definition against every per-rule limit.
    pub fn check(&self, def: &RuleDefinition) -> Result<(), RuleError> {
        if def.id.trim().is_empty() {
            return Err(RuleError::Invalid("rule id must not be empty".into()));
        }
        if def.name.trim().is_empty() {
            return Err(RuleError::Invalid("rule name must not be empty".into()));
        }
        within("name", def.name.len(), self.max_name_len)?;
        within(
            "description",
            def.description.len(),
            self.max_description_len,
        )?;
        within("expression", def.expression.len(), self.max_expression_len)?;
        within("tags", def.tags.len(), self.max_tags)
    }

    /// Check the size of a tenant's rule set.
    pub fn check_rule_count(&self, count: usize) -> Result<(), RuleError> {
        within("rule count", count, self.max_rules_per_tenant)
    }

    /// Reject limits that would refuse every rule.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("max_name_len", self.max_name_len),
            ("max_description_len", self.max_description_len),
            ("max_expression_len", self.max_expression_len),
            ("max_tags", self.max_tags),
            ("max_rules_per_tenant", self.max_rules_per_tenant),
        ] {
            if value == 0 {
                return Err(format!("rules.{field} must be greater than zero"));
            }
        }
        Ok(())
    }
}

fn within(field: &'static str, actual: usize, limit: usize) -> Result<(), RuleError> {
    if actual > limit {
        Err(RuleError::LimitExceeded {
            field,
            limit,
            actual,
        })
    } else {
        Ok(())
    }
}
