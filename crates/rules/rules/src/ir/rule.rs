use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tracewarden_core::{RuleId, Severity};

use super::expr::Expr;
use crate::engine::TraceMatcher;

/// Identity and severity of a rule, carried by its compiled matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMeta {
    pub id: RuleId,
    pub name: String,
    pub severity: Severity,
}

impl RuleMeta {
    pub fn new(id: impl Into<RuleId>, name: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            severity,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A tenant-authored rule as stored and edited: source text plus metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Unique rule identifier within the tenant.
    pub id: RuleId,

    /// Human-readable name.
    pub name: String,

    /// Optional longer description.
    #[serde(default)]
    pub description: String,

    /// Severity attached to violations of this rule.
    #[serde(default)]
    pub severity: Severity,

    /// Rule expression in grammar v1.
    pub expression: String,

    /// Disabled rules are kept but never evaluated.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Free-form labels.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RuleDefinition {
    /// Create an enabled, `MEDIUM` severity rule with no description or tags.
    pub fn new(
        id: impl Into<RuleId>,
        name: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            severity: Severity::default(),
            expression: expression.into(),
            enabled: true,
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn meta(&self) -> RuleMeta {
        RuleMeta::new(self.id.clone(), self.name.clone(), self.severity)
    }
}

/// A compiled rule ready for evaluation.
///
/// A `Rule` is immutable. Editing a rule means compiling its new definition
/// into a new `Rule` and swapping it into the rule set; a live matcher is
/// never modified in place.
#[derive(Debug, Clone)]
pub struct Rule {
    definition: RuleDefinition,
    ast: Option<Expr>,
    matcher: Arc<dyn TraceMatcher>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Rule {
    /// Wrap a matcher compiled from `ast`.
    pub fn new(definition: RuleDefinition, ast: Expr, matcher: Arc<dyn TraceMatcher>) -> Self {
        let now = Utc::now();
        Self {
            definition,
            ast: Some(ast),
            matcher,
            created_at: now,
            updated_at: now,
        }
    }

    /// Wrap a matcher that was not produced from rule-language source.
    pub fn from_matcher(definition: RuleDefinition, matcher: Arc<dyn TraceMatcher>) -> Self {
        let now = Utc::now();
        Self {
            definition,
            ast: None,
            matcher,
            created_at: now,
            updated_at: now,
        }
    }

    /// Keep the original creation time when replacing an earlier version.
    #[must_use]
    pub fn replacing(mut self, previous: &Rule) -> Self {
        self.created_at = previous.created_at;
        self
    }

    pub fn id(&self) -> &RuleId {
        &self.definition.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn severity(&self) -> Severity {
        self.definition.severity
    }

    pub fn enabled(&self) -> bool {
        self.definition.enabled
    }

    pub fn definition(&self) -> &RuleDefinition {
        &self.definition
    }

    /// The parsed expression, if this rule came from rule-language source.
    pub fn ast(&self) -> Option<&Expr> {
        self.ast.as_ref()
    }

    pub fn matcher(&self) -> &Arc<dyn TraceMatcher> {
        &self.matcher
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
