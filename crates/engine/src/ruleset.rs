use std::collections::HashSet;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use tracewarden_core::RuleId;
use tracewarden_rules::{
    Expr, Lint, Rule, RuleDefinition, RuleError, RuleLimits, TraceMatcher, compile, lint,
};
use tracewarden_rules_dsl::parse_rule_expression;

/// A compiled rule together with its lint findings.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: Rule,
    pub lints: Vec<Lint>,
}

/// Validates, parses and compiles rule definitions.
#[derive(Debug, Clone, Default)]
pub struct RuleCompiler {
    limits: RuleLimits,
}

impl RuleCompiler {
    pub fn new(limits: RuleLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RuleLimits {
        &self.limits
    }

    /// Check limits, parse and compile one definition.
    pub fn compile(&self, definition: RuleDefinition) -> Result<CompiledRule, RuleError> {
        self.limits.check(&definition)?;
        let ast = parse_rule_expression(&definition.expression)?;
        lower(definition, ast)
    }

    /// Compile a definition whose expression is already parsed, for example
    /// one decoded from a stored artifact.
    pub fn compile_parsed(
        &self,
        definition: RuleDefinition,
        ast: Expr,
    ) -> Result<CompiledRule, RuleError> {
        self.limits.check(&definition)?;
        lower(definition, ast)
    }

    /// Compile a full rule set. The first failing rule aborts the whole set
    /// and the error names it.
    pub fn compile_all(
        &self,
        definitions: Vec<RuleDefinition>,
    ) -> Result<(RuleSet, Vec<(RuleId, Lint)>), RuleError> {
        self.limits.check_rule_count(definitions.len())?;
        let mut rules = Vec::with_capacity(definitions.len());
        let mut lints = Vec::new();
        let mut seen = HashSet::new();
        for def in definitions {
            let id = def.id.clone();
            if !seen.insert(id.clone()) {
                return Err(RuleError::Invalid(format!("duplicate rule id '{id}'")));
            }
            let compiled = self.compile(def).map_err(|e| e.in_rule(id.as_str()))?;
            lints.extend(compiled.lints.into_iter().map(|l| (id.clone(), l)));
            rules.push(compiled.rule);
        }
        Ok((RuleSet::new(rules), lints))
    }

    /// Wrap a caller-supplied matcher as a rule.
    pub fn custom(
        &self,
        definition: RuleDefinition,
        matcher: Arc<dyn TraceMatcher>,
    ) -> Result<Rule, RuleError> {
        if matcher.meta().id != definition.id {
            return Err(RuleError::Invalid(format!(
                "matcher reports rule id '{}' but the definition is '{}'",
                matcher.meta().id,
                definition.id
            )));
        }
        self.limits.check(&definition)?;
        Ok(Rule::from_matcher(definition, matcher))
    }
}

fn lower(definition: RuleDefinition, ast: Expr) -> Result<CompiledRule, RuleError> {
    let lints = lint(&ast);
    for l in &lints {
        debug!(rule = %definition.id, lint = %l, "rule lint");
    }
    let matcher = compile(&ast, definition.meta())?;
    Ok(CompiledRule {
        rule: Rule::new(definition, ast, Arc::new(matcher)),
        lints,
    })
}

/// An immutable, ordered set of compiled rules for one tenant.
///
/// Sessions hold a rule set behind an `Arc` and swap it wholesale on
/// redeployment; a pass already running keeps the set it started with.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    version: String,
}

impl RuleSet {
    /// Build a set ordered by rule id. A later rule with a repeated id
    /// replaces the earlier one.
    pub fn new(rules: Vec<Rule>) -> Self {
        let mut rules = rules;
        rules.sort_by(|a, b| a.id().cmp(b.id()));
        rules.dedup_by(|later, earlier| {
            if later.id() == earlier.id() {
                warn!(rule = %later.id(), "duplicate rule id; keeping the later definition");
                std::mem::swap(later, earlier);
                true
            } else {
                false
            }
        });
        let version = version_of(&rules);
        Self { rules, version }
    }

    /// Keep creation times of rules that existed in `previous`.
    #[must_use]
    pub fn succeeding(self, previous: &RuleSet) -> Self {
        let rules = self
            .rules
            .into_iter()
            .map(|rule| match previous.get(rule.id()) {
                Some(prev) => rule.replacing(prev),
                None => rule,
            })
            .collect();
        Self {
            rules,
            version: self.version,
        }
    }

    /// Content hash over rule ids, expressions and enablement.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Rules that take part in firing.
    pub fn enabled(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.enabled())
    }

    pub fn get(&self, id: &RuleId) -> Option<&Rule> {
        self.rules
            .binary_search_by(|r| r.id().cmp(id))
            .ok()
            .map(|i| &self.rules[i])
    }
}

fn version_of(rules: &[Rule]) -> String {
    let mut hasher = Sha256::new();
    for rule in rules {
        let def = rule.definition();
        hasher.update(def.id.as_bytes());
        hasher.update([0]);
        hasher.update(def.expression.as_bytes());
        hasher.update([0, u8::from(def.enabled)]);
    }
    hex::encode(hasher.finalize())
}
