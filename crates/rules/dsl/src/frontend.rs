//! YAML rule file frontend with grammar v1 expressions.

use std::collections::HashSet;

use serde::Deserialize;

use tracewarden_core::Severity;
use tracewarden_rules::{RuleDefinition, RuleError, RuleFrontend};

use crate::parser::parse_rule_expression;

// ---------------------------------------------------------------------------
// Serde structures for the rule file format
// ---------------------------------------------------------------------------

/// Returns the default value `true` for serde.
const fn default_true() -> bool {
    true
}

/// Top-level rule file containing a list of rules.
#[derive(Debug, Deserialize)]
struct RuleFile {
    rules: Vec<FileRule>,
}

/// A single rule as written in a rule file.
#[derive(Debug, Deserialize)]
struct FileRule {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    /// Severity name, matched case-insensitively. Defaults to `MEDIUM`.
    severity: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    tags: Vec<String>,
    /// Grammar v1 source.
    expression: String,
}

impl FileRule {
    fn into_definition(self) -> Result<RuleDefinition, RuleError> {
        let severity = match &self.severity {
            Some(s) => s
                .parse::<Severity>()
                .map_err(|e| RuleError::Invalid(e.to_string()))?,
            None => Severity::default(),
        };
        Ok(
            RuleDefinition::new(self.id, self.name, self.expression)
                .with_description(self.description)
                .with_severity(severity)
                .with_enabled(self.enabled)
                .with_tags(self.tags),
        )
    }
}

// ---------------------------------------------------------------------------
// Frontend
// ---------------------------------------------------------------------------

/// Loads rule definitions from YAML files.
///
/// ```yaml
/// rules:
///   - id: unchecked-payment
///     name: Payment without fraud check
///     severity: high
///     expression: trace.has(payment.charge_card) and not trace.has(payment.fraud_check)
/// ```
///
/// Every expression is parsed while loading, so a file with one bad rule is
/// rejected as a whole and the error names the offending rule.
#[derive(Debug, Default, Clone, Copy)]
pub struct DslFrontend;

impl DslFrontend {
    /// Read a rule file without parsing the expressions.
    ///
    /// Tools that report every broken rule at once use this and parse each
    /// expression themselves.
    pub fn read_unchecked(content: &str) -> Result<Vec<RuleDefinition>, RuleError> {
        let file: RuleFile = serde_yaml_ng::from_str(content)
            .map_err(|e| RuleError::Load(format!("invalid rule file: {e}")))?;

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(file.rules.len());
        for rule in file.rules {
            let id = rule.id.clone();
            if !seen.insert(id.clone()) {
                return Err(RuleError::Invalid(format!("duplicate rule id '{id}'")));
            }
            out.push(rule.into_definition().map_err(|e| e.in_rule(&id))?);
        }
        Ok(out)
    }
}

impl RuleFrontend for DslFrontend {
    fn extensions(&self) -> &[&str] {
        &["yaml", "yml"]
    }

    fn parse(&self, content: &str) -> Result<Vec<RuleDefinition>, RuleError> {
        let definitions = Self::read_unchecked(content)?;
        for def in &definitions {
            parse_rule_expression(&def.expression).map_err(|e| e.in_rule(def.id.as_str()))?;
        }
        Ok(definitions)
    }
}

#[cfg(test)]
mod tests {
    use tracewarden_rules::ParseErrorKind;

    use super::*;

    #[test]
    fn loads_rules_with_defaults() {
        let yaml = r#"
rules:
  - id: unchecked-payment
    name: Payment without fraud check
    severity: high
    tags: [payments]
    expression: trace.has(payment.charge_card) and not trace.has(payment.fraud_check)
  - id: retry-storm
    name: Retry storm
    enabled: false
    expression: "trace.count(retry.attempt) > 3"
"#;
        let rules = DslFrontend.parse(yaml).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id.as_str(), "unchecked-payment");
        assert_eq!(rules[0].severity, Severity::High);
        assert_eq!(rules[0].tags, vec!["payments".to_owned()]);
        assert!(rules[0].enabled);
        assert_eq!(rules[1].severity, Severity::Medium);
        assert!(!rules[1].enabled);
        assert_eq!(rules[1].description, "");
    }

    #[test]
    fn bad_expression_names_rule() {
        let yaml = r"
rules:
  - id: broken
    name: Broken
    expression: trace.has(unclosed
";
        let err = DslFrontend.parse(yaml).unwrap_err();
        assert!(err.to_string().starts_with("rule 'broken':"));
        assert!(matches!(
            err.root(),
            RuleError::Parse(p) if p.kind == ParseErrorKind::UnclosedDelimiter
        ));
    }

    #[test]
    fn unchecked_read_keeps_broken_expressions() {
        let yaml = r"
rules:
  - id: broken
    name: Broken
    expression: trace.has(unclosed
  - id: fine
    name: Fine
    expression: trace.has(a.one)
";
        let rules = DslFrontend::read_unchecked(yaml).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].expression, "trace.has(unclosed");
    }

    #[test]
    fn unknown_severity_is_invalid() {
        let yaml = r"
rules:
  - id: r1
    name: R1
    severity: apocalyptic
    expression: trace.has(a.one)
";
        let err = DslFrontend.parse(yaml).unwrap_err();
        assert!(matches!(err.root(), RuleError::Invalid(_)));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let yaml = r"
rules:
  - id: r1
    name: R1
    expression: trace.has(a.one)
  - id: r1
    name: R1 again
    expression: trace.has(b.two)
";
        let err = DslFrontend.parse(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate rule id 'r1'"));
    }

    #[test]
    fn malformed_yaml_is_load_error() {
        assert!(matches!(
            DslFrontend.parse("rules: [unterminated"),
            Err(RuleError::Load(_))
        ));
    }

    #[test]
    fn extensions() {
        assert_eq!(DslFrontend.extensions(), &["yaml", "yml"]);
    }
}
