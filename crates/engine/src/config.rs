use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tracewarden_core::Span;
use tracewarden_rules::RuleLimits;
use tracewarden_violations::DedupWindow;

use crate::error::EngineError;

/// Default bound for a single `fire_all` pass: 2 seconds.
pub const DEFAULT_FIRE_TIMEOUT_MS: u64 = 2_000;

/// Default bound for an `insert_batch` pass: 10 seconds.
pub const DEFAULT_BATCH_TIMEOUT_MS: u64 = 10_000;

/// Default number of firing passes that may run at once across all sessions.
pub const DEFAULT_MAX_CONCURRENT_FIRINGS: usize = 8;

/// Default maximum number of facts held by one session.
pub const DEFAULT_MAX_FACTS_PER_SESSION: usize = 1_000_000;

/// Default maximum number of spans in one trace.
pub const DEFAULT_MAX_SPANS_PER_TRACE: usize = 100_000;

/// Default maximum number of attributes on one span.
pub const DEFAULT_MAX_ATTRIBUTES_PER_SPAN: usize = 10_000;

/// Default maximum attribute value length: 10 MB.
pub const DEFAULT_MAX_ATTRIBUTE_VALUE_LEN: usize = 10 * 1024 * 1024;

/// Bounds on the facts a session accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactLimits {
    pub max_facts_per_session: usize,
    pub max_spans_per_trace: usize,
    pub max_attributes_per_span: usize,
    /// Measured in bytes.
    pub max_attribute_value_len: usize,
}

impl Default for FactLimits {
    fn default() -> Self {
        Self {
            max_facts_per_session: DEFAULT_MAX_FACTS_PER_SESSION,
            max_spans_per_trace: DEFAULT_MAX_SPANS_PER_TRACE,
            max_attributes_per_span: DEFAULT_MAX_ATTRIBUTES_PER_SPAN,
            max_attribute_value_len: DEFAULT_MAX_ATTRIBUTE_VALUE_LEN,
        }
    }
}

impl FactLimits {
    /// Check the per-span limits.
    pub fn check_span(&self, span: &Span) -> Result<(), EngineError> {
        within(
            "attributes per span",
            span.attributes().len(),
            self.max_attributes_per_span,
        )?;
        within(
            "attribute value length",
            span.attributes().max_value_len(),
            self.max_attribute_value_len,
        )
    }

    fn validate(&self) -> Result<(), EngineError> {
        for (field, value) in [
            ("max_facts_per_session", self.max_facts_per_session),
            ("max_spans_per_trace", self.max_spans_per_trace),
            ("max_attributes_per_span", self.max_attributes_per_span),
            ("max_attribute_value_len", self.max_attribute_value_len),
        ] {
            if value == 0 {
                return Err(EngineError::InvalidConfig(format!(
                    "facts.{field} must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn within(field: &'static str, actual: usize, limit: usize) -> Result<(), EngineError> {
    if actual > limit {
        Err(EngineError::FactLimit {
            field,
            limit,
            actual,
        })
    } else {
        Ok(())
    }
}

/// Engine configuration, usually loaded from TOML.
///
/// ```toml
/// fire_timeout_ms = 2000
/// batch_timeout_ms = 10000
/// max_concurrent_firings = 8
/// dedup = "session"
///
/// [rules]
/// max_expression_len = 5000
///
/// [facts]
/// max_spans_per_trace = 100000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bound for a `fire_all` pass, in milliseconds.
    pub fire_timeout_ms: u64,
    /// Bound for an `insert_batch` pass, in milliseconds.
    pub batch_timeout_ms: u64,
    /// Size of the worker pool shared by every session.
    pub max_concurrent_firings: usize,
    pub dedup: DedupWindow,
    pub rules: RuleLimits,
    pub facts: FactLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fire_timeout_ms: DEFAULT_FIRE_TIMEOUT_MS,
            batch_timeout_ms: DEFAULT_BATCH_TIMEOUT_MS,
            max_concurrent_firings: DEFAULT_MAX_CONCURRENT_FIRINGS,
            dedup: DedupWindow::default(),
            rules: RuleLimits::default(),
            facts: FactLimits::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, EngineError> {
        let config: Self =
            toml::from_str(source).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            EngineError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Set the `fire_all` bound.
    #[must_use]
    pub fn with_fire_timeout(mut self, timeout: Duration) -> Self {
        self.fire_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the `insert_batch` bound.
    #[must_use]
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the worker pool size.
    #[must_use]
    pub fn with_max_concurrent_firings(mut self, n: usize) -> Self {
        self.max_concurrent_firings = n;
        self
    }

    /// Set the dedup window.
    #[must_use]
    pub fn with_dedup(mut self, dedup: DedupWindow) -> Self {
        self.dedup = dedup;
        self
    }

    /// Set the fact limits.
    #[must_use]
    pub fn with_fact_limits(mut self, facts: FactLimits) -> Self {
        self.facts = facts;
        self
    }

    /// Set the rule limits.
    #[must_use]
    pub fn with_rule_limits(mut self, rules: RuleLimits) -> Self {
        self.rules = rules;
        self
    }

    pub fn fire_timeout(&self) -> Duration {
        Duration::from_millis(self.fire_timeout_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Reject settings under which the engine could never fire.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.fire_timeout_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "fire_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.batch_timeout_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "batch_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.max_concurrent_firings == 0 {
            return Err(EngineError::InvalidConfig(
                "max_concurrent_firings must be greater than zero".into(),
            ));
        }
        self.rules.validate().map_err(EngineError::InvalidConfig)?;
        self.facts.validate()
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use tracewarden_core::AttributeValue;

    use super::*;

    #[test]
    fn defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.fire_timeout(), Duration::from_secs(2));
        assert_eq!(cfg.batch_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.max_concurrent_firings, 8);
        assert_eq!(cfg.dedup, DedupWindow::Session);
        assert_eq!(cfg.facts.max_attribute_value_len, 10 * 1024 * 1024);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn toml_overrides() {
        let cfg = EngineConfig::from_toml_str(
            r#"
fire_timeout_ms = 500
dedup = { ttl = { seconds = 30 } }

[rules]
max_name_len = 64

[facts]
max_spans_per_trace = 10
"#,
        )
        .unwrap();
        assert_eq!(cfg.fire_timeout(), Duration::from_millis(500));
        assert_eq!(cfg.batch_timeout_ms, DEFAULT_BATCH_TIMEOUT_MS);
        assert_eq!(cfg.dedup, DedupWindow::Ttl { seconds: 30 });
        assert_eq!(cfg.rules.max_name_len, 64);
        assert_eq!(cfg.rules.max_expression_len, 5_000);
        assert_eq!(cfg.facts.max_spans_per_trace, 10);
    }

    #[test]
    fn dedup_as_plain_string() {
        let cfg = EngineConfig::from_toml_str(r#"dedup = "batch""#).unwrap();
        assert_eq!(cfg.dedup, DedupWindow::Batch);
    }

    #[test]
    fn zero_values_rejected() {
        for src in [
            "fire_timeout_ms = 0",
            "batch_timeout_ms = 0",
            "max_concurrent_firings = 0",
            "[facts]\nmax_spans_per_trace = 0",
            "[rules]\nmax_name_len = 0",
        ] {
            let err = EngineConfig::from_toml_str(src).unwrap_err();
            assert!(matches!(err, EngineError::InvalidConfig(_)), "{src}");
        }
    }

    #[test]
    fn malformed_toml_rejected() {
        assert!(matches!(
            EngineConfig::from_toml_str("fire_timeout_ms = \"soon\""),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn builders() {
        let cfg = EngineConfig::default()
            .with_fire_timeout(Duration::from_millis(50))
            .with_batch_timeout(Duration::from_millis(75))
            .with_max_concurrent_firings(2);
        assert_eq!(cfg.fire_timeout_ms, 50);
        assert_eq!(cfg.batch_timeout_ms, 75);
        assert_eq!(cfg.max_concurrent_firings, 2);
    }

    #[test]
    fn attribute_limits_at_boundary() {
        let limits = FactLimits {
            max_attributes_per_span: 2,
            max_attribute_value_len: 4,
            ..FactLimits::default()
        };
        let ok = Span::new("t", "tr", "s", "a.op", "svc")
            .with_attribute("k1", "abcd")
            .with_attribute("k2", 1_i64);
        assert!(limits.check_span(&ok).is_ok());

        let long = Span::new("t", "tr", "s", "a.op", "svc").with_attribute("k1", "abcde");
        let err = limits.check_span(&long).unwrap_err();
        assert_eq!(
            err.to_string(),
            "attribute value length exceeds limit of 4 (got 5)"
        );

        let many = ok.with_attribute("k3", AttributeValue::Bool(true));
        assert!(matches!(
            limits.check_span(&many),
            Err(EngineError::FactLimit { field: "attributes per span", .. })
        ));
    }
}
