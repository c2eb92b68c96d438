use crate::error::RuleError;
use crate::ir::rule::RuleDefinition;

/// Trait for rule frontends that load rule definitions from various formats.
///
/// Implementations parse a file format (YAML, JSON, etc.) into
/// [`RuleDefinition`]s. Frontends are expected to reject definitions whose
/// expressions do not parse, so that a loaded rule is always compilable
/// syntax.
pub trait RuleFrontend: Send + Sync {
    /// Return the file extensions this frontend supports (e.g., `["yaml", "yml"]`).
    fn extensions(&self) -> &[&str];

    /// Parse rule definitions from string content.
    fn parse(&self, content: &str) -> Result<Vec<RuleDefinition>, RuleError>;

    /// Parse rule definitions from a file path.
    ///
    /// The default implementation reads the file and delegates to [`parse`](Self::parse).
    fn parse_file(&self, path: &std::path::Path) -> Result<Vec<RuleDefinition>, RuleError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RuleError::Load(format!("cannot read {}: {e}", path.display())))?;
        self.parse(&content)
    }
}
