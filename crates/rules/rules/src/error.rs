use std::fmt;

use thiserror::Error;

/// Broad category of a rule-language parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The expression is empty or whitespace only.
    Empty,
    /// A token appeared where it is not allowed.
    UnexpectedToken,
    /// A required token (parenthesis, operator, operand) is missing.
    MissingToken,
    /// A parenthesis, bracket, or quote was opened and never closed.
    UnclosedDelimiter,
    /// An operator that the language does not recognise.
    InvalidOperator,
    /// A malformed operation name or field identifier.
    InvalidIdentifier,
    /// A malformed literal value.
    InvalidValue,
    /// The input ended before the expression was complete.
    UnexpectedEnd,
    /// Syntax that is deliberately outside grammar v1.
    Unsupported,
}

impl ParseErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty expression",
            Self::UnexpectedToken => "unexpected token",
            Self::MissingToken => "missing token",
            Self::UnclosedDelimiter => "unclosed delimiter",
            Self::InvalidOperator => "invalid operator",
            Self::InvalidIdentifier => "invalid identifier",
            Self::InvalidValue => "invalid value",
            Self::UnexpectedEnd => "unexpected end of input",
            Self::Unsupported => "unsupported syntax",
        }
    }
}

/// A rule-language parse failure with its position in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Byte offset into the source.
    pub offset: usize,
    /// 1-based line number.
    pub line: usize,
    /// 1-based column number, counted in characters.
    pub column: usize,
    pub suggestion: Option<String>,
}

impl ParseError {
    /// Build an error positioned at `offset` within `source`.
    pub fn at(
        kind: ParseErrorKind,
        message: impl Into<String>,
        source: &str,
        offset: usize,
    ) -> Self {
        let offset = offset.min(source.len());
        let prefix = source.get(..offset).unwrap_or(source);
        let line = prefix.matches('\n').count() + 1;
        let line_start = prefix.rfind('\n').map_or(0, |i| i + 1);
        let column = prefix[line_start..].chars().count() + 1;
        Self {
            kind,
            message: message.into(),
            offset,
            line,
            column,
            suggestion: None,
        }
    }

    /// Attach a hint for the rule author.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Render the error with the offending source line and a caret.
    pub fn render(&self, source: &str) -> String {
        let line_text = source.lines().nth(self.line - 1).unwrap_or("");
        let gutter = self.line.to_string();
        let pad = " ".repeat(gutter.len());
        let caret = " ".repeat(self.column.saturating_sub(1));
        let mut out = format!(
            "{}: {}\n{pad} |\n{gutter} | {line_text}\n{pad} | {caret}^",
            self.kind.as_str(),
            self.message
        );
        if let Some(hint) = &self.suggestion {
            out.push_str(&format!("\n{pad} = help: {hint}"));
        }
        out
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at line {}, column {}",
            self.message, self.line, self.column
        )?;
        if let Some(hint) = &self.suggestion {
            write!(f, " ({hint})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Errors that can occur while loading, validating, compiling, or storing rules.
#[derive(Debug, Error)]
pub enum RuleError {
    /// Malformed rule text.
    #[error("parse error: {0}")]
    Parse(ParseError),

    /// A syntactically valid expression that cannot be turned into a matcher.
    #[error("compile error: {0}")]
    Compile(String),

    /// A rule field is longer (or a rule set larger) than the configured limit.
    #[error("{field} exceeds limit of {limit} (got {actual})")]
    LimitExceeded {
        field: &'static str,
        limit: usize,
        actual: usize,
    },

    /// A rule definition is missing a required value.
    #[error("invalid rule: {0}")]
    Invalid(String),

    /// A stored rule artifact failed structural or checksum validation.
    #[error("corrupted rule artifact: {0}")]
    CorruptedState(String),

    /// The AST has a shape that grammar v1 text cannot express.
    #[error("expression not representable in grammar v1: {0}")]
    Unrepresentable(String),

    /// Rule source could not be read or decoded.
    #[error("rule load error: {0}")]
    Load(String),

    /// An error attributed to a specific rule.
    #[error("rule '{rule}': {source}")]
    InRule {
        rule: String,
        #[source]
        source: Box<RuleError>,
    },
}

impl RuleError {
    /// Attribute this error to a rule id.
    #[must_use]
    pub fn in_rule(self, rule: impl Into<String>) -> Self {
        Self::InRule {
            rule: rule.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with rule attribution stripped.
    pub fn root(&self) -> &RuleError {
        match self {
            Self::InRule { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<ParseError> for RuleError {
    fn from(e: ParseError) -> Self {
        Self::Parse(e)
    }
}
