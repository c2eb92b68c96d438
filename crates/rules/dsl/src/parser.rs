//! Hand-written recursive descent parser for the trace rule language
//! (grammar v1).
//!
//! ```text
//! expr      := term (("and" | "or") term)*
//! term      := "not"* atom
//! atom      := "trace.has(" pattern ")" [".where(" clause ")"]
//!            | "trace.count(" pattern ")" compareOp integer
//! clause    := field compareOp literal
//! compareOp := "==" | "!=" | ">" | ">=" | "<" | "<=" | "in" | "matches"
//! ```
//!
//! `and` and `or` share one precedence level and fold left to right. Grammar
//! v1 has no grouping parentheses and no `xor`; both are reported as
//! unsupported rather than guessed at. `nom` recognises tokens; the grammar
//! levels are plain methods so every failure can carry a byte offset into
//! the original source.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{opt, recognize, value},
    multi::many0,
    sequence::{pair, tuple},
};

use tracewarden_rules::ir::expr::is_identifier_char;
use tracewarden_rules::{
    CompareOp, Expr, Literal, OperationPattern, ParseError, ParseErrorKind, RuleError,
    WhereClause,
};

type PResult<'a, T> = Result<(&'a str, T), ParseError>;

/// Parse a complete rule expression.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    if source.trim().is_empty() {
        return Err(
            ParseError::at(ParseErrorKind::Empty, "empty expression", source, 0)
                .with_suggestion("write a predicate such as trace.has(payment.charge_card)"),
        );
    }
    check_delimiters(source)?;

    let parser = Parser { src: source };
    let (rest, expr) = parser.expr(source)?;
    let rest = skip_ws(rest);
    if !rest.is_empty() {
        return Err(parser.error(
            ParseErrorKind::UnexpectedToken,
            format!("unexpected {} after expression", describe(rest)),
            rest,
        ));
    }
    Ok(expr)
}

/// [`parse_expression`] with the error wrapped as a [`RuleError`].
pub fn parse_rule_expression(source: &str) -> Result<Expr, RuleError> {
    parse_expression(source).map_err(RuleError::Parse)
}

// ---------------------------------------------------------------------------
// Token helpers
// ---------------------------------------------------------------------------

fn skip_ws(input: &str) -> &str {
    multispace0::<_, nom::error::Error<&str>>(input).map_or(input, |(rest, _)| rest)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Match a keyword that is not the prefix of a longer word.
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input: &'a str| {
        let (rest, matched) = tag(word)(input)?;
        if rest.chars().next().is_some_and(is_word_char) {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )));
        }
        Ok((rest, matched))
    }
}

/// One identifier segment: a letter or `_`, then letters, digits, `_`, `-`.
fn segment(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(is_identifier_char),
    ))(input)
}

/// A dotted name such as `payment.charge_card` or `http.status_code`.
fn dotted(input: &str) -> IResult<&str, &str> {
    recognize(pair(segment, many0(pair(char('.'), segment))))(input)
}

fn compare_op(input: &str) -> IResult<&str, CompareOp> {
    alt((
        value(CompareOp::Eq, tag("==")),
        value(CompareOp::Ne, tag("!=")),
        value(CompareOp::Ge, tag(">=")),
        value(CompareOp::Le, tag("<=")),
        value(CompareOp::Gt, tag(">")),
        value(CompareOp::Lt, tag("<")),
        value(CompareOp::In, keyword("in")),
        value(CompareOp::Matches, keyword("matches")),
    ))(input)
}

fn number(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)
}

/// Short description of the next token for error messages.
fn describe(input: &str) -> String {
    let Some(first) = input.chars().next() else {
        return "end of input".to_owned();
    };
    if is_word_char(first) {
        let token: String = input
            .chars()
            .take_while(|c| is_word_char(*c) || *c == '.' || *c == '-')
            .collect();
        format!("'{token}'")
    } else {
        format!("'{first}'")
    }
}

// ---------------------------------------------------------------------------
// Delimiter pre-scan
// ---------------------------------------------------------------------------

/// Report unbalanced parentheses, brackets, and quotes before parsing, so
/// the error points at the delimiter that was left open.
fn check_delimiters(source: &str) -> Result<(), ParseError> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut string_start: Option<usize> = None;
    let mut escaped = false;

    for (i, c) in source.char_indices() {
        if string_start.is_some() {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                string_start = None;
            }
            continue;
        }
        match c {
            '"' => string_start = Some(i),
            '(' | '[' => stack.push((c, i)),
            ')' | ']' => {
                let opener = if c == ')' { '(' } else { '[' };
                match stack.pop() {
                    Some((open, _)) if open == opener => {}
                    Some((open, _)) => {
                        return Err(ParseError::at(
                            ParseErrorKind::UnexpectedToken,
                            format!("'{c}' does not close '{open}'"),
                            source,
                            i,
                        ));
                    }
                    None => {
                        return Err(ParseError::at(
                            ParseErrorKind::UnexpectedToken,
                            format!("unmatched '{c}'"),
                            source,
                            i,
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(at) = string_start {
        return Err(ParseError::at(
            ParseErrorKind::UnclosedDelimiter,
            "unterminated string literal",
            source,
            at,
        )
        .with_suggestion("add a closing '\"'"));
    }
    if let Some((open, at)) = stack.pop() {
        let (what, close) = if open == '(' {
            ("parenthesis", ')')
        } else {
            ("bracket", ']')
        };
        return Err(ParseError::at(
            ParseErrorKind::UnclosedDelimiter,
            format!("unclosed {what}"),
            source,
            at,
        )
        .with_suggestion(format!("add a matching '{close}'")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

struct Parser<'a> {
    src: &'a str,
}

impl<'a> Parser<'a> {
    fn error(&self, kind: ParseErrorKind, message: impl Into<String>, at: &str) -> ParseError {
        ParseError::at(kind, message, self.src, self.src.len() - at.len())
    }

    /// `term (("and" | "or") term)*`, folded left to right.
    fn expr(&self, input: &'a str) -> PResult<'a, Expr> {
        let (mut rest, mut lhs) = self.term(input)?;
        loop {
            let next = skip_ws(rest);
            if let Ok((after, _)) = keyword("and")(next) {
                let (after, rhs) = self.term(after)?;
                lhs = lhs.and(rhs);
                rest = after;
            } else if let Ok((after, _)) = keyword("or")(next) {
                let (after, rhs) = self.term(after)?;
                lhs = lhs.or(rhs);
                rest = after;
            } else if keyword("xor")(next).is_ok() {
                return Err(self
                    .error(
                        ParseErrorKind::Unsupported,
                        "'xor' is not supported in grammar v1",
                        next,
                    )
                    .with_suggestion("express it with 'and', 'or' and 'not'"));
            } else if next.starts_with("&&") || next.starts_with("||") {
                let word = if next.starts_with("&&") { "and" } else { "or" };
                return Err(self
                    .error(
                        ParseErrorKind::InvalidOperator,
                        format!("unknown operator '{}'", &next[..2]),
                        next,
                    )
                    .with_suggestion(format!("use '{word}'")));
            } else {
                return Ok((rest, lhs));
            }
        }
    }

    /// `"not"* atom`.
    fn term(&self, input: &'a str) -> PResult<'a, Expr> {
        let mut rest = skip_ws(input);
        let mut negations = 0usize;
        while let Ok((after, _)) = keyword("not")(rest) {
            negations += 1;
            rest = skip_ws(after);
        }
        if rest.starts_with('!') {
            return Err(self
                .error(ParseErrorKind::InvalidOperator, "unknown operator '!'", rest)
                .with_suggestion("use 'not'"));
        }
        let (rest, mut expr) = self.atom(rest)?;
        for _ in 0..negations {
            expr = expr.not();
        }
        Ok((rest, expr))
    }

    fn atom(&self, input: &'a str) -> PResult<'a, Expr> {
        if input.is_empty() {
            return Err(self.error(
                ParseErrorKind::UnexpectedEnd,
                "expected trace.has(...) or trace.count(...)",
                input,
            ));
        }
        if input.starts_with('(') {
            return Err(self
                .error(
                    ParseErrorKind::Unsupported,
                    "grouping parentheses are not supported in grammar v1",
                    input,
                )
                .with_suggestion("remove the parentheses; 'and' and 'or' apply left to right"));
        }
        let Ok((after_prefix, _)) = tag::<_, _, nom::error::Error<&str>>("trace.")(input) else {
            return Err(self.error(
                ParseErrorKind::UnexpectedToken,
                format!(
                    "expected trace.has(...) or trace.count(...), found {}",
                    describe(input)
                ),
                input,
            ));
        };
        match segment(after_prefix) {
            Ok((rest, "has")) => self.has(rest),
            Ok((rest, "count")) => self.count(rest),
            Ok((_, other)) => Err(self
                .error(
                    ParseErrorKind::InvalidIdentifier,
                    format!("unknown trace function '{other}'"),
                    after_prefix,
                )
                .with_suggestion("use trace.has(...) or trace.count(...)")),
            Err(_) => Err(self.error(
                ParseErrorKind::InvalidIdentifier,
                format!("expected has or count after 'trace.', found {}", describe(after_prefix)),
                after_prefix,
            )),
        }
    }

    fn open_paren(&self, input: &'a str, after: &str) -> Result<&'a str, ParseError> {
        let rest = skip_ws(input);
        rest.strip_prefix('(').ok_or_else(|| {
            self.error(
                ParseErrorKind::MissingToken,
                format!("expected '(' after {after}"),
                rest,
            )
        })
    }

    fn close_paren(&self, input: &'a str, after: &str) -> Result<&'a str, ParseError> {
        let rest = skip_ws(input);
        rest.strip_prefix(')').ok_or_else(|| {
            self.error(
                ParseErrorKind::UnexpectedToken,
                format!("expected ')' after {after}, found {}", describe(rest)),
                rest,
            )
        })
    }

    fn pattern(&self, input: &'a str, function: &str) -> PResult<'a, OperationPattern> {
        let input = skip_ws(input);
        if input.starts_with(')') {
            return Err(self
                .error(
                    ParseErrorKind::MissingToken,
                    format!("{function}() requires an operation name"),
                    input,
                )
                .with_suggestion(format!("for example {function}(payment.charge_card)")));
        }
        if input.starts_with('"') {
            return Err(self
                .error(
                    ParseErrorKind::InvalidIdentifier,
                    "operation names are not quoted",
                    input,
                )
                .with_suggestion(format!("write {function}(service.operation)")));
        }
        let Ok((rest, name)) = dotted(input) else {
            return Err(self.error(
                ParseErrorKind::InvalidIdentifier,
                format!(
                    "expected an operation name such as payment.charge_card, found {}",
                    describe(input)
                ),
                input,
            ));
        };
        if rest.starts_with('.') {
            return Err(self.error(
                ParseErrorKind::InvalidIdentifier,
                "operation name segments must be identifiers",
                rest,
            ));
        }
        Ok((rest, OperationPattern::new(name)))
    }

    fn has(&self, input: &'a str) -> PResult<'a, Expr> {
        let rest = self.open_paren(input, "trace.has")?;
        let (rest, pattern) = self.pattern(rest, "trace.has")?;
        let rest = self.close_paren(rest, "the operation name")?;
        let (rest, clause) = self.where_suffix(rest)?;
        if clause.is_some() {
            let next = skip_ws(rest);
            if next.starts_with('.') {
                return Err(self
                    .error(
                        ParseErrorKind::Unsupported,
                        "only one .where(...) clause is allowed per trace.has",
                        next,
                    )
                    .with_suggestion("combine the conditions with 'and' across two trace.has(...) predicates"));
            }
        }
        Ok((rest, Expr::Has { pattern, clause }))
    }

    fn where_suffix(&self, input: &'a str) -> PResult<'a, Option<WhereClause>> {
        let next = skip_ws(input);
        let Some(method) = next.strip_prefix('.') else {
            return Ok((input, None));
        };
        match segment(method) {
            Ok((rest, "where")) => {
                let rest = self.open_paren(rest, ".where")?;
                let (rest, clause) = self.clause(rest)?;
                let rest = self.close_paren(rest, "the where clause")?;
                Ok((rest, Some(clause)))
            }
            Ok((_, other)) => Err(self
                .error(
                    ParseErrorKind::InvalidIdentifier,
                    format!("unknown method '.{other}'"),
                    method,
                )
                .with_suggestion("only .where(...) is supported")),
            Err(_) => Err(self.error(
                ParseErrorKind::UnexpectedToken,
                format!("expected 'where' after '.', found {}", describe(method)),
                method,
            )),
        }
    }

    fn count(&self, input: &'a str) -> PResult<'a, Expr> {
        let rest = self.open_paren(input, "trace.count")?;
        let (rest, pattern) = self.pattern(rest, "trace.count")?;
        let rest = self.close_paren(rest, "the operation name")?;

        let next = skip_ws(rest);
        if next.starts_with('.') {
            return Err(self.error(
                ParseErrorKind::Unsupported,
                "where clauses are only supported on trace.has",
                next,
            ));
        }
        let Ok((rest, op)) = compare_op(next) else {
            return Err(self
                .error(
                    ParseErrorKind::MissingToken,
                    "trace.count(...) must be compared to a number",
                    next,
                )
                .with_suggestion(format!("for example trace.count({pattern}) > 3")));
        };
        if matches!(op, CompareOp::In | CompareOp::Matches) {
            return Err(self.error(
                ParseErrorKind::InvalidOperator,
                format!("trace.count(...) cannot use '{op}'"),
                next,
            ));
        }

        let start = skip_ws(rest);
        let threshold_error = |at: &str| {
            self.error(
                ParseErrorKind::InvalidValue,
                "count threshold must be a non-negative integer",
                at,
            )
        };
        let Ok((rest, digits)) = digit1::<_, nom::error::Error<&str>>(start) else {
            if start.is_empty() {
                return Err(self.error(
                    ParseErrorKind::UnexpectedEnd,
                    format!("expected a number after '{op}'"),
                    start,
                ));
            }
            return Err(threshold_error(start));
        };
        if rest.starts_with('.') || rest.chars().next().is_some_and(is_word_char) {
            return Err(threshold_error(start));
        }
        let threshold = digits.parse::<u64>().map_err(|_| threshold_error(start))?;
        Ok((
            rest,
            Expr::Count {
                pattern,
                op,
                threshold,
            },
        ))
    }

    /// `field compareOp literal`.
    fn clause(&self, input: &'a str) -> PResult<'a, WhereClause> {
        let start = skip_ws(input);
        if start.starts_with(')') {
            return Err(self
                .error(
                    ParseErrorKind::MissingToken,
                    ".where() requires a condition",
                    start,
                )
                .with_suggestion("for example .where(status == \"ERROR\")"));
        }
        let Ok((rest, field)) = dotted(start) else {
            return Err(self.error(
                ParseErrorKind::InvalidIdentifier,
                format!("expected a field name, found {}", describe(start)),
                start,
            ));
        };

        let next = skip_ws(rest);
        let (rest, op) = match compare_op(next) {
            Ok(found) => found,
            Err(_) if next.starts_with('=') => {
                return Err(self
                    .error(ParseErrorKind::InvalidOperator, "unknown operator '='", next)
                    .with_suggestion("use '==' for equality"));
            }
            Err(_) if next.is_empty() || next.starts_with(')') => {
                return Err(self.error(
                    ParseErrorKind::MissingToken,
                    format!("expected a comparison operator after '{field}'"),
                    next,
                ));
            }
            Err(_) => {
                return Err(self
                    .error(
                        ParseErrorKind::InvalidOperator,
                        format!("unknown operator {}", describe(next)),
                        next,
                    )
                    .with_suggestion("use ==, !=, >, >=, <, <=, in or matches"));
            }
        };

        let (rest, value) = self.literal(skip_ws(rest), true)?;
        Ok((rest, WhereClause::new(field, op, value)))
    }

    fn literal(&self, input: &'a str, allow_list: bool) -> PResult<'a, Literal> {
        if input.is_empty() || input.starts_with(')') {
            return Err(self.error(ParseErrorKind::MissingToken, "expected a value", input));
        }
        if input.starts_with('"') {
            return self.string(input);
        }
        if input.starts_with('[') {
            if !allow_list {
                return Err(self.error(
                    ParseErrorKind::InvalidValue,
                    "nested lists are not supported",
                    input,
                ));
            }
            return self.list(input);
        }
        if let Ok((rest, text)) = number(input) {
            if rest.starts_with('.') || rest.chars().next().is_some_and(is_word_char) {
                return Err(self.error(
                    ParseErrorKind::InvalidValue,
                    format!("malformed number {}", describe(input)),
                    input,
                ));
            }
            let parsed = if text.contains('.') {
                text.parse::<f64>().ok().map(Literal::Float)
            } else {
                text.parse::<i64>().ok().map(Literal::Int)
            };
            return parsed.map(|lit| (rest, lit)).ok_or_else(|| {
                self.error(
                    ParseErrorKind::InvalidValue,
                    format!("number {text} is out of range"),
                    input,
                )
            });
        }
        if let Ok((rest, _)) = keyword("true")(input) {
            return Ok((rest, Literal::Bool(true)));
        }
        if let Ok((rest, _)) = keyword("false")(input) {
            return Ok((rest, Literal::Bool(false)));
        }
        if let Ok((rest, ident)) = dotted(input) {
            return Ok((rest, Literal::String(ident.to_owned())));
        }
        Err(self.error(
            ParseErrorKind::InvalidValue,
            format!("expected a value, found {}", describe(input)),
            input,
        ))
    }

    /// A double-quoted string with `\"`, `\\`, `\n` and `\t` escapes.
    fn string(&self, input: &'a str) -> PResult<'a, Literal> {
        let body = &input[1..];
        let mut out = String::new();
        let mut chars = body.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => return Ok((&body[i + 1..], Literal::String(out))),
                '\\' => match chars.next() {
                    Some((_, '"')) => out.push('"'),
                    Some((_, '\\')) => out.push('\\'),
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, other)) => {
                        return Err(self.error(
                            ParseErrorKind::InvalidValue,
                            format!("unknown escape sequence '\\{other}'"),
                            &body[i..],
                        ));
                    }
                    None => break,
                },
                other => out.push(other),
            }
        }
        Err(self.error(
            ParseErrorKind::UnclosedDelimiter,
            "unterminated string literal",
            input,
        ))
    }

    /// `[literal, ...]`, one level deep.
    fn list(&self, input: &'a str) -> PResult<'a, Literal> {
        let mut rest = skip_ws(&input[1..]);
        let mut items = Vec::new();
        if let Some(after) = rest.strip_prefix(']') {
            return Ok((after, Literal::List(items)));
        }
        loop {
            let (after, item) = self.literal(rest, false)?;
            items.push(item);
            let next = skip_ws(after);
            if let Some(after) = next.strip_prefix(',') {
                rest = skip_ws(after);
            } else if let Some(after) = next.strip_prefix(']') {
                return Ok((after, Literal::List(items)));
            } else {
                return Err(self.error(
                    ParseErrorKind::UnexpectedToken,
                    format!("expected ',' or ']' in list, found {}", describe(next)),
                    next,
                ));
            }
        }
    }
}
