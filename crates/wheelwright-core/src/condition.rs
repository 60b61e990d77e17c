//! Conditional step execution expressions.
//!
//! A small fixed grammar over matrix attributes and prior step results:
//!
//! ```text
//! matrix.os == 'ubuntu-latest'
//! matrix.runtime >= '3.10' && matrix.compiler != 'msvc'
//! matrix.os in [ubuntu-latest, macos-14] || succeeded('build wheel')
//! ```
//!
//! Expressions are parsed when the matrix is expanded, so a malformed
//! condition fails the run before any job starts. Evaluation is total:
//! a comparison against an attribute the job does not carry is false,
//! never an error.

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::job::StepResult;

/// Evaluation inputs for one step of one job.
#[derive(Debug)]
pub struct EvalContext<'a> {
    /// Resolved matrix attributes of the job.
    pub attributes: &'a IndexMap<String, String>,
    /// The job's role, addressable as `matrix.role`.
    pub role: &'a str,
    /// Results of the steps that already ran in this job.
    pub prior: &'a [StepResult],
}

impl<'a> EvalContext<'a> {
    fn attribute(&self, name: &str) -> Option<&'a str> {
        if name == "role" {
            Some(self.role)
        } else {
            self.attributes.get(name).map(String::as_str)
        }
    }

    fn step_succeeded(&self, name: &str) -> bool {
        self.prior
            .iter()
            .any(|r| r.name == name && r.status.is_succeeded())
    }
}

/// A parsed, reusable step condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self> {
        let fail = |message: String| Error::InvalidCondition {
            expression: source.to_string(),
            message,
        };
        let tokens = lex(source).map_err(fail)?;
        if tokens.is_empty() {
            return Err(fail("empty expression".to_string()));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or().map_err(fail)?;
        if parser.pos != parser.tokens.len() {
            return Err(fail("unexpected trailing input".to_string()));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Attribute names the expression reads.
    pub fn references(&self) -> Vec<&str> {
        let mut attrs = Vec::new();
        let mut steps = Vec::new();
        collect_refs(&self.expr, &mut attrs, &mut steps);
        attrs
    }

    /// Step names the expression reads through `succeeded()`.
    pub fn step_references(&self) -> Vec<&str> {
        let mut attrs = Vec::new();
        let mut steps = Vec::new();
        collect_refs(&self.expr, &mut attrs, &mut steps);
        steps
    }

    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> bool {
        eval(&self.expr, ctx)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    /// A `matrix.<name>` reference.
    Attribute(String),
    Literal(String),
    /// The `*` wildcard, equal to any present value.
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Const(bool),
    Compare {
        lhs: Operand,
        op: CompareOp,
        rhs: Operand,
    },
    In {
        lhs: Operand,
        values: Vec<String>,
    },
    StepSucceeded(String),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

fn collect_refs<'e>(expr: &'e Expr, attrs: &mut Vec<&'e str>, steps: &mut Vec<&'e str>) {
    match expr {
        Expr::Const(_) => {}
        Expr::Compare { lhs, rhs, .. } => {
            for operand in [lhs, rhs] {
                if let Operand::Attribute(name) = operand {
                    attrs.push(name);
                }
            }
        }
        Expr::In { lhs, .. } => {
            if let Operand::Attribute(name) = lhs {
                attrs.push(name);
            }
        }
        Expr::StepSucceeded(name) => steps.push(name),
        Expr::And(a, b) | Expr::Or(a, b) => {
            collect_refs(a, attrs, steps);
            collect_refs(b, attrs, steps);
        }
    }
}

enum Resolved<'a> {
    Value(&'a str),
    Any,
    Missing,
}

fn resolve<'a>(operand: &'a Operand, ctx: &EvalContext<'a>) -> Resolved<'a> {
    match operand {
        Operand::Any => Resolved::Any,
        Operand::Literal(value) => Resolved::Value(value),
        Operand::Attribute(name) => match ctx.attribute(name) {
            Some(value) => Resolved::Value(value),
            None => Resolved::Missing,
        },
    }
}

fn eval<'a>(expr: &'a Expr, ctx: &EvalContext<'a>) -> bool {
    match expr {
        Expr::Const(value) => *value,
        Expr::And(a, b) => eval(a, ctx) && eval(b, ctx),
        Expr::Or(a, b) => eval(a, ctx) || eval(b, ctx),
        Expr::StepSucceeded(name) => ctx.step_succeeded(name),
        Expr::In { lhs, values } => match resolve(lhs, ctx) {
            Resolved::Value(v) => values.iter().any(|candidate| candidate == v),
            Resolved::Any => !values.is_empty(),
            Resolved::Missing => false,
        },
        Expr::Compare { lhs, op, rhs } => compare(resolve(lhs, ctx), *op, resolve(rhs, ctx)),
    }
}

fn compare(lhs: Resolved<'_>, op: CompareOp, rhs: Resolved<'_>) -> bool {
    match (lhs, rhs) {
        (Resolved::Missing, _) | (_, Resolved::Missing) => false,
        // The wildcard matches any present value under equality and
        // nothing under the other operators.
        (Resolved::Any, _) | (_, Resolved::Any) => matches!(op, CompareOp::Eq),
        (Resolved::Value(a), Resolved::Value(b)) => match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            CompareOp::Lt => segment_cmp(a, b) == Ordering::Less,
            CompareOp::Le => segment_cmp(a, b) != Ordering::Greater,
            CompareOp::Gt => segment_cmp(a, b) == Ordering::Greater,
            CompareOp::Ge => segment_cmp(a, b) != Ordering::Less,
        },
    }
}

/// Compare dot-separated segments numerically where both sides are
/// integers, lexicographically otherwise, so that "3.10" orders after
/// "3.9".
fn segment_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(nx), Ok(ny)) => nx.cmp(&ny),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Star,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

type ParseResult<T> = std::result::Result<T, String>;

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn lex(input: &str) -> ParseResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == quote {
                        closed = true;
                        break;
                    }
                    value.push(next);
                }
                if !closed {
                    return Err("unterminated string literal".to_string());
                }
                tokens.push(Token::Str(value));
            }
            '=' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Eq);
                } else {
                    return Err("single '=' is not an operator, use '=='".to_string());
                }
            }
            '!' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Ne);
                } else {
                    return Err("expected '!='".to_string());
                }
            }
            '<' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.next_if_eq(&'=').is_some() {
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '&' => {
                chars.next();
                if chars.next_if_eq(&'&').is_some() {
                    tokens.push(Token::And);
                } else {
                    return Err("expected '&&'".to_string());
                }
            }
            '|' => {
                chars.next();
                if chars.next_if_eq(&'|').is_some() {
                    tokens.push(Token::Or);
                } else {
                    return Err("expected '||'".to_string());
                }
            }
            c if is_word_char(c) => {
                let mut word = String::new();
                while let Some(&w) = chars.peek() {
                    if is_word_char(w) {
                        word.push(w);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(word));
            }
            other => {
                return Err(format!("unexpected character '{}'", other));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token, what: &str) -> ParseResult<()> {
        match self.advance() {
            Some(ref token) if token == expected => Ok(()),
            _ => Err(format!("expected {}", what)),
        }
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_primary()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let right = self.parse_primary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        match self.peek() {
            Some(Token::LParen) => {
                self.advance();
                let inner = self.parse_or()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Word(w))
                if w == "succeeded" && matches!(self.peek_at(1), Some(Token::LParen)) =>
            {
                self.advance();
                self.advance();
                let step = match self.advance() {
                    Some(Token::Str(s)) | Some(Token::Word(s)) => s,
                    _ => return Err("expected a step name in succeeded()".to_string()),
                };
                self.expect(&Token::RParen, "')' after succeeded()")?;
                Ok(Expr::StepSucceeded(step))
            }
            _ => self.parse_comparison(),
        }
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let lhs = self.parse_operand()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(CompareOp::Eq),
            Some(Token::Ne) => Some(CompareOp::Ne),
            Some(Token::Lt) => Some(CompareOp::Lt),
            Some(Token::Le) => Some(CompareOp::Le),
            Some(Token::Gt) => Some(CompareOp::Gt),
            Some(Token::Ge) => Some(CompareOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let rhs = self.parse_operand()?;
            return Ok(Expr::Compare { lhs, op, rhs });
        }
        if matches!(self.peek(), Some(Token::Word(w)) if w == "in") {
            self.advance();
            let values = self.parse_list()?;
            return Ok(Expr::In { lhs, values });
        }
        // A bare `true` or `false` is a valid expression on its own.
        if let Operand::Literal(ref word) = lhs {
            if word == "true" {
                return Ok(Expr::Const(true));
            }
            if word == "false" {
                return Ok(Expr::Const(false));
            }
        }
        Err("expected a comparison operator or 'in'".to_string())
    }

    fn parse_list(&mut self) -> ParseResult<Vec<String>> {
        self.expect(&Token::LBracket, "'[' after 'in'")?;
        let mut values = Vec::new();
        loop {
            match self.advance() {
                Some(Token::RBracket) if values.is_empty() => break,
                Some(Token::Str(s)) | Some(Token::Word(s)) => {
                    values.push(s);
                    match self.advance() {
                        Some(Token::Comma) => continue,
                        Some(Token::RBracket) => break,
                        _ => return Err("expected ',' or ']' in list".to_string()),
                    }
                }
                _ => return Err("expected a literal value in list".to_string()),
            }
        }
        Ok(values)
    }

    fn parse_operand(&mut self) -> ParseResult<Operand> {
        match self.advance() {
            Some(Token::Star) => Ok(Operand::Any),
            Some(Token::Str(s)) => Ok(Operand::Literal(s)),
            Some(Token::Word(w)) => {
                if let Some(name) = w.strip_prefix("matrix.") {
                    if name.is_empty() || name.contains('.') {
                        return Err(format!("invalid attribute reference '{}'", w));
                    }
                    Ok(Operand::Attribute(name.to_string()))
                } else {
                    Ok(Operand::Literal(w))
                }
            }
            Some(_) => Err("expected a value".to_string()),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{SkipReason, StepStatus};
    use chrono::Utc;

    fn attrs(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn step_result(name: &str, status: StepStatus) -> StepResult {
        StepResult {
            name: name.to_string(),
            status,
            exit_code: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            error: None,
            started_at: Utc::now(),
            duration_ms: 0,
            attempts: 1,
        }
    }

    fn check(expr: &str, pairs: &[(&str, &str)]) -> bool {
        let attributes = attrs(pairs);
        let ctx = EvalContext {
            attributes: &attributes,
            role: "test",
            prior: &[],
        };
        Condition::parse(expr).unwrap().evaluate(&ctx)
    }

    #[test]
    fn test_equality() {
        assert!(check("matrix.os == 'ubuntu-latest'", &[("os", "ubuntu-latest")]));
        assert!(!check("matrix.os == 'macos-14'", &[("os", "ubuntu-latest")]));
        assert!(check("matrix.os != 'macos-14'", &[("os", "ubuntu-latest")]));
    }

    #[test]
    fn test_unquoted_literals() {
        assert!(check("matrix.os == ubuntu-latest", &[("os", "ubuntu-latest")]));
        assert!(check("matrix.runtime == 3.10", &[("runtime", "3.10")]));
    }

    #[test]
    fn test_missing_attribute_is_false_not_error() {
        assert!(!check("matrix.compiler == 'gcc-11'", &[("os", "linux")]));
        // The lenient rule applies to != as well: no attribute, no match.
        assert!(!check("matrix.compiler != 'gcc-11'", &[("os", "linux")]));
        assert!(!check("matrix.compiler >= '2'", &[("os", "linux")]));
    }

    #[test]
    fn test_numeric_segment_ordering() {
        assert!(check("matrix.runtime >= '3.10'", &[("runtime", "3.10")]));
        assert!(check("matrix.runtime < '3.10'", &[("runtime", "3.9")]));
        assert!(check("matrix.runtime > '3.9'", &[("runtime", "3.10")]));
        assert!(!check("matrix.runtime > '3.9'", &[("runtime", "3.9")]));
    }

    #[test]
    fn test_lexicographic_fallback() {
        assert!(check("matrix.os < 'ubuntu'", &[("os", "macos")]));
        assert!(check("matrix.compiler > 'gcc-10'", &[("compiler", "gcc-9")]));
    }

    #[test]
    fn test_in_list() {
        let pairs = &[("os", "macos-14")];
        assert!(check("matrix.os in [ubuntu-latest, macos-14]", pairs));
        assert!(!check("matrix.os in [ubuntu-latest, windows-2022]", pairs));
        assert!(!check("matrix.os in []", pairs));
    }

    #[test]
    fn test_boolean_operators_and_precedence() {
        let pairs = &[("os", "linux"), ("runtime", "3.9")];
        assert!(check(
            "matrix.os == 'linux' && matrix.runtime == '3.9'",
            pairs
        ));
        assert!(!check(
            "matrix.os == 'linux' && matrix.runtime == '3.10'",
            pairs
        ));
        // && binds tighter than ||.
        assert!(check(
            "matrix.os == 'bsd' || matrix.os == 'linux' && matrix.runtime == '3.9'",
            pairs
        ));
        assert!(!check(
            "(matrix.os == 'bsd' || matrix.os == 'linux') && matrix.runtime == '3.10'",
            pairs
        ));
    }

    #[test]
    fn test_wildcard() {
        assert!(check("matrix.os == *", &[("os", "anything")]));
        assert!(!check("matrix.os != *", &[("os", "anything")]));
        assert!(!check("matrix.compiler == *", &[("os", "linux")]));
    }

    #[test]
    fn test_role_attribute() {
        let attributes = attrs(&[("os", "linux")]);
        let ctx = EvalContext {
            attributes: &attributes,
            role: "build-wheel",
            prior: &[],
        };
        let cond = Condition::parse("matrix.role == 'build-wheel'").unwrap();
        assert!(cond.evaluate(&ctx));
    }

    #[test]
    fn test_succeeded() {
        let attributes = attrs(&[]);
        let prior = vec![
            step_result("build", StepStatus::Succeeded),
            step_result("lint", StepStatus::SoftFailed),
        ];
        let ctx = EvalContext {
            attributes: &attributes,
            role: "test",
            prior: &prior,
        };
        assert!(Condition::parse("succeeded('build')").unwrap().evaluate(&ctx));
        assert!(!Condition::parse("succeeded('lint')").unwrap().evaluate(&ctx));
        assert!(!Condition::parse("succeeded('missing')").unwrap().evaluate(&ctx));
    }

    #[test]
    fn test_skipped_step_is_not_succeeded() {
        let attributes = attrs(&[]);
        let prior = vec![step_result(
            "build",
            StepStatus::Skipped(SkipReason::ConditionUnmet),
        )];
        let ctx = EvalContext {
            attributes: &attributes,
            role: "test",
            prior: &prior,
        };
        assert!(!Condition::parse("succeeded('build')").unwrap().evaluate(&ctx));
    }

    #[test]
    fn test_bare_boolean() {
        assert!(check("true", &[]));
        assert!(!check("false", &[]));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Condition::parse("").is_err());
        assert!(Condition::parse("matrix.os = 'x'").is_err());
        assert!(Condition::parse("matrix.os == 'x' &&").is_err());
        assert!(Condition::parse("matrix.os == 'unterminated").is_err());
        assert!(Condition::parse("matrix.os == 'x' extra").is_err());
        assert!(Condition::parse("matrix. == 'x'").is_err());
        assert!(Condition::parse("matrix.os in [a b]").is_err());
        assert!(Condition::parse("(matrix.os == 'x'").is_err());
    }

    #[test]
    fn test_references() {
        let cond = Condition::parse(
            "matrix.os == 'linux' && matrix.runtime >= '3.9' || succeeded('build')",
        )
        .unwrap();
        assert_eq!(cond.references(), vec!["os", "runtime"]);
        assert_eq!(cond.step_references(), vec!["build"]);
    }
}
