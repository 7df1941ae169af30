//! Condition expressions for branches and loop predicates
//!
//! Expressions are parsed into a small AST and evaluated against a read-only
//! JSON context. Only the roots present in that context can be referenced;
//! there are no function calls and no assignment.
//!
//! ```text
//! result.status == "ok" && state.attempts < 3
//! !success || error.code =~ "^TIMEOUT"
//! results.fetch.data.items contains "x"
//! ```

use regex::Regex;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MAX_DEPTH: usize = 64;

/// Ceiling on operator nodes in one expression; bounds the tree depth that
/// operator chains can reach
const MAX_NODES: usize = 512;

/// Errors raised while parsing or evaluating an expression
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionError {
    #[error("parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("type error: {0}")]
    Type(String),

    #[error("invalid regex '{pattern}': {message}")]
    Regex { pattern: String, message: String },

    #[error("division by zero")]
    DivisionByZero,
}

/// A parsed, reusable expression
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

/// Expression tree node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(Vec<PathSegment>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// One hop of a path expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Contains,
    Matches,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl Expression {
    /// Parse an expression from source text
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            nodes: 0,
            end: source.len(),
        };
        let root = parser.parse_expression()?;
        if let Some((token, position)) = parser.tokens.get(parser.pos) {
            return Err(ExpressionError::Parse {
                position: *position,
                message: format!("unexpected token {:?}", token),
            });
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// The original source text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The parsed tree
    pub fn root(&self) -> &Expr {
        &self.root
    }

    /// Evaluate to a JSON value
    pub fn evaluate(&self, context: &Value) -> Result<Value, ExpressionError> {
        eval(&self.root, context)
    }

    /// Evaluate and coerce the outcome to a boolean
    pub fn is_satisfied(&self, context: &Value) -> Result<bool, ExpressionError> {
        Ok(is_truthy(&self.evaluate(context)?))
    }
}

impl FromStr for Expression {
    type Err = ExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Expression::parse(s)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse and evaluate a condition in one go
pub fn evaluate_condition(source: &str, context: &Value) -> Result<bool, ExpressionError> {
    Expression::parse(source)?.is_satisfied(context)
}

/// Truthiness: null, false, 0, "" and [] are false; everything else is true
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Tilde,
    AndAnd,
    OrOr,
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExpressionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens: Vec<(Token, usize)> = Vec::new();
    let mut i = 0;

    let parse_error = |position: usize, message: String| ExpressionError::Parse { position, message };

    while i < chars.len() {
        let (pos, c) = chars[i];
        let peek = chars.get(i + 1).map(|(_, c)| *c);
        let peek2 = chars.get(i + 2).map(|(_, c)| *c);

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            // Directly after a dot only an integer index is allowed, so `a.0.1` stays a path
            let after_dot = matches!(tokens.last(), Some((Token::Dot, _)));
            let start = i;
            while i < chars.len() && chars[i].1.is_ascii_digit() {
                i += 1;
            }
            if !after_dot
                && i + 1 < chars.len()
                && chars[i].1 == '.'
                && chars[i + 1].1.is_ascii_digit()
            {
                i += 1;
                while i < chars.len() && chars[i].1.is_ascii_digit() {
                    i += 1;
                }
            }
            let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            let number = text
                .parse::<f64>()
                .map_err(|e| parse_error(pos, format!("invalid number '{}': {}", text, e)))?;
            tokens.push((Token::Number(number), pos));
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '$') {
                i += 1;
            }
            let word: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            tokens.push((Token::Ident(word), pos));
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let mut text = String::new();
            i += 1;
            let mut closed = false;
            while i < chars.len() {
                let ch = chars[i].1;
                if ch == '\\' {
                    let escaped = chars
                        .get(i + 1)
                        .map(|(_, c)| *c)
                        .ok_or_else(|| parse_error(pos, "unterminated escape".to_string()))?;
                    match escaped {
                        'n' => text.push('\n'),
                        't' => text.push('\t'),
                        'r' => text.push('\r'),
                        '\\' | '"' | '\'' => text.push(escaped),
                        // Unknown escapes are kept verbatim so regex classes like \w survive
                        other => {
                            text.push('\\');
                            text.push(other);
                        }
                    }
                    i += 2;
                    continue;
                }
                if ch == quote {
                    closed = true;
                    i += 1;
                    break;
                }
                text.push(ch);
                i += 1;
            }
            if !closed {
                return Err(parse_error(pos, "unterminated string literal".to_string()));
            }
            tokens.push((Token::Str(text), pos));
            continue;
        }

        let (token, width) = match (c, peek, peek2) {
            ('=', Some('='), Some('=')) => (Token::EqEq, 3),
            ('=', Some('='), _) => (Token::EqEq, 2),
            ('=', Some('~'), _) => (Token::Tilde, 2),
            ('!', Some('='), Some('=')) => (Token::NotEq, 3),
            ('!', Some('='), _) => (Token::NotEq, 2),
            ('!', _, _) => (Token::Bang, 1),
            ('<', Some('='), _) => (Token::LtEq, 2),
            ('<', _, _) => (Token::Lt, 1),
            ('>', Some('='), _) => (Token::GtEq, 2),
            ('>', _, _) => (Token::Gt, 1),
            ('&', Some('&'), _) => (Token::AndAnd, 2),
            ('|', Some('|'), _) => (Token::OrOr, 2),
            ('+', _, _) => (Token::Plus, 1),
            ('-', _, _) => (Token::Minus, 1),
            ('*', _, _) => (Token::Star, 1),
            ('/', _, _) => (Token::Slash, 1),
            ('%', _, _) => (Token::Percent, 1),
            ('.', _, _) => (Token::Dot, 1),
            ('(', _, _) => (Token::LParen, 1),
            (')', _, _) => (Token::RParen, 1),
            ('[', _, _) => (Token::LBracket, 1),
            (']', _, _) => (Token::RBracket, 1),
            _ => return Err(parse_error(pos, format!("unexpected character '{}'", c))),
        };
        tokens.push((token, pos));
        i += width;
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
    nodes: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, p)| *p).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, ExpressionError> {
        Err(ExpressionError::Parse {
            position: self.position(),
            message: message.into(),
        })
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word == keyword)
    }

    fn count_node(&mut self) -> Result<(), ExpressionError> {
        self.nodes += 1;
        if self.nodes > MAX_NODES {
            return self.error("expression too complex");
        }
        Ok(())
    }

    fn binary(&mut self, op: BinaryOp, left: Expr, right: Expr) -> Result<Expr, ExpressionError> {
        self.count_node()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_expression(&mut self) -> Result<Expr, ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return self.error("expression nested too deeply");
        }
        let expr = self.parse_or();
        self.depth -= 1;
        expr
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::OrOr)) || self.peek_keyword("or") {
            self.advance();
            let right = self.parse_and()?;
            left = self.binary(BinaryOp::Or, left, right)?;
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Some(Token::AndAnd)) || self.peek_keyword("and") {
            self.advance();
            let right = self.parse_not()?;
            left = self.binary(BinaryOp::And, left, right)?;
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ExpressionError> {
        if matches!(self.peek(), Some(Token::Bang)) || self.peek_keyword("not") {
            self.advance();
            self.depth += 1;
            if self.depth > MAX_DEPTH {
                return self.error("expression nested too deeply");
            }
            let operand = self.parse_not()?;
            self.depth -= 1;
            self.count_node()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::NotEq,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::LtEq) => BinaryOp::LtEq,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::GtEq) => BinaryOp::GtEq,
            Some(Token::Tilde) => BinaryOp::Matches,
            Some(Token::Ident(word)) if word == "contains" => BinaryOp::Contains,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        self.binary(op, left, right)
    }

    fn parse_additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = self.binary(op, left, right)?;
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = self.binary(op, left, right)?;
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.advance();
            self.depth += 1;
            if self.depth > MAX_DEPTH {
                return self.error("expression nested too deeply");
            }
            let operand = self.parse_unary()?;
            self.depth -= 1;
            self.count_node()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Negate,
                operand: Box::new(operand),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number_value(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::LParen) => {
                let inner = self.parse_expression()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => {
                        self.pos = self.pos.saturating_sub(1);
                        self.error("expected ')'")
                    }
                }
            }
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
                _ => self.parse_path(word),
            },
            Some(other) => {
                self.pos -= 1;
                self.error(format!("unexpected token {:?}", other))
            }
            None => self.error("unexpected end of expression"),
        }
    }

    fn parse_path(&mut self, root: String) -> Result<Expr, ExpressionError> {
        let mut segments = vec![PathSegment::Key(root)];
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(key)) => segments.push(PathSegment::Key(key)),
                        Some(Token::Number(n)) if n >= 0.0 && n.fract() == 0.0 => {
                            segments.push(PathSegment::Index(n as usize))
                        }
                        _ => {
                            self.pos = self.pos.saturating_sub(1);
                            return self.error("expected field name after '.'");
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let segment = match self.advance() {
                        Some(Token::Str(key)) => PathSegment::Key(key),
                        Some(Token::Number(n)) if n >= 0.0 && n.fract() == 0.0 => {
                            PathSegment::Index(n as usize)
                        }
                        _ => {
                            self.pos = self.pos.saturating_sub(1);
                            return self.error("expected string key or index inside '[]'");
                        }
                    };
                    if !matches!(self.advance(), Some(Token::RBracket)) {
                        self.pos = self.pos.saturating_sub(1);
                        return self.error("expected ']'");
                    }
                    segments.push(segment);
                }
                _ => return Ok(Expr::Path(segments)),
            }
        }
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval(expr: &Expr, context: &Value) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(segments) => Ok(lookup(context, segments).cloned().unwrap_or(Value::Null)),
        Expr::Unary { op, operand } => {
            let value = eval(operand, context)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!is_truthy(&value))),
                UnaryOp::Negate => match value.as_f64() {
                    Some(n) => Ok(number_value(-n)),
                    None => Err(ExpressionError::Type(format!("cannot negate {}", type_name(&value)))),
                },
            }
        }
        Expr::Binary { op, left, right } => match op {
            BinaryOp::And => {
                let l = eval(left, context)?;
                if !is_truthy(&l) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(is_truthy(&eval(right, context)?)))
            }
            BinaryOp::Or => {
                let l = eval(left, context)?;
                if is_truthy(&l) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(is_truthy(&eval(right, context)?)))
            }
            _ => {
                let l = eval(left, context)?;
                let r = eval(right, context)?;
                apply_binary(*op, &l, &r)
            }
        },
    }
}

fn lookup<'a>(context: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    segments.iter().try_fold(context, |current, segment| match segment {
        PathSegment::Key(key) => current.as_object()?.get(key),
        PathSegment::Index(index) => current.as_array()?.get(*index),
    })
}

fn apply_binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, ExpressionError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(l, r))),
        BinaryOp::NotEq => Ok(Value::Bool(!loose_eq(l, r))),
        BinaryOp::Lt => Ok(Value::Bool(compare(l, r) == Some(Ordering::Less))),
        BinaryOp::LtEq => Ok(Value::Bool(matches!(compare(l, r), Some(Ordering::Less | Ordering::Equal)))),
        BinaryOp::Gt => Ok(Value::Bool(compare(l, r) == Some(Ordering::Greater))),
        BinaryOp::GtEq => Ok(Value::Bool(matches!(compare(l, r), Some(Ordering::Greater | Ordering::Equal)))),
        BinaryOp::Contains => Ok(Value::Bool(contains(l, r))),
        BinaryOp::Matches => {
            let pattern = r.as_str().ok_or_else(|| {
                ExpressionError::Type(format!("regex pattern must be a string, got {}", type_name(r)))
            })?;
            let regex = Regex::new(pattern).map_err(|e| ExpressionError::Regex {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;
            Ok(Value::Bool(l.as_str().map(|s| regex.is_match(s)).unwrap_or(false)))
        }
        BinaryOp::Add => match (l, r) {
            (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, display(b)))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{}", display(a), b))),
            _ => arithmetic(op, l, r),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, l, r),
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit operators are handled in eval"),
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, ExpressionError> {
    let (a, b) = match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(ExpressionError::Type(format!(
                "arithmetic on {} and {}",
                type_name(l),
                type_name(r)
            )))
        }
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b == 0.0 => return Err(ExpressionError::DivisionByZero),
        BinaryOp::Div => a / b,
        BinaryOp::Rem if b == 0.0 => return Err(ExpressionError::DivisionByZero),
        BinaryOp::Rem => a % b,
        _ => unreachable!("not an arithmetic operator"),
    };
    Ok(number_value(result))
}

fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => l == r,
    }
}

fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Number(_), Value::Number(_)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        Value::Object(map) => needle.as_str().map(|k| map.contains_key(k)).unwrap_or(false),
        _ => false,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
