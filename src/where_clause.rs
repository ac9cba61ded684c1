//! Where-clause compiler.
//!
//! A where clause is a free-text boolean expression over record fields, e.g.
//! `temp > 20 AND site = "north"`. Compilation first rewrites the word
//! connectives `AND`/`OR` that sit outside string literals to `&&`/`||`, then
//! parses the result into an [`Expr`] tree. Identifiers resolve to fields of
//! the entry passed to [`Predicate::matches`]; `true`/`false` in any case are
//! literals.
//!
//! Compiled predicates are shared through a [`PredicateCache`] keyed by the raw
//! clause text.

use rustc_hash::FxHashMap;
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{Result, TemporaError};
use crate::value::{self, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 3,
            BinaryOp::Concat => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Compiled expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Field(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Evaluates against one record; missing fields read as null.
    pub fn eval(&self, record: &Record) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Field(name) => record.get(name).cloned().unwrap_or(Value::Null),
            Expr::Unary(UnaryOp::Not, inner) => Value::Bool(!value::is_truthy(&inner.eval(record))),
            Expr::Unary(UnaryOp::Neg, inner) => match to_number(&inner.eval(record)) {
                Some(n) => value::number(-n),
                None => Value::Null,
            },
            Expr::Binary(BinaryOp::And, lhs, rhs) => Value::Bool(
                value::is_truthy(&lhs.eval(record)) && value::is_truthy(&rhs.eval(record)),
            ),
            Expr::Binary(BinaryOp::Or, lhs, rhs) => Value::Bool(
                value::is_truthy(&lhs.eval(record)) || value::is_truthy(&rhs.eval(record)),
            ),
            Expr::Binary(op, lhs, rhs) => apply_binary(*op, &lhs.eval(record), &rhs.eval(record)),
        }
    }
}

fn to_number(v: &Value) -> Option<f64> {
    match v {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        other => value::as_number(other),
    }
}

fn to_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string().to_uppercase(),
        other => other.to_string(),
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(_), Value::Number(_)) => {
            value::as_number(lhs)?.partial_cmp(&value::as_number(rhs)?)
        }
        _ => None,
    }
}

fn apply_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    let ordering = || compare(lhs, rhs);
    match op {
        BinaryOp::Eq => Value::Bool(ordering() == Some(Ordering::Equal)),
        BinaryOp::Ne => Value::Bool(ordering() != Some(Ordering::Equal)),
        BinaryOp::Lt => Value::Bool(ordering() == Some(Ordering::Less)),
        BinaryOp::Le => Value::Bool(matches!(ordering(), Some(Ordering::Less | Ordering::Equal))),
        BinaryOp::Gt => Value::Bool(ordering() == Some(Ordering::Greater)),
        BinaryOp::Ge => Value::Bool(matches!(
            ordering(),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::Concat => Value::String(to_text(lhs) + &to_text(rhs)),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let (Some(a), Some(b)) = (to_number(lhs), to_number(rhs)) else {
                return Value::Null;
            };
            let result = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div if b == 0.0 => return Value::Null,
                BinaryOp::Div => a / b,
                BinaryOp::Mod if b == 0.0 => return Value::Null,
                _ => a % b,
            };
            value::number(result)
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators short-circuit in eval"),
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

/// Rewrites `AND`/`OR` words outside double-quoted literals to `&&`/`||`.
///
/// A word counts as quoted when an odd number of `"` precede it.
pub fn rewrite_connectives(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + 8);
    let mut quotes = 0usize;
    let mut prev: Option<char> = None;
    let mut i = 0;

    while let Some(c) = source[i..].chars().next() {
        if c == '"' {
            quotes += 1;
        } else if quotes % 2 == 0 && !prev.is_some_and(is_ident_char) {
            let rest = &source[i..];
            let word = [("AND", "&&"), ("OR", "||")].into_iter().find(|(word, _)| {
                rest.starts_with(word)
                    && !rest[word.len()..].chars().next().is_some_and(is_ident_char)
            });
            if let Some((word, replacement)) = word {
                out.push_str(replacement);
                i += word.len();
                prev = word.chars().last();
                continue;
            }
        }
        out.push(c);
        prev = Some(c);
        i += c.len_utf8();
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Bool(bool),
    LParen,
    RParen,
    Not,
    Minus,
    Binary(BinaryOp),
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let err = |msg: String| TemporaError::value(format!("where clause: {}", msg));

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' => {
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(err("unterminated string literal".into())),
                        Some('"') if chars.get(i + 1) == Some(&'"') => {
                            text.push('"');
                            i += 2;
                        }
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            text.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && matches!(chars[i], 'e' | 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && matches!(chars[j], '+' | '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| err(format!("invalid number '{}'", text)))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                match name.to_ascii_lowercase().as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    _ => tokens.push(Token::Ident(name)),
                }
            }
            _ => {
                let (token, len) = match (c, next) {
                    ('&', Some('&')) => (Token::Binary(BinaryOp::And), 2),
                    ('|', Some('|')) => (Token::Binary(BinaryOp::Or), 2),
                    ('=', Some('=')) => (Token::Binary(BinaryOp::Eq), 2),
                    ('!', Some('=')) => (Token::Binary(BinaryOp::Ne), 2),
                    ('<', Some('>')) => (Token::Binary(BinaryOp::Ne), 2),
                    ('<', Some('=')) => (Token::Binary(BinaryOp::Le), 2),
                    ('>', Some('=')) => (Token::Binary(BinaryOp::Ge), 2),
                    ('=', _) => (Token::Binary(BinaryOp::Eq), 1),
                    ('<', _) => (Token::Binary(BinaryOp::Lt), 1),
                    ('>', _) => (Token::Binary(BinaryOp::Gt), 1),
                    ('&', _) => (Token::Binary(BinaryOp::Concat), 1),
                    ('+', _) => (Token::Binary(BinaryOp::Add), 1),
                    ('-', _) => (Token::Minus, 1),
                    ('*', _) => (Token::Binary(BinaryOp::Mul), 1),
                    ('/', _) => (Token::Binary(BinaryOp::Div), 1),
                    ('%', _) => (Token::Binary(BinaryOp::Mod), 1),
                    ('!', _) => (Token::Not, 1),
                    _ => return Err(err(format!("unexpected character '{}'", c))),
                };
                tokens.push(token);
                i += len;
            }
        }
    }
    Ok(tokens)
}

/// Deepest expression tree a where clause may produce.
const MAX_DEPTH: usize = 128;

fn too_deep() -> TemporaError {
    TemporaError::value("where clause nested too deeply")
}

/// Height of a new node over children of height `child`.
fn node_height(child: usize) -> Result<usize> {
    let height = child + 1;
    if height > MAX_DEPTH {
        return Err(too_deep());
    }
    Ok(height)
}

/// Precedence-climbing parser over the token stream.
///
/// `depth` counts the open parentheses and prefix operators being parsed, so
/// recursion is cut off on the way down. Subtree heights are returned
/// alongside each expression, which also bounds long operator chains.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_binary(&self) -> Option<BinaryOp> {
        match self.peek()? {
            Token::Binary(op) => Some(*op),
            Token::Minus => Some(BinaryOp::Sub),
            _ => None,
        }
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(too_deep());
        }
        Ok(())
    }

    fn parse_expr(&mut self, min_precedence: u8) -> Result<(Expr, usize)> {
        let (mut lhs, mut height) = self.parse_unary()?;
        while let Some(op) = self.peek_binary() {
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.pos += 1;
            let (rhs, rhs_height) = self.parse_expr(precedence + 1)?;
            height = node_height(height.max(rhs_height))?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok((lhs, height))
    }

    fn parse_prefix(&mut self, op: UnaryOp) -> Result<(Expr, usize)> {
        self.descend()?;
        let (inner, height) = self.parse_unary()?;
        self.depth -= 1;
        Ok((Expr::Unary(op, Box::new(inner)), node_height(height)?))
    }

    fn parse_unary(&mut self) -> Result<(Expr, usize)> {
        match self.next() {
            Some(Token::Not) => self.parse_prefix(UnaryOp::Not),
            Some(Token::Minus) => self.parse_prefix(UnaryOp::Neg),
            Some(Token::Number(n)) => Ok((Expr::Literal(value::number(n)), 1)),
            Some(Token::Str(s)) => Ok((Expr::Literal(Value::String(s)), 1)),
            Some(Token::Bool(b)) => Ok((Expr::Literal(Value::Bool(b)), 1)),
            Some(Token::Ident(name)) => Ok((Expr::Field(name), 1)),
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.parse_expr(1)?;
                self.depth -= 1;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(TemporaError::value("where clause: missing ')'")),
                }
            }
            Some(other) => Err(TemporaError::value(format!(
                "where clause: unexpected token {:?}",
                other
            ))),
            None => Err(TemporaError::value("where clause: unexpected end of input")),
        }
    }
}

/// Parses an already rewritten expression.
pub fn parse(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(TemporaError::value("where clause is empty"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let (expr, _) = parser.parse_expr(1)?;
    if let Some(token) = parser.peek() {
        return Err(TemporaError::value(format!(
            "where clause: unexpected trailing token {:?}",
            token
        )));
    }
    Ok(expr)
}

/// A compiled where clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    source: String,
    expr: Expr,
}

impl Predicate {
    pub fn compile(source: &str) -> Result<Self> {
        let expr = parse(&rewrite_connectives(source))?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Raw clause text this predicate was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn matches(&self, record: &Record) -> bool {
        value::is_truthy(&self.expr.eval(record))
    }
}

/// Compiled predicates keyed by raw clause text.
#[derive(Debug, Default)]
pub struct PredicateCache {
    compiled: FxHashMap<String, Arc<Predicate>>,
}

impl PredicateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compile(&mut self, source: &str) -> Result<Arc<Predicate>> {
        if let Some(predicate) = self.compiled.get(source) {
            return Ok(Arc::clone(predicate));
        }
        let predicate = Arc::new(Predicate::compile(source).inspect_err(|e| {
            log::warn!("rejected where clause {:?}: {}", source, e);
        })?);
        self.compiled
            .insert(source.to_string(), Arc::clone(&predicate));
        Ok(predicate)
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    pub fn clear(&mut self) {
        self.compiled.clear();
    }

    /// Drops predicates no query store holds any more; returns how many.
    pub fn prune(&mut self) -> usize {
        let before = self.compiled.len();
        self.compiled
            .retain(|_, predicate| Arc::strong_count(predicate) > 1);
        before - self.compiled.len()
    }
}
