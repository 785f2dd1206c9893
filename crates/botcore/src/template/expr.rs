//! Typed expression tree and its parser.
//!
//! ```text
//! pipeline := expr ('|' filter)*
//! expr     := operand (op operand)?
//! op       := '==' | '!=' | '>=' | '<=' | '>' | '<'
//! operand  := string | number | true | false | null | none | path
//! path     := ident ('.' key | '[' int ']' | '[' string ']')*
//! ```

use super::path::{Path, Segment};
use super::ExprError;
use crate::value::{loose_cmp, loose_eq, to_text, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn apply(self, left: &Value, right: &Value) -> bool {
        match self {
            CompareOp::Eq => loose_eq(left, right),
            CompareOp::Ne => !loose_eq(left, right),
            CompareOp::Gt => loose_cmp(left, right) == Some(Ordering::Greater),
            CompareOp::Ge => matches!(loose_cmp(left, right), Some(Ordering::Greater | Ordering::Equal)),
            CompareOp::Lt => loose_cmp(left, right) == Some(Ordering::Less),
            CompareOp::Le => matches!(loose_cmp(left, right), Some(Ordering::Less | Ordering::Equal)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    Path(Path),
}

impl Operand {
    fn eval(&self, ctx: &Value) -> Value {
        match self {
            Operand::Literal(v) => v.clone(),
            Operand::Path(path) => path.lookup(ctx).cloned().unwrap_or(Value::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Operand(Operand),
    Compare {
        op: CompareOp,
        left: Operand,
        right: Operand,
    },
}

impl Expr {
    pub fn eval(&self, ctx: &Value) -> Value {
        match self {
            Expr::Operand(operand) => operand.eval(ctx),
            Expr::Compare { op, left, right } => Value::Bool(op.apply(&left.eval(ctx), &right.eval(ctx))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Serialize to JSON text.
    ToJson,
    /// Percent-encode the text form.
    UrlEncode,
    /// Leaves the value untouched.
    Safe,
}

impl Filter {
    fn from_name(name: &str) -> Result<Self, ExprError> {
        match name {
            "tojson" => Ok(Filter::ToJson),
            "urlencode" => Ok(Filter::UrlEncode),
            "safe" => Ok(Filter::Safe),
            other => Err(ExprError::UnknownFilter(other.to_string())),
        }
    }

    fn apply(self, value: Value) -> Result<Value, ExprError> {
        match self {
            Filter::ToJson => serde_json::to_string(&value)
                .map(Value::String)
                .map_err(|e| ExprError::Filter(e.to_string())),
            Filter::UrlEncode => Ok(Value::String(percent_encode(&to_text(&value)))),
            Filter::Safe => Ok(value),
        }
    }
}

/// Percent-encode UTF-8 bytes for the `urlencode` filter. ASCII letters,
/// digits and `- _ . ! ~ * ' ( )` pass through unchanged, the same set
/// `encodeURIComponent` leaves alone.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric()
            || matches!(byte, b'-' | b'_' | b'.' | b'!' | b'~' | b'*' | b'\'' | b'(' | b')')
        {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// A parsed `{{ }}` body.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub expr: Expr,
    pub filters: Vec<Filter>,
}

impl Pipeline {
    pub fn parse(src: &str) -> Result<Self, ExprError> {
        let mut cursor = Cursor::new(src);
        cursor.skip_ws();
        if cursor.at_end() {
            return Err(ExprError::Empty);
        }
        let expr = cursor.expr()?;
        let mut filters = Vec::new();
        loop {
            cursor.skip_ws();
            if !cursor.eat('|') {
                break;
            }
            cursor.skip_ws();
            let name = cursor.word();
            if name.is_empty() {
                return Err(cursor.unexpected());
            }
            filters.push(Filter::from_name(name)?);
        }
        cursor.skip_ws();
        if !cursor.at_end() {
            return Err(ExprError::TrailingInput(cursor.pos()));
        }
        Ok(Self { expr, filters })
    }

    pub fn eval(&self, ctx: &Value) -> Result<Value, ExprError> {
        let mut value = self.expr.eval(ctx);
        for filter in &self.filters {
            value = filter.apply(value)?;
        }
        Ok(value)
    }
}

pub(crate) struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.src[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, expected: &str) -> bool {
        if self.src[self.pos..].starts_with(expected) {
            self.pos += expected.len();
            true
        } else {
            false
        }
    }

    pub(crate) fn skip_ws(&mut self) {
        while let Some(c) = self.peek().filter(|c| c.is_whitespace()) {
            self.pos += c.len_utf8();
        }
    }

    fn unexpected(&self) -> ExprError {
        match self.peek() {
            Some(ch) => ExprError::UnexpectedChar { ch, pos: self.pos },
            None => ExprError::UnexpectedEnd,
        }
    }

    /// Consume `[A-Za-z0-9_-]*`.
    fn word(&mut self) -> &'a str {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        let left = self.operand()?;
        self.skip_ws();
        let op = if self.eat_str("==") {
            CompareOp::Eq
        } else if self.eat_str("!=") {
            CompareOp::Ne
        } else if self.eat_str(">=") {
            CompareOp::Ge
        } else if self.eat_str("<=") {
            CompareOp::Le
        } else if self.eat('>') {
            CompareOp::Gt
        } else if self.eat('<') {
            CompareOp::Lt
        } else {
            return Ok(Expr::Operand(left));
        };
        let right = self.operand()?;
        Ok(Expr::Compare { op, left, right })
    }

    fn operand(&mut self) -> Result<Operand, ExprError> {
        self.skip_ws();
        match self.peek() {
            Some('\'') | Some('"') => Ok(Operand::Literal(Value::String(self.string()?))),
            Some(c) if c.is_ascii_digit() => self.number().map(Operand::Literal),
            Some('-') if matches!(self.peek_second(), Some(d) if d.is_ascii_digit()) => {
                self.number().map(Operand::Literal)
            }
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let start = self.pos;
                let head = self.word();
                if !matches!(self.peek(), Some('.') | Some('[')) {
                    match head.to_ascii_lowercase().as_str() {
                        "true" => return Ok(Operand::Literal(Value::Bool(true))),
                        "false" => return Ok(Operand::Literal(Value::Bool(false))),
                        "null" | "none" => return Ok(Operand::Literal(Value::Null)),
                        _ => {}
                    }
                }
                self.pos = start;
                self.path_tail(Vec::new(), true).map(Operand::Path)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn string(&mut self) -> Result<String, ExprError> {
        let quote = self.bump().ok_or(ExprError::UnexpectedEnd)?;
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(ExprError::UnterminatedString),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => out.push(other),
                    None => return Err(ExprError::UnterminatedString),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Result<Value, ExprError> {
        let start = self.pos;
        self.eat('-');
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut fractional = false;
        if self.peek() == Some('.') && matches!(self.peek_second(), Some(d) if d.is_ascii_digit()) {
            fractional = true;
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = &self.src[start..self.pos];
        if !fractional {
            if let Ok(n) = text.parse::<i64>() {
                return Ok(Value::from(n));
            }
        }
        text.parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| ExprError::InvalidNumber(text.to_string()))
    }

    /// Parse path segments, optionally starting with a bare key.
    pub(crate) fn path_tail(&mut self, mut segments: Vec<Segment>, head: bool) -> Result<Path, ExprError> {
        if head {
            let key = self.word();
            if key.is_empty() {
                return Err(self.unexpected());
            }
            segments.push(Segment::Key(key.to_string()));
        }
        loop {
            if self.eat('.') {
                let key = self.word();
                if key.is_empty() {
                    return Err(self.unexpected());
                }
                segments.push(Segment::Key(key.to_string()));
            } else if self.eat('[') {
                self.skip_ws();
                let segment = match self.peek() {
                    Some('\'') | Some('"') => Segment::Key(self.string()?),
                    Some(c) if c.is_ascii_digit() => {
                        let start = self.pos;
                        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                            self.pos += 1;
                        }
                        let digits = &self.src[start..self.pos];
                        Segment::Index(
                            digits
                                .parse()
                                .map_err(|_| ExprError::InvalidNumber(digits.to_string()))?,
                        )
                    }
                    _ => return Err(self.unexpected()),
                };
                self.skip_ws();
                if !self.eat(']') {
                    return Err(self.unexpected());
                }
                segments.push(segment);
            } else {
                return Ok(Path::new(segments));
            }
        }
    }
}
