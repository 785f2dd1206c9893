//! `{{ }}` template rendering.
//!
//! Rendering never fails: a token whose expression does not parse or
//! evaluate renders as the empty string, as does an unresolved path.

mod expr;
mod path;

pub use expr::{CompareOp, Expr, Filter, Operand, Pipeline};
pub use path::{Path, Segment};

use crate::value::{to_text, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected character '{ch}' at {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    #[error("filter failed: {0}")]
    Filter(String),

    #[error("unexpected trailing input at {0}")]
    TrailingInput(usize),

    #[error("unterminated '{{{{' token")]
    UnterminatedToken,
}

/// A piece of a split template.
enum Piece<'a> {
    Text(&'a str),
    Token(&'a str),
}

/// Split a template into literal text and `{{ }}` bodies. An opening `{{`
/// without a matching close is kept as text.
fn pieces(template: &str) -> Vec<Piece<'_>> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let body_start = open + 2;
        let Some(close) = find_close(&rest[body_start..]) else {
            break;
        };
        if open > 0 {
            out.push(Piece::Text(&rest[..open]));
        }
        out.push(Piece::Token(&rest[body_start..body_start + close]));
        rest = &rest[body_start + close + 2..];
    }
    if !rest.is_empty() {
        out.push(Piece::Text(rest));
    }
    out
}

/// Offset of the `}}` closing a token body, skipping quoted strings.
fn find_close(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(_) if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

/// Replace every `{{ expr }}` in `template` with the text of its value.
pub fn render(template: &str, ctx: &Value) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    let mut out = String::with_capacity(template.len());
    for piece in pieces(template) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Token(body) => match evaluate(body, ctx) {
                Ok(value) => out.push_str(&to_text(&value)),
                Err(e) => tracing::trace!("template token {:?} rendered empty: {}", body, e),
            },
        }
    }
    out
}

/// Render every string leaf of a nested structure, preserving its shape.
pub fn render_structure(value: &Value, ctx: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(render(s, ctx)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_structure(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_structure(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Strictly evaluate a single expression body (without braces).
pub fn evaluate(expr: &str, ctx: &Value) -> Result<Value, ExprError> {
    Pipeline::parse(expr)?.eval(ctx)
}

/// Check that every token in `template` parses.
pub fn validate(template: &str) -> Result<(), ExprError> {
    if let Some(open) = template.find("{{") {
        if find_close(&template[open + 2..]).is_none() {
            return Err(ExprError::UnterminatedToken);
        }
    }
    for piece in pieces(template) {
        if let Piece::Token(body) = piece {
            Pipeline::parse(body)?;
        }
    }
    Ok(())
}
