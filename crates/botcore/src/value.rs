//! Dynamic values flowing between nodes.
//!
//! Workflows carry plain JSON; this module adds the loose, untyped semantics
//! the template language and the condition gate rely on.

use std::cmp::Ordering;

pub use serde_json::Value;

/// String-keyed JSON object used for params, outputs and the variable bag.
pub type Map = serde_json::Map<String, Value>;

const FALSY_STRINGS: [&str; 7] = ["", "0", "false", "none", "null", "no", "off"];

/// Truthiness used by condition gates and `linked` inputs.
pub fn coerce_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => {
            let lowered = s.trim().to_ascii_lowercase();
            !FALSY_STRINGS.contains(&lowered.as_str())
        }
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text form of a value as it appears inside a rendered template.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Numeric view of a value for loose comparisons.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Loose equality: numbers compare numerically across strings and booleans,
/// `null` only equals `null`, containers compare structurally.
pub fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Array(_), _) | (Value::Object(_), _) | (_, Value::Array(_)) | (_, Value::Object(_)) => {
            left == right
        }
        _ => match (to_number(left), to_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

/// Loose ordering used by `<`, `<=`, `>` and `>=`. `None` means the operands
/// are not comparable and every ordering operator yields `false`.
pub fn loose_cmp(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Array(_), _) | (Value::Object(_), _) | (_, Value::Array(_)) | (_, Value::Object(_)) => None,
        _ => {
            let a = to_number(left)?;
            let b = to_number(right)?;
            a.partial_cmp(&b)
        }
    }
}
