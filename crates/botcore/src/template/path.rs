use super::ExprError;
use crate::value::Value;

/// One step of a lookup path.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Dotted/bracketed lookup path such as `user.tags[0]["display name"]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Parse a standalone path as used on edges. A leading `.`, `$` or `$.`
    /// is accepted, and the path may open with a bracket (`[0]`, `["k"]`).
    /// An empty path selects the whole value.
    pub fn parse(src: &str) -> Result<Self, ExprError> {
        let trimmed = src.trim();
        let body = trimmed
            .strip_prefix("$.")
            .or_else(|| trimmed.strip_prefix('$'))
            .or_else(|| trimmed.strip_prefix('.'))
            .unwrap_or(trimmed);
        if body.is_empty() {
            return Ok(Self::new(Vec::new()));
        }
        let mut cursor = super::expr::Cursor::new(body);
        let path = cursor.path_tail(Vec::new(), !body.starts_with('['))?;
        cursor.skip_ws();
        if !cursor.at_end() {
            return Err(ExprError::TrailingInput(cursor.pos()));
        }
        Ok(path)
    }

    /// Walk `root`. Keys that look like integers index into arrays.
    pub fn lookup<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match (segment, current) {
                (Segment::Key(key), Value::Object(map)) => map.get(key)?,
                (Segment::Key(key), Value::Array(items)) => items.get(key.parse::<usize>().ok()?)?,
                (Segment::Index(i), Value::Array(items)) => items.get(*i)?,
                (Segment::Index(i), Value::Object(map)) => map.get(&i.to_string())?,
                _ => return None,
            };
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_mixed_segments() {
        let path = Path::parse(r#"items[1]["display name"].id"#).unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("items".into()),
                Segment::Index(1),
                Segment::Key("display name".into()),
                Segment::Key("id".into()),
            ]
        );
    }

    #[test]
    fn looks_up_nested_values() {
        let doc = json!({"data": {"items": [{"id": 7}, {"id": 8}]}});
        let path = Path::parse("$.data.items.1.id").unwrap();
        assert_eq!(path.lookup(&doc), Some(&json!(8)));
        assert_eq!(Path::parse("").unwrap().lookup(&doc), Some(&doc));
        assert_eq!(Path::parse("data.missing").unwrap().lookup(&doc), None);
    }

    #[test]
    fn paths_may_open_with_a_bracket() {
        let list = json!(["x", "y"]);
        assert_eq!(Path::parse("[1]").unwrap().lookup(&list), Some(&json!("y")));
        assert_eq!(Path::parse("$[1]").unwrap().lookup(&list), Some(&json!("y")));

        let doc = json!({"k": {"x": 3}});
        let path = Path::parse(r#"$["k"].x"#).unwrap();
        assert_eq!(
            path.segments(),
            &[Segment::Key("k".into()), Segment::Key("x".into())]
        );
        assert_eq!(path.lookup(&doc), Some(&json!(3)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Path::parse("a[").is_err());
        assert!(Path::parse("a b").is_err());
    }
}
