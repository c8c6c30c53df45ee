//! Minimal dotted path syntax used by generated configs.
//!
//! `data.Page.media`, `results[0].title`, `images[2]` and the empty path
//! (the value itself) are supported. Keys containing `.` or `[` cannot be
//! addressed.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Parse a path into segments. Returns `None` on malformed input.
pub fn parse(path: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    let path = path.trim();
    if path.is_empty() {
        return Some(segments);
    }

    for part in path.split('.') {
        let (key, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if !key.is_empty() {
            segments.push(Segment::Key(key.to_string()));
        } else if rest.is_empty() {
            return None;
        }

        while !rest.is_empty() {
            let close = rest.find(']')?;
            if !rest.starts_with('[') {
                return None;
            }
            let index = rest[1..close].trim().parse::<usize>().ok()?;
            segments.push(Segment::Index(index));
            rest = &rest[close + 1..];
        }
    }

    Some(segments)
}

/// Resolve `path` against `value`
pub fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse(path)?;
    let mut current = value;
    for segment in &segments {
        current = match segment {
            Segment::Key(key) => current.get(key.as_str())?,
            Segment::Index(index) => current.get(*index)?,
        };
    }
    Some(current)
}

/// Whether an object key can appear as one path segment
pub fn is_addressable(key: &str) -> bool {
    !key.is_empty() && !key.contains(['.', '[', ']'])
}

/// Join two paths, skipping empty ones
pub fn join(base: &str, tail: &str) -> String {
    match (base.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => base.to_string(),
        _ if tail.starts_with('[') => format!("{}{}", base, tail),
        _ => format!("{}.{}", base, tail),
    }
}

/// Render a scalar JSON value as a string; `None` for null, objects, arrays
/// and empty strings.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse() {
        assert_eq!(parse(""), Some(vec![]));
        assert_eq!(
            parse("data.Page[0].media"),
            Some(vec![
                Segment::Key("data".into()),
                Segment::Key("Page".into()),
                Segment::Index(0),
                Segment::Key("media".into()),
            ])
        );
        assert_eq!(parse("[1][2]"), Some(vec![Segment::Index(1), Segment::Index(2)]));
        assert_eq!(parse("a..b"), None);
        assert_eq!(parse("a[x]"), None);
        assert_eq!(parse("a[1"), None);
    }

    #[test]
    fn test_resolve() {
        let doc = json!({
            "data": {"items": [{"title": {"romaji": "Frieren"}}, {"title": {"romaji": "Dandadan"}}]}
        });
        assert_eq!(
            resolve(&doc, "data.items[1].title.romaji"),
            Some(&json!("Dandadan"))
        );
        assert_eq!(resolve(&doc, ""), Some(&doc));
        assert_eq!(resolve(&doc, "data.missing"), None);
        assert_eq!(resolve(&doc, "data.items[5]"), None);
    }

    #[test]
    fn test_join() {
        assert_eq!(join("", "results"), "results");
        assert_eq!(join("data.Page", ""), "data.Page");
        assert_eq!(join("data.Page", "[0]"), "data.Page[0]");
        assert_eq!(join("data.Page[0]", "episodes"), "data.Page[0].episodes");
    }

    #[test]
    fn test_is_addressable() {
        assert!(is_addressable("coverImage"));
        assert!(is_addressable("image_url"));
        assert!(!is_addressable("title.en"));
        assert!(!is_addressable("sizes[0]"));
        assert!(!is_addressable(""));
    }

    #[test]
    fn test_scalar_text() {
        assert_eq!(scalar_text(&json!("x")), Some("x".to_string()));
        assert_eq!(scalar_text(&json!(12)), Some("12".to_string()));
        assert_eq!(scalar_text(&json!("  ")), None);
        assert_eq!(scalar_text(&json!(null)), None);
        assert_eq!(scalar_text(&json!({"a": 1})), None);
    }
}
