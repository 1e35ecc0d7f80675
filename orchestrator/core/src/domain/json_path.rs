// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Dotted/bracketed path lookup over JSON values (`a.b[0].c`, `[1].id`, `$.data`).

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse(path: &str) -> Option<Vec<Segment>> {
    let path = path.trim();
    let path = path.strip_prefix("$.").or_else(|| path.strip_prefix('$')).unwrap_or(path);
    let mut segments = Vec::new();
    let mut key = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !key.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut key)));
                }
            }
            '[' => {
                if !key.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut key)));
                }
                let mut index = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) => index.push(d),
                        None => return None,
                    }
                }
                let index = index.trim().trim_matches(|c| c == '"' || c == '\'');
                match index.parse::<usize>() {
                    Ok(i) => segments.push(Segment::Index(i)),
                    // ["quoted key"] form
                    Err(_) if !index.is_empty() => segments.push(Segment::Key(index.to_string())),
                    Err(_) => return None,
                }
            }
            other => key.push(other),
        }
    }
    if !key.is_empty() {
        segments.push(Segment::Key(key));
    }
    Some(segments)
}

/// Resolve `path` inside `value`. `null` counts as a defined value; a missing
/// key, out-of-range index or malformed path does not.
pub fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse(path)?;
    let mut current = value;
    for segment in segments {
        current = match (segment, current) {
            (Segment::Key(k), Value::Object(map)) => map.get(&k)?,
            (Segment::Index(i), Value::Array(items)) => items.get(i)?,
            // numeric key into an object, e.g. `a.0`
            (Segment::Index(i), Value::Object(map)) => map.get(&i.to_string())?,
            (Segment::Key(k), Value::Array(items)) => items.get(k.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn is_present(value: &Value, path: &str) -> bool {
    resolve(value, path).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolves_nested_paths() {
        let doc = json!({"a": {"b": [{"c": 1}, {"c": null}]}, "data": {"id": "x"}});
        assert_eq!(resolve(&doc, "a.b[0].c"), Some(&json!(1)));
        assert_eq!(resolve(&doc, "data.id"), Some(&json!("x")));
        assert_eq!(resolve(&doc, "$.data.id"), Some(&json!("x")));
        assert_eq!(resolve(&doc, "a.b.1.c"), Some(&Value::Null));
        assert!(is_present(&doc, "a.b[1].c"));
    }

    #[test]
    fn test_missing_paths() {
        let doc = json!({"a": {"b": [1]}});
        assert!(!is_present(&doc, "a.c"));
        assert!(!is_present(&doc, "a.b[3]"));
        assert!(!is_present(&doc, "a.b[0].x"));
        assert!(!is_present(&doc, "a.b[0"));
    }

    #[test]
    fn test_top_level_index_and_quoted_keys() {
        let doc = json!([{"id": 7, "odd.key": true}]);
        assert_eq!(resolve(&doc, "[0].id"), Some(&json!(7)));
        assert_eq!(resolve(&doc, "[0][\"odd.key\"]"), Some(&json!(true)));
    }
}
