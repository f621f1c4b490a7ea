//! Nested field lookup on `serde_json::Value`.
//!
//! Paths use `.` or `/` as separators (`meta.code`, `meta/code`), and a
//! numeric segment indexes into an array (`items.0.id`). A lookup that
//! misses at any segment yields `None`; nothing here panics or allocates
//! on the miss path.

use serde_json::Value;

pub fn get_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split(['.', '/'])
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Integer at `path`, or 0 when absent or not numeric.
pub fn safe_int(value: &Value, path: &str) -> i64 {
    match get_field(value, path) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// String at `path`. Numbers and booleans are rendered; null, objects and
/// arrays count as absent.
pub fn safe_string(value: &Value, path: &str) -> Option<String> {
    match get_field(value, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Flatten an object into `(key, value)` pairs for a query string.
/// Null members are skipped; non-object values produce no pairs.
pub fn query_pairs(value: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = value else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(key, member)| {
            let rendered = match member {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((key.clone(), rendered))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_lookup_accepts_both_separators() {
        let v = json!({"meta": {"code": 201, "tags": ["a", "b"]}});
        assert_eq!(get_field(&v, "meta.code"), Some(&json!(201)));
        assert_eq!(get_field(&v, "meta/code"), Some(&json!(201)));
        assert_eq!(get_field(&v, "meta.tags.1"), Some(&json!("b")));
    }

    #[test]
    fn missing_segment_is_none_every_time() {
        let v = json!({"meta": {"code": 201}});
        for _ in 0..3 {
            assert_eq!(get_field(&v, "meta.status.code"), None);
            assert_eq!(get_field(&v, "nope"), None);
            assert_eq!(get_field(&v, "meta.code.deeper"), None);
        }
        assert_eq!(v, json!({"meta": {"code": 201}}));
    }

    #[test]
    fn empty_path_is_the_value_itself() {
        let v = json!({"a": 1});
        assert_eq!(get_field(&v, ""), Some(&v));
    }

    #[test]
    fn safe_int_tolerates_strings_and_misses() {
        let v = json!({"a": "42", "b": 3.9, "c": true});
        assert_eq!(safe_int(&v, "a"), 42);
        assert_eq!(safe_int(&v, "b"), 3);
        assert_eq!(safe_int(&v, "c"), 0);
        assert_eq!(safe_int(&v, "missing"), 0);
    }

    #[test]
    fn safe_string_renders_scalars() {
        let v = json!({"m": "hi", "n": 7, "o": {"x": 1}, "z": null});
        assert_eq!(safe_string(&v, "m").as_deref(), Some("hi"));
        assert_eq!(safe_string(&v, "n").as_deref(), Some("7"));
        assert_eq!(safe_string(&v, "o"), None);
        assert_eq!(safe_string(&v, "z"), None);
    }

    #[test]
    fn query_pairs_skip_nulls() {
        let v = json!({"page": 2, "q": "sword#1", "skip": null});
        assert_eq!(
            query_pairs(&v),
            vec![
                ("page".to_string(), "2".to_string()),
                ("q".to_string(), "sword#1".to_string()),
            ]
        );
        assert!(query_pairs(&json!([1, 2])).is_empty());
    }
}
