//! JSON path resolution.
//!
//! Resolves dot-notation paths like "scheme.version" to values in a
//! normalized trusted list document. A `*` segment fans out over every
//! element of an array.

use chrono::DateTime;
use serde_json::Value;

/// Resolve a dot-notation path to a single value.
///
/// # Examples
/// ```
/// use serde_json::json;
/// use tl_refresh::validation::resolve_json_path;
/// let data = json!({"scheme": {"version": 5}});
/// let value = resolve_json_path(&data, "scheme.version");
/// assert_eq!(value, Some(&json!(5)));
/// ```
pub fn resolve_json_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(data);
    }

    let mut current = data;
    for part in path.split('.') {
        match current {
            Value::Object(obj) => {
                current = obj.get(part)?;
            }
            Value::Array(arr) => {
                // Support array indexing like "providers.0.names"
                let index: usize = part.parse().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Resolve a path that may contain `*` wildcards.
///
/// Returns `(concrete_path, value)` for every match so that callers can
/// report exactly which element failed a check. Parents that are missing
/// are reported with a `None` value.
pub fn resolve_all<'a>(data: &'a Value, path: &str) -> Vec<(String, Option<&'a Value>)> {
    let mut frontier: Vec<(String, Option<&'a Value>)> = vec![(String::new(), Some(data))];

    for part in path.split('.').filter(|p| !p.is_empty()) {
        let mut next = Vec::new();
        for (prefix, value) in frontier {
            let join = |segment: &str| {
                if prefix.is_empty() {
                    segment.to_string()
                } else {
                    format!("{}.{}", prefix, segment)
                }
            };
            match (part, value) {
                (_, None) => next.push((join(part), None)),
                ("*", Some(Value::Array(items))) => {
                    for (i, item) in items.iter().enumerate() {
                        next.push((join(&i.to_string()), Some(item)));
                    }
                }
                // a wildcard over a non-array value matches nothing
                ("*", Some(_)) => {}
                (_, Some(current)) => {
                    next.push((join(part), resolve_json_path(current, part)));
                }
            }
        }
        frontier = next;
    }

    frontier
}

/// Check a value against a schema data type name.
///
/// Known types: string, int, float, boolean, array, object, timestamp.
/// Unknown type names accept any value.
pub fn matches_data_type(value: &Value, data_type: &str) -> bool {
    match data_type {
        "string" => value.is_string(),
        "int" => value.is_u64() || value.is_i64(),
        "float" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "timestamp" => value
            .as_str()
            .map_or(false, |s| DateTime::parse_from_rfc3339(s).is_ok()),
        _ => true,
    }
}

/// Convert a JSON value to an integer if possible.
pub fn value_to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_path() {
        let data = json!({"scheme": {"territory": "EU", "version": 6}});
        assert_eq!(resolve_json_path(&data, "scheme.territory"), Some(&json!("EU")));
        assert_eq!(resolve_json_path(&data, "scheme.version"), Some(&json!(6)));
    }

    #[test]
    fn test_array_index() {
        let data = json!({"providers": [{"territory": "BE"}, {"territory": "CZ"}]});
        assert_eq!(
            resolve_json_path(&data, "providers.1.territory"),
            Some(&json!("CZ"))
        );
    }

    #[test]
    fn test_missing_path() {
        let data = json!({"scheme": {}});
        assert_eq!(resolve_json_path(&data, "missing"), None);
        assert_eq!(resolve_json_path(&data, "scheme.version.nested"), None);
        assert_eq!(resolve_json_path(&data, ""), Some(&data));
    }

    #[test]
    fn test_wildcard_fans_out() {
        let data = json!({
            "providers": [
                {"services": [{"history": []}, {}]},
                {"services": []}
            ]
        });
        let matches = resolve_all(&data, "providers.*.services.*.history");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].0, "providers.0.services.0.history");
        assert!(matches[0].1.is_some());
        assert_eq!(matches[1].0, "providers.0.services.1.history");
        assert!(matches[1].1.is_none());
    }

    #[test]
    fn test_wildcard_missing_parent() {
        let data = json!({"scheme": {}});
        let matches = resolve_all(&data, "scheme.pointers");
        assert_eq!(matches, vec![("scheme.pointers".to_string(), None)]);

        let matches = resolve_all(&data, "providers.*.names");
        assert_eq!(matches, vec![("providers.*.names".to_string(), None)]);
    }

    #[test]
    fn test_data_types() {
        assert!(matches_data_type(&json!("2024-01-01T00:00:00Z"), "timestamp"));
        assert!(!matches_data_type(&json!("yesterday"), "timestamp"));
        assert!(matches_data_type(&json!(5), "int"));
        assert!(!matches_data_type(&json!(5.5), "int"));
        assert!(matches_data_type(&json!([]), "array"));
        assert_eq!(value_to_int(&json!("42")), Some(42));
    }
}
