//! JSON value helpers shared by the loader, the plan cache and federation

use serde_json::{Map, Value};

/// Render a value as JSON with object keys sorted
///
/// Two values that differ only by object key order render identically,
/// which makes the output usable as a hash or dedup key.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Convert camelCase to snake_case
pub fn camel_to_snake(s: &str) -> String {
    let mut result = String::new();
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(ch.to_ascii_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}

/// Read a property of a parent object by field name
///
/// Falls back to the snake_case spelling of a camelCase name so that
/// resolvers can hand back structs serialized with Rust field names.
pub fn property(parent: &Value, field_name: &str) -> Value {
    let Value::Object(map) = parent else {
        return Value::Null;
    };
    if let Some(value) = map.get(field_name) {
        return value.clone();
    }
    map.get(&camel_to_snake(field_name))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Merge `source` into `target`
///
/// Objects merge key by key, arrays of equal length merge element-wise,
/// anything else is overwritten by `source` unless `source` is null.
pub fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => merge_maps(target, source),
        (Value::Array(target), Value::Array(source)) if target.len() == source.len() => {
            for (t, s) in target.iter_mut().zip(source) {
                deep_merge(t, s);
            }
        }
        (_, Value::Null) => {}
        (target, source) => *target = source,
    }
}

fn merge_maps(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        match target.get_mut(&key) {
            Some(existing) => deep_merge(existing, value),
            None => {
                target.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_ignores_key_order() {
        let a = json!({"b": 1, "a": {"y": [1, 2], "x": null}});
        let b = json!({"a": {"x": null, "y": [1, 2]}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"x":null,"y":[1,2]},"b":1}"#);
    }

    #[test]
    fn test_canonical_json_distinguishes_types() {
        assert_ne!(canonical_json(&json!(1)), canonical_json(&json!("1")));
    }

    #[test]
    fn test_property_falls_back_to_snake_case() {
        let parent = json!({"published_at": "2020", "title": "Dune"});
        assert_eq!(property(&parent, "publishedAt"), json!("2020"));
        assert_eq!(property(&parent, "title"), json!("Dune"));
        assert_eq!(property(&parent, "missing"), Value::Null);
        assert_eq!(property(&json!(42), "title"), Value::Null);
    }

    #[test]
    fn test_deep_merge_objects_and_lists() {
        let mut target = json!({"products": [{"upc": "1"}, {"upc": "2"}], "me": null});
        deep_merge(
            &mut target,
            json!({"products": [{"name": "Table"}, {"name": "Couch"}]}),
        );
        assert_eq!(
            target,
            json!({
                "products": [{"upc": "1", "name": "Table"}, {"upc": "2", "name": "Couch"}],
                "me": null
            })
        );
    }

    #[test]
    fn test_deep_merge_keeps_existing_on_null() {
        let mut target = json!({"name": "Ada"});
        deep_merge(&mut target, json!({"name": null}));
        assert_eq!(target, json!({"name": "Ada"}));
    }
}
