use serde_json::Value;

fn child_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Collects `(path, old, new)` for every leaf of `current` that differs from
/// `previous`. Objects are walked by key and arrays by index; keys that only
/// exist in `previous` are not reported.
pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = child_path(path_prefix, key);
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => diff_added(curr_val, &path, changes),
                }
            }
        }
        (Value::Array(prev_items), Value::Array(curr_items)) => {
            for (index, curr_val) in curr_items.iter().enumerate() {
                let path = child_path(path_prefix, &index.to_string());
                match prev_items.get(index) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => diff_added(curr_val, &path, changes),
                }
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

fn diff_added(value: &Value, path: &str, changes: &mut Vec<(String, Value, Value)>) {
    match value {
        Value::Object(_) => diff_json(&Value::Object(serde_json::Map::new()), value, path, changes),
        Value::Array(_) => diff_json(&Value::Array(Vec::new()), value, path, changes),
        _ => changes.push((path.to_string(), Value::Null, value.clone())),
    }
}
