use serde_json::Value;

/// Recursively merges `right` into `left`.
///
/// Maps are merged per key and keys present only in `left` survive. For any
/// other pair of values, `right` wins. Returns false when `left` is not a map
/// and nothing was merged; the caller decides whether to assign instead.
pub fn merge(left: &mut Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Object(l), Value::Object(r)) => {
            for (key, value) in r {
                match l.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge(existing, value);
                    }
                    _ => {
                        l.insert(key.clone(), value.clone());
                    }
                }
            }
            true
        }
        _ => false,
    }
}

/// Merge that falls back to assignment when the values are not both maps.
pub fn merged(mut left: Value, right: &Value) -> Value {
    if right.is_null() {
        return left;
    }
    if !merge(&mut left, right) {
        left = right.clone();
    }
    left
}
