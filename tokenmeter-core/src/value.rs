pub type Value = serde_json::Value;

/// Wraps anything that is not already a JSON object as `{"value": ...}`.
pub fn ensure_object(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        other => Value::Object(serde_json::Map::from_iter([("value".to_string(), other)])),
    }
}
