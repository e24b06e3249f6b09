//! Operation variables.

use serde_json::{Map, Value};

/// Variables of an operation: a JSON object keyed by variable name.
///
/// `serde_json::Map` is ordered by key (the workspace does not enable
/// `preserve_order`), so serializing it is stable regardless of insertion
/// order. The dedup layer relies on that.
pub type Variables = Map<String, Value>;

/// Overlay `supplied` on top of `defaults`; supplied values win.
pub fn merge_variables(defaults: &Variables, supplied: &Variables) -> Variables {
    let mut merged = defaults.clone();
    for (key, value) in supplied {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Stable JSON serialization of variables, used as a dedup key.
pub fn stable_key(variables: &Variables) -> String {
    // Serializing a map of JSON values cannot fail.
    serde_json::to_string(variables).unwrap_or_default()
}

/// Build [`Variables`] from a `json!({...})` literal. Non-objects yield an empty map.
pub fn variables_from(value: Value) -> Variables {
    match value {
        Value::Object(map) => map,
        _ => Variables::new(),
    }
}
