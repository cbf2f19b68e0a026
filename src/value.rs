//! The generic value tree the rest of the engine operates on.
//!
//! `serde_yaml::Value` already gives us null/bool/int/float/string/ordered-mapping/
//! sequence with insertion-order-preserving mappings, which is exactly what
//! an authored document needs. We use it directly rather than inventing a
//! parallel type, and add small helpers for the mapping-shape checks the
//! Operator Resolver and Config Resolver both need.

pub use serde_yaml::Value;
use serde_yaml::Mapping;

/// Returns the mapping's value for a string key, if the node is a mapping and
/// the key is present.
pub fn get<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.as_mapping()?.get(Value::String(key.to_string()))
}

/// Returns `true` if the mapping (authored or resolved) contains `key`,
/// regardless of whether its value is null. Used everywhere a distinction
/// between "absent" and "explicit null" matters (e.g. disabling retries).
pub fn contains_key(value: &Value, key: &str) -> bool {
    value
        .as_mapping()
        .is_some_and(|m| m.contains_key(Value::String(key.to_string())))
}

pub fn as_str(value: &Value) -> Option<&str> {
    value.as_str()
}

pub fn mapping_of(value: &Value) -> Option<&Mapping> {
    value.as_mapping()
}

/// Shallow-merges `overlay` on top of `base`, per top-level key: a key
/// present in `overlay` replaces the entire value from `base` (nested
/// mappings are not deep-merged).
pub fn shallow_merge(base: Option<&Value>, overlay: Option<&Value>) -> Option<Value> {
    match (base, overlay) {
        (None, None) => None,
        (Some(b), None) => Some(b.clone()),
        (None, Some(o)) => Some(o.clone()),
        (Some(b), Some(o)) => {
            let mut merged = b.as_mapping().cloned().unwrap_or_default();
            if let Some(overlay_map) = o.as_mapping() {
                for (k, v) in overlay_map {
                    merged.insert(k.clone(), v.clone());
                }
                Some(Value::Mapping(merged))
            } else {
                // Overlay isn't a mapping (shouldn't happen for validated
                // Headers/Body/Query sections) — overlay wins outright.
                Some(o.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Mapping;

    fn map(pairs: &[(&str, Value)]) -> Value {
        let mut m = Mapping::new();
        for (k, v) in pairs {
            m.insert(Value::String((*k).to_string()), v.clone());
        }
        Value::Mapping(m)
    }

    #[test]
    fn shallow_merge_overlay_wins_per_key() {
        let base = map(&[("a", Value::from(1)), ("b", Value::from(2))]);
        let overlay = map(&[("b", Value::from(99))]);
        let merged = shallow_merge(Some(&base), Some(&overlay)).unwrap();
        assert_eq!(get(&merged, "a"), Some(&Value::from(1)));
        assert_eq!(get(&merged, "b"), Some(&Value::from(99)));
    }

    #[test]
    fn shallow_merge_empty_overlay_is_identity() {
        let base = map(&[("a", Value::from(1))]);
        let empty_overlay = Value::Mapping(Mapping::new());
        let merged = shallow_merge(Some(&base), Some(&empty_overlay)).unwrap();
        assert_eq!(merged, base);
    }

    #[test]
    fn shallow_merge_both_none_is_none() {
        assert!(shallow_merge(None, None).is_none());
    }

    #[test]
    fn contains_key_distinguishes_null_from_absent() {
        let with_null = map(&[("Retry", Value::Null)]);
        let without = map(&[("Other", Value::from(1))]);
        assert!(contains_key(&with_null, "Retry"));
        assert!(!contains_key(&without, "Retry"));
    }
}
