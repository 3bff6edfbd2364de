//! Flat `key.path` view of resource attributes used by checks
//!
//! Lists produce `key.#` plus `key.N`, maps produce `key.%` plus `key.k`, and
//! scalars are rendered as plain strings. Nulls are omitted.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value as Json;
use stratus_core::resource::State;

pub type FlatMap = BTreeMap<String, String>;

/// Flatten JSON attributes, adding `id` from the identifier when given
pub fn flatten(attributes: &HashMap<String, Json>, identifier: Option<&str>) -> FlatMap {
    let mut out = FlatMap::new();
    for (key, value) in attributes {
        flatten_value(key, value, &mut out);
    }
    if let Some(identifier) = identifier {
        out.insert("id".to_string(), identifier.to_string());
    }
    out
}

/// Flatten a provider state
pub fn flatten_state(state: &State) -> FlatMap {
    let json: HashMap<String, Json> = state
        .attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    flatten(&json, state.identifier.as_deref())
}

fn flatten_value(prefix: &str, value: &Json, out: &mut FlatMap) {
    match value {
        Json::Null => {}
        Json::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Json::Bool(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Json::Number(n) => {
            out.insert(prefix.to_string(), n.to_string());
        }
        Json::Array(items) => {
            out.insert(format!("{}.#", prefix), items.len().to_string());
            for (i, item) in items.iter().enumerate() {
                flatten_value(&format!("{}.{}", prefix, i), item, out);
            }
        }
        Json::Object(map) => {
            out.insert(format!("{}.%", prefix), map.len().to_string());
            for (k, v) in map {
                flatten_value(&format!("{}.{}", prefix, k), v, out);
            }
        }
    }
}

/// Keys whose values differ between two flat maps, skipping ignored prefixes
///
/// Each entry reads `key: "left" => "right"`, with `(absent)` for a missing
/// side.
pub fn diff_flat(
    left: &FlatMap,
    right: &FlatMap,
    ignore: impl Fn(&str) -> bool,
) -> Vec<String> {
    let mut keys: Vec<&String> = left.keys().chain(right.keys()).collect();
    keys.sort();
    keys.dedup();

    keys.into_iter()
        .filter(|key| !ignore(key.as_str()))
        .filter_map(|key| {
            let (l, r) = (left.get(key), right.get(key));
            (l != r).then(|| format!("  {}: {} => {}", key, show(l), show(r)))
        })
        .collect()
}

fn show(value: Option<&String>) -> String {
    value.map_or_else(|| "(absent)".to_string(), |v| format!("{:?}", v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Json) -> HashMap<String, Json> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn lists_and_maps_are_counted() {
        let flat = flatten(
            &attrs(json!({
                "name": "dev",
                "enabled": true,
                "resource_types": ["AWS::Logs::LogGroup", "AWS::XRay::Trace"],
                "children": [{"id": "ou-1", "name": "a"}],
                "nothing": null,
            })),
            Some("123"),
        );

        assert_eq!(flat["id"], "123");
        assert_eq!(flat["name"], "dev");
        assert_eq!(flat["enabled"], "true");
        assert_eq!(flat["resource_types.#"], "2");
        assert_eq!(flat["resource_types.1"], "AWS::XRay::Trace");
        assert_eq!(flat["children.#"], "1");
        assert_eq!(flat["children.0.%"], "2");
        assert_eq!(flat["children.0.name"], "a");
        assert!(!flat.contains_key("nothing"));
    }

    #[test]
    fn empty_list_has_a_zero_count() {
        let flat = flatten(&attrs(json!({"accounts": []})), None);
        assert_eq!(flat["accounts.#"], "0");
        assert!(!flat.contains_key("id"));
    }

    #[test]
    fn diff_reports_both_sides() {
        let left = flatten(&attrs(json!({"name": "a", "arn": "x"})), Some("1"));
        let right = flatten(&attrs(json!({"name": "b", "email": "e"})), Some("1"));

        let diffs = diff_flat(&left, &right, |k| k == "arn");
        assert_eq!(
            diffs,
            vec![
                "  email: (absent) => \"e\"".to_string(),
                "  name: \"a\" => \"b\"".to_string(),
            ]
        );
    }
}
