//! Canonical parameter encoding.
//!
//! Both signing and verification hash the exact same string, so the
//! encoding must be deterministic: nested mappings collapse to compact
//! key-sorted JSON, entries sort by key in byte order, and empty values
//! drop out on both paths.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::PaymentError;

/// Stringify every parameter value and return the entries key-sorted.
///
/// Strings pass through, numbers and booleans use their exact textual
/// form, and nested mappings/arrays serialize to compact JSON. The
/// default `serde_json` map is BTreeMap-backed, so nested objects come
/// out key-sorted regardless of insertion order. Null and empty values
/// are omitted, matching the gateway's signing rules.
///
/// Monetary amounts must arrive pre-formatted as strings (two decimal
/// places); a raw float would be at the mercy of float formatting.
pub fn stringify(params: &Map<String, Value>) -> Result<BTreeMap<String, String>, PaymentError> {
    let mut entries = BTreeMap::new();
    for (key, value) in params {
        let text = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Object(_) | Value::Array(_) => serde_json::to_string(value)?,
        };
        if text.is_empty() {
            continue;
        }
        entries.insert(key.clone(), text);
    }
    Ok(entries)
}

/// The canonical signing string: `key=value` pairs joined by `&`.
pub fn canonical(params: &Map<String, Value>) -> Result<String, PaymentError> {
    let entries = stringify(params)?;
    Ok(join(entries.iter().map(|(k, v)| (k.as_str(), v.as_str())), false))
}

/// The transmitted variant: same entries, values percent-encoded.
pub fn canonical_quoted(params: &Map<String, Value>) -> Result<String, PaymentError> {
    let entries = stringify(params)?;
    Ok(join(entries.iter().map(|(k, v)| (k.as_str(), v.as_str())), true))
}

/// Canonicalize already-stringified pairs (the callback path, where
/// values were decoded from the transport encoding by the extractor).
pub fn canonical_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let sorted: BTreeMap<&str, &str> = pairs.into_iter().filter(|(_, v)| !v.is_empty()).collect();
    join(sorted.into_iter(), false)
}

/// Percent-encode a single value with form-urlencoding rules
/// (space becomes `+`).
pub fn quote(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn join<'a>(entries: impl Iterator<Item = (&'a str, &'a str)>, quoted: bool) -> String {
    entries
        .map(|(k, v)| {
            if quoted {
                format!("{}={}", k, quote(v))
            } else {
                format!("{}={}", k, v)
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn keys_sorted_ascending() {
        let p = params(json!({"zeta": "1", "alpha": "2", "mid": "3"}));
        let s = canonical(&p).unwrap();
        assert_eq!(s, "alpha=2&mid=3&zeta=1");
        let keys: Vec<&str> = s.split('&').map(|kv| kv.split('=').next().unwrap()).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn deterministic_across_calls() {
        let p = params(json!({"b": "2", "a": "1", "nested": {"y": 1, "x": 2}}));
        assert_eq!(canonical(&p).unwrap(), canonical(&p).unwrap());
    }

    #[test]
    fn nested_insertion_order_is_irrelevant() {
        let mut first = Map::new();
        let mut inner = Map::new();
        inner.insert("subject".into(), json!("Test Order"));
        inner.insert("total_amount".into(), json!("100.00"));
        first.insert("biz_content".into(), Value::Object(inner));

        let mut second = Map::new();
        let mut inner = Map::new();
        inner.insert("total_amount".into(), json!("100.00"));
        inner.insert("subject".into(), json!("Test Order"));
        second.insert("biz_content".into(), Value::Object(inner));

        assert_eq!(canonical(&first).unwrap(), canonical(&second).unwrap());
    }

    #[test]
    fn nested_maps_are_compact_and_sorted() {
        let p = params(json!({"biz_content": {"b": "2", "a": "1"}}));
        assert_eq!(canonical(&p).unwrap(), r#"biz_content={"a":"1","b":"2"}"#);
    }

    #[test]
    fn integers_match_their_string_form() {
        let a = params(json!({"total": 100}));
        let b = params(json!({"total": "100"}));
        assert_eq!(canonical(&a).unwrap(), canonical(&b).unwrap());
    }

    #[test]
    fn empty_and_null_values_dropped() {
        let p = params(json!({"a": "1", "empty": "", "missing": null}));
        assert_eq!(canonical(&p).unwrap(), "a=1");
    }

    #[test]
    fn quoting_escapes_reserved_characters() {
        assert_eq!(quote("a b&c=d"), "a+b%26c%3Dd");
        let p = params(json!({"k": "a b"}));
        assert_eq!(canonical_quoted(&p).unwrap(), "k=a+b");
    }

    #[test]
    fn pairs_path_matches_map_path() {
        let p = params(json!({"b": "2", "a": "1"}));
        let via_map = canonical(&p).unwrap();
        let via_pairs = canonical_pairs([("a", "1"), ("b", "2")]);
        assert_eq!(via_map, via_pairs);
    }
}
