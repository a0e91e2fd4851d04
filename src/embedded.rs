//! Search helpers for loosely typed JSON embedded in pages
//! (`__NEXT_DATA__`, JSON-LD).

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use std::sync::OnceLock;

pub fn next_data(document: &Html) -> Option<Value> {
    let selector = Selector::parse("script#__NEXT_DATA__").expect("valid selector");
    let script = document.select(&selector).next()?;
    let text = script.text().collect::<String>();
    serde_json::from_str(text.trim()).ok()
}

/// Every parseable `application/ld+json` block, in document order.
pub fn json_ld_blocks(document: &Html) -> Vec<Value> {
    let selector =
        Selector::parse(r#"script[type="application/ld+json"]"#).expect("valid selector");
    document
        .select(&selector)
        .filter_map(|script| {
            let text = script.text().collect::<String>();
            serde_json::from_str::<Value>(text.trim()).ok()
        })
        .collect()
}

/// Depth-first walk calling `visit(key, value)` for every object entry.
pub fn walk<'a, F>(value: &'a Value, visit: &mut F)
where
    F: FnMut(&'a str, &'a Value),
{
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                visit(key.as_str(), child);
                walk(child, visit);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, visit);
            }
        }
        _ => {}
    }
}

pub fn deep_find_values<'a>(value: &'a Value, key: &str) -> Vec<&'a Value> {
    let mut out = Vec::new();
    walk(value, &mut |k, v| {
        if k == key {
            out.push(v);
        }
    });
    out
}

/// First meaningful value for the highest-priority key present anywhere in
/// the tree. Nulls, blank strings and empty arrays do not count.
pub fn deep_find_first<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| {
        deep_find_values(value, key)
            .into_iter()
            .find(|v| is_meaningful(v))
    })
}

/// Objects anywhere in the tree (root included) matching `predicate`.
pub fn find_objects<'a, P>(value: &'a Value, predicate: P) -> Vec<&'a serde_json::Map<String, Value>>
where
    P: Fn(&serde_json::Map<String, Value>) -> bool,
{
    fn collect<'a, P>(value: &'a Value, predicate: &P, out: &mut Vec<&'a serde_json::Map<String, Value>>)
    where
        P: Fn(&serde_json::Map<String, Value>) -> bool,
    {
        match value {
            Value::Object(map) => {
                if predicate(map) {
                    out.push(map);
                }
                for child in map.values() {
                    collect(child, predicate, out);
                }
            }
            Value::Array(items) => {
                for item in items {
                    collect(item, predicate, out);
                }
            }
            _ => {}
        }
    }

    let mut out = Vec::new();
    collect(value, &predicate, &mut out);
    out
}

fn is_meaningful(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

pub fn pick_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        _ => None,
    }
}

/// Numbers as-is; strings by their first decimal number (`"8.4/10"` -> 8.4).
pub fn pick_number(value: Option<&Value>) -> Option<f64> {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let re = NUMBER.get_or_init(|| Regex::new(r"(-?\d+(?:\.\d+)?)").expect("valid regex"));
            re.captures(s)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok())
        }
        _ => None,
    }
}

/// First string among `keys` on a single object, in priority order.
pub fn first_string_field(map: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| pick_string(map.get(*k)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_find_first_respects_key_priority_and_skips_empty() {
        let tree = json!({
            "props": {
                "pageProps": {
                    "score": 7.9,
                    "venue": {"rating": null, "details": [{"rating": ""}, {"rating": 8.2}]}
                }
            }
        });
        assert_eq!(
            deep_find_first(&tree, &["rating", "score"]),
            Some(&json!(8.2))
        );
        assert_eq!(deep_find_first(&tree, &["score"]), Some(&json!(7.9)));
        assert!(deep_find_first(&tree, &["missing"]).is_none());
    }

    #[test]
    fn empty_arrays_fall_through_to_next_key() {
        let tree = json!({"images": [], "media": [{"url": "https://x/a.jpg"}]});
        let found = deep_find_first(&tree, &["images", "media", "gallery"]).expect("found");
        assert!(found.is_array());
        assert_eq!(found[0]["url"], "https://x/a.jpg");
    }

    #[test]
    fn pick_number_parses_numeric_strings() {
        assert_eq!(pick_number(Some(&json!("8.4/10"))), Some(8.4));
        assert_eq!(pick_number(Some(&json!(9))), Some(9.0));
        assert_eq!(pick_number(Some(&json!(true))), None);
        assert_eq!(pick_number(None), None);
    }

    #[test]
    fn next_data_and_json_ld_are_extracted() {
        let html = r#"<html><head>
            <script type="application/ld+json">{"@type":"Restaurant","telephone":"020 1234"}</script>
            <script type="application/ld+json">not json</script>
            <script id="__NEXT_DATA__" type="application/json">{"props":{"title":"X"}}</script>
        </head><body></body></html>"#;
        let doc = Html::parse_document(html);
        assert_eq!(json_ld_blocks(&doc).len(), 1);
        let next = next_data(&doc).expect("next data");
        assert_eq!(pick_string(deep_find_first(&next, &["title"])).as_deref(), Some("X"));
    }

    #[test]
    fn find_objects_visits_nested_arrays() {
        let tree = json!({"a": [{"name": "Jo Bloggs", "role": "Editor"}, {"name": "n"}]});
        let found = find_objects(&tree, |m| m.contains_key("name") && m.contains_key("role"));
        assert_eq!(found.len(), 1);
        assert_eq!(first_string_field(found[0], &["title", "role"]).as_deref(), Some("Editor"));
    }
}
