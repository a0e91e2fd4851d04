use crate::canonical::{canonical_key, path_key};
use crate::models::MergeReport;
use crate::store::read_rows;
use crate::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

const MEDIA_KEYS: &[&str] = &["media", "images"];

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub items: Vec<Value>,
    pub report: MergeReport,
    /// Detail URLs of primary rows that found no media record.
    pub missing_urls: Vec<String>,
}

fn row_url(row: &serde_json::Map<String, Value>) -> Option<&str> {
    row.get("source_data")
        .and_then(|s| s.get("url"))
        .and_then(Value::as_str)
        .or_else(|| row.get("url").and_then(Value::as_str))
        .map(str::trim)
        .filter(|u| !u.is_empty())
}

fn media_list(row: &serde_json::Map<String, Value>) -> Vec<Value> {
    MEDIA_KEYS
        .iter()
        .find_map(|k| row.get(*k).and_then(Value::as_array))
        .cloned()
        .unwrap_or_default()
}

/// Left join of `primary` onto `media_records` by canonical URL, falling
/// back to the bare path. Every primary object row gets a `media` list,
/// empty when unmatched. Later media rows win on key collisions.
pub fn merge(primary: Vec<Value>, media_records: &[Value]) -> MergeOutcome {
    let mut report = MergeReport {
        primary_rows: primary.len(),
        media_rows: media_records.len(),
        ..MergeReport::default()
    };

    let mut by_canonical: HashMap<String, Vec<Value>> = HashMap::new();
    let mut by_path: HashMap<String, Vec<Value>> = HashMap::new();
    for record in media_records {
        let Value::Object(row) = record else {
            report.bad_rows += 1;
            continue;
        };
        let url = row_url(row).unwrap_or("");
        let media = media_list(row);
        let canonical = canonical_key(url);
        if !canonical.is_empty() {
            by_canonical.insert(canonical, media.clone());
        }
        let path = path_key(url);
        if !path.is_empty() {
            by_path.insert(path, media);
        }
    }
    report.indexed_by_canonical = by_canonical.len();
    report.indexed_by_path = by_path.len();

    let mut missing_urls = Vec::new();
    let items = primary
        .into_iter()
        .map(|mut item| {
            let Value::Object(row) = &mut item else {
                return item;
            };
            let url = row_url(row).unwrap_or("").to_string();
            let canonical = canonical_key(&url);
            let path = path_key(&url);

            let media = if let Some(found) = by_canonical.get(&canonical).filter(|_| !canonical.is_empty()) {
                report.matched_by_canonical += 1;
                found.clone()
            } else if let Some(found) = by_path.get(&path).filter(|_| !path.is_empty()) {
                report.matched_by_path += 1;
                found.clone()
            } else {
                report.missing += 1;
                missing_urls.push(url);
                Vec::new()
            };
            row.insert("media".to_string(), Value::Array(media));
            item
        })
        .collect();

    MergeOutcome {
        items,
        report,
        missing_urls,
    }
}

/// Reads both files (bare array or `{"items": [...]}`), merges, and writes
/// the result to `out`.
pub fn merge_files(primary: &Path, media: &Path, out: &Path) -> Result<MergeOutcome> {
    let primary_rows = read_rows(primary)?;
    let media_rows = read_rows(media)?;
    let outcome = merge(primary_rows, &media_rows);
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&outcome.items)?;
    std::fs::write(out, format!("{json}\n"))?;
    Ok(outcome)
}
