//! Per-target output file: a JSON array of [`ScrapedItem`] rewritten whole on
//! every save.

use crate::models::ScrapedItem;
use crate::{HarvestError, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Rows of a JSON file holding either a bare array or `{"items": [...]}`.
pub fn read_rows(path: &Path) -> Result<Vec<Value>> {
    let unreadable = |message: String| HarvestError::UnreadableOutput {
        path: path.to_string_lossy().into_owned(),
        message,
    };
    let bytes = std::fs::read(path).map_err(|e| unreadable(e.to_string()))?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|e| unreadable(e.to_string()))?;
    match value {
        Value::Array(rows) => Ok(rows),
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(rows)) => Ok(rows),
            _ => Err(unreadable("expected an array or an object with \"items\"".to_string())),
        },
        _ => Err(unreadable("expected an array or an object with \"items\"".to_string())),
    }
}

#[derive(Debug)]
pub struct IncrementalStore {
    path: PathBuf,
    items: Vec<ScrapedItem>,
}

impl IncrementalStore {
    /// Loads the existing snapshot, or starts empty when the file is absent.
    /// Rows sharing a source id collapse into the last one, at the first
    /// one's position. A present but unreadable file is an error so nothing
    /// gets overwritten.
    pub fn open(path: PathBuf) -> Result<Self> {
        let mut store = Self::fresh(path);
        if store.path.exists() {
            for item in load_existing_items(&store.path)? {
                store.upsert(item);
            }
        }
        Ok(store)
    }

    /// Starts from nothing; the first save replaces whatever is on disk.
    pub fn fresh(path: PathBuf) -> Self {
        Self {
            path,
            items: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn items(&self) -> &[ScrapedItem] {
        &self.items
    }

    pub fn ids(&self) -> HashSet<String> {
        self.items
            .iter()
            .filter(|i| !i.source_id.is_empty())
            .map(|i| i.source_id.clone())
            .collect()
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.items.iter().any(|i| i.source_id == source_id)
    }

    /// Replaces the item with the same source id in place, or appends.
    /// Items without a source id are always appended.
    pub fn upsert(&mut self, item: ScrapedItem) {
        match self
            .items
            .iter_mut()
            .find(|existing| !item.source_id.is_empty() && existing.source_id == item.source_id)
        {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
    }

    pub fn save(&self) -> Result<()> {
        save_items(&self.path, &self.items)
    }
}

pub fn load_existing_items(path: &Path) -> Result<Vec<ScrapedItem>> {
    read_rows(path)?
        .into_iter()
        .filter(Value::is_object)
        .map(|row| {
            serde_json::from_value(row).map_err(|e| HarvestError::UnreadableOutput {
                path: path.to_string_lossy().into_owned(),
                message: e.to_string(),
            })
        })
        .collect()
}

pub fn load_existing_ids(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    Ok(load_existing_items(path)?
        .into_iter()
        .map(|i| i.source_id)
        .filter(|id| !id.is_empty())
        .collect())
}

/// Writes the full snapshot through a sibling temp file.
pub fn save_items(path: &Path, items: &[ScrapedItem]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(items)?;
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
    }
    if std::fs::rename(&tmp_path, path).is_err() {
        std::fs::copy(&tmp_path, path)?;
        let _ = std::fs::remove_file(&tmp_path);
    }
    Ok(())
}
