use crate::Result;
use std::io::Write;
use std::path::{Path, PathBuf};

const LOG_ROTATE_BYTES: u64 = 20 * 1024 * 1024;
const LOG_MAX_BACKUPS: usize = 3;

/// Append-only JSONL event log for one target.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    target: String,
    echo_warnings: bool,
}

impl EventLog {
    pub fn new(path: PathBuf, target: &str) -> Self {
        Self {
            path,
            target: target.to_string(),
            echo_warnings: false,
        }
    }

    pub fn with_stderr_warnings(mut self, enabled: bool) -> Self {
        self.echo_warnings = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn line(&self, level: &str, event: &str, data: serde_json::Value) -> Result<()> {
        if self.echo_warnings && matches!(level, "warn" | "error") {
            eprintln!("[{}] {level} {event} {data}", self.target);
        }

        let line = serde_json::json!({
            "ts_ms": chrono::Utc::now().timestamp_millis(),
            "target": self.target,
            "level": level,
            "event": event,
            "data": data
        })
        .to_string();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        rotate_log_if_needed(&self.path)?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(format!("{line}\n").as_bytes())?;
        Ok(())
    }
}

fn rotate_log_if_needed(path: &Path) -> Result<()> {
    let len = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return Ok(()),
    };
    if len < LOG_ROTATE_BYTES {
        return Ok(());
    }
    rotate_file_backups(path, LOG_MAX_BACKUPS)?;
    Ok(())
}

fn rotate_file_backups(path: &Path, max_backups: usize) -> std::io::Result<()> {
    if max_backups == 0 {
        let _ = std::fs::remove_file(path);
        return Ok(());
    }

    for i in (1..=max_backups).rev() {
        let dst = path_with_suffix(path, &format!(".{i}"));
        let src = if i == 1 {
            path.to_path_buf()
        } else {
            path_with_suffix(path, &format!(".{}", i - 1))
        };
        if !src.exists() {
            continue;
        }
        if dst.exists() {
            let _ = std::fs::remove_file(&dst);
        }
        std::fs::rename(src, dst)?;
    }
    Ok(())
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{file_name}{suffix}"))
}

/// Drops the query string, which may carry signed tokens.
pub fn redact_url_for_log(value: &str) -> String {
    match url::Url::parse(value) {
        Ok(uri) if uri.query().is_some() => {
            let host = uri.host_str().unwrap_or("unknown-host");
            format!("{}://{host}{}?...", uri.scheme(), uri.path())
        }
        Ok(_) => value.to_string(),
        Err(_) => "[invalid-url]".to_string(),
    }
}
