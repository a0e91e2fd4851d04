//! URL normalization shared by the listing crawler and the merge step.
//!
//! The canonical key drops query and fragment and trims trailing slashes, so
//! `https://site/x/reviews/y/?utm=1` and `https://site/x/reviews/y` compare
//! equal. The path key additionally drops scheme and host, for joins across
//! passes that disagree on host or scheme.

use url::Url;

pub fn canonical_key(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    match Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            if parsed.cannot_be_a_base() {
                return parsed.to_string();
            }
            let path = parsed.path().trim_end_matches('/').to_string();
            parsed.set_path(if path.is_empty() { "/" } else { &path });
            parsed.to_string()
        }
        Err(_) => trim_slashes_keep_root(strip_query_and_fragment(trimmed)),
    }
}

pub fn path_key(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let path = match Url::parse(trimmed) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => strip_query_and_fragment(trimmed).to_string(),
    };
    path.trim_end_matches('/').to_string()
}

/// The detail URL's path without surrounding slashes, e.g. `london/reviews/dishoom`.
pub fn source_id(raw: &str) -> String {
    path_key(raw).trim_matches('/').to_string()
}

/// Resolves `raw` against `base`, rejecting non-navigable schemes and inline data.
pub fn join_url(raw: &str, base: &Url) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || is_inline_data(raw) {
        return None;
    }
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with('#')
    {
        return None;
    }

    let mut joined = base.join(raw).ok()?;
    if !matches!(joined.scheme(), "http" | "https") {
        return None;
    }
    joined.set_fragment(None);
    Some(joined.to_string())
}

pub fn is_inline_data(raw: &str) -> bool {
    let lower = raw.trim_start().to_ascii_lowercase();
    lower.starts_with("data:") || lower.starts_with("blob:")
}

pub fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed.host_str().map(|v| v.to_ascii_lowercase())
}

/// Lowercase ASCII slug: runs of anything non-alphanumeric become one `-`.
pub fn safe_slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_dash = false;
    for ch in text.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if out.len() >= 120 {
            break;
        }
    }
    if out.is_empty() {
        "item".to_string()
    } else {
        out
    }
}

fn strip_query_and_fragment(raw: &str) -> &str {
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    &raw[..end]
}

fn trim_slashes_keep_root(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() && raw.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}
