use crate::config::HarvestConfig;
use crate::eventlog::redact_url_for_log;
use crate::{HarvestError, Result};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

const MAX_PAGE_BYTES: u64 = 16 * 1024 * 1024;
const MAX_ASSET_BYTES: u64 = 64 * 1024 * 1024;

/// One browser context. Pages are driven strictly one at a time.
pub trait BrowserSession {
    fn navigate(&mut self, url: &str) -> Result<()>;
    fn current_url(&mut self) -> Result<String>;
    fn page_source(&mut self) -> Result<String>;
    /// Asks the page to reveal lazily loaded content, if it can.
    fn scroll_to_bottom(&mut self) -> Result<()>;
    fn wait(&mut self, ms: u64);
    fn close(&mut self) -> Result<()>;
}

/// Runs `f` and closes the session afterwards, whether `f` failed or not.
pub fn with_session<S, T, F>(session: &mut S, f: F) -> Result<T>
where
    S: BrowserSession + ?Sized,
    F: FnOnce(&mut S) -> Result<T>,
{
    let result = f(session);
    let closed = session.close();
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), _) => Err(err),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAsset {
    pub status: u16,
    /// Lowercased `Content-Type`, empty when absent.
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub trait AssetFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedAsset>;
}

pub(crate) fn build_agent(user_agent: &str, timeout_secs: u64) -> ureq::Agent {
    let mut config = ureq::Agent::config_builder();
    config = config
        .http_status_as_error(false)
        .timeout_global(Some(Duration::from_secs(timeout_secs.max(1))))
        .user_agent(user_agent);
    config.build().into()
}

fn call_get_with_cookie(
    agent: &ureq::Agent,
    url: &str,
    cookie: Option<&str>,
) -> std::result::Result<ureq::http::Response<ureq::Body>, ureq::Error> {
    let mut request = agent.get(url);
    if let Some(cookie) = cookie {
        let trimmed = cookie.trim();
        if !trimmed.is_empty() {
            request = request.header("Cookie", trimmed);
        }
    }
    request.call()
}

fn header_string(response: &ureq::http::Response<ureq::Body>, key: &str) -> String {
    response
        .headers()
        .get(key)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn transport_error(url: &str, message: impl std::fmt::Display) -> HarvestError {
    HarvestError::Transport {
        url: redact_url_for_log(url),
        message: message.to_string(),
    }
}

/// Server-rendered pages over plain HTTP. Nothing can be revealed by
/// scrolling, so the listing crawler converges after its stability rounds.
pub struct HttpSession {
    agent: ureq::Agent,
    cookie: Option<String>,
    current_url: Option<String>,
    source: String,
    closed: bool,
}

impl HttpSession {
    pub fn new(config: &HarvestConfig) -> Self {
        Self {
            agent: build_agent(&config.user_agent, config.page_timeout_secs),
            cookie: normalize_cookie(config.consent_cookie.as_deref()),
            current_url: None,
            source: String::new(),
            closed: false,
        }
    }
}

impl BrowserSession for HttpSession {
    fn navigate(&mut self, url: &str) -> Result<()> {
        if self.closed {
            return Err(transport_error(url, "session already closed"));
        }
        let mut response = call_get_with_cookie(&self.agent, url, self.cookie.as_deref())
            .map_err(|err| transport_error(url, err))?;
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(transport_error(url, format!("http {status}")));
        }

        let mut body = Vec::new();
        response
            .body_mut()
            .as_reader()
            .take(MAX_PAGE_BYTES)
            .read_to_end(&mut body)
            .map_err(|err| transport_error(url, err))?;
        self.source = String::from_utf8_lossy(&body).into_owned();
        self.current_url = Some(url.to_string());
        Ok(())
    }

    fn current_url(&mut self) -> Result<String> {
        self.current_url
            .clone()
            .ok_or_else(|| transport_error("about:blank", "no page loaded"))
    }

    fn page_source(&mut self) -> Result<String> {
        Ok(self.source.clone())
    }

    fn scroll_to_bottom(&mut self) -> Result<()> {
        Ok(())
    }

    fn wait(&mut self, ms: u64) {
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms));
        }
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.source.clear();
        Ok(())
    }
}

pub struct HttpFetcher {
    agent: ureq::Agent,
    cookie: Option<String>,
}

impl HttpFetcher {
    pub fn new(config: &HarvestConfig) -> Self {
        Self {
            agent: build_agent(&config.user_agent, config.download_timeout_secs),
            cookie: normalize_cookie(config.consent_cookie.as_deref()),
        }
    }
}

impl AssetFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedAsset> {
        let mut response = call_get_with_cookie(&self.agent, url, self.cookie.as_deref())
            .map_err(|err| transport_error(url, err))?;
        let status = response.status().as_u16();
        let content_type = header_string(&response, "content-type");
        let mut bytes = Vec::new();
        if status < 400 {
            response
                .body_mut()
                .as_reader()
                .take(MAX_ASSET_BYTES)
                .read_to_end(&mut bytes)
                .map_err(|err| transport_error(url, err))?;
        }
        Ok(FetchedAsset {
            status,
            content_type,
            bytes,
        })
    }
}

/// Accepts a raw `Cookie` header, a JSON cookie export, or a path to a file
/// holding either.
pub fn normalize_cookie(value: Option<&str>) -> Option<String> {
    let raw = value.unwrap_or("").trim();
    if raw.is_empty() {
        return None;
    }

    if let Some(from_json) = cookie_json_to_header(raw) {
        return Some(from_json);
    }

    let path = Path::new(raw);
    if path.is_file() {
        if let Ok(contents) = std::fs::read_to_string(path) {
            if let Some(from_json) = cookie_json_to_header(&contents) {
                return Some(from_json);
            }
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    Some(raw.to_string())
}

fn cookie_json_to_header(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let mut pairs: Vec<(String, String)> = Vec::new();

    fn push_pair(pairs: &mut Vec<(String, String)>, name: &str, value: &str) {
        let name = name.trim();
        if name.is_empty() || name.contains(';') || name.contains('=') {
            return;
        }
        if pairs.iter().any(|(existing, _)| existing == name) {
            return;
        }
        pairs.push((name.to_string(), value.trim().to_string()));
    }

    fn collect(value: &serde_json::Value, pairs: &mut Vec<(String, String)>) {
        match value {
            serde_json::Value::Array(items) => {
                for item in items {
                    collect(item, pairs);
                }
            }
            serde_json::Value::Object(map) => {
                if let (Some(name), Some(value)) = (
                    map.get("name").and_then(|v| v.as_str()),
                    map.get("value").and_then(|v| v.as_str()),
                ) {
                    push_pair(pairs, name, value);
                    return;
                }
                if let Some(cookies) = map.get("cookies") {
                    collect(cookies, pairs);
                    return;
                }
                for (key, value) in map {
                    if let Some(value) = value.as_str() {
                        push_pair(pairs, key, value);
                    }
                }
            }
            _ => {}
        }
    }

    collect(&value, &mut pairs);
    if pairs.is_empty() {
        return None;
    }
    Some(
        pairs
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; "),
    )
}
