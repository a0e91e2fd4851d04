//! W3C WebDriver session driven over plain HTTP (chromedriver, geckodriver).

use crate::config::HarvestConfig;
use crate::eventlog::redact_url_for_log;
use crate::session::{build_agent, BrowserSession};
use crate::{HarvestError, Result};
use serde_json::{json, Value};
use std::io::Read;
use std::time::Duration;

const SCROLL_SCRIPT: &str =
    "window.scrollTo(0, Math.max(document.body.scrollHeight, document.documentElement.scrollHeight)); return document.body.scrollHeight;";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverBrowser {
    Chrome,
    Firefox,
}

#[derive(Debug, Clone)]
pub struct WebDriverOptions {
    /// e.g. `http://127.0.0.1:9515`
    pub endpoint: String,
    pub browser: DriverBrowser,
    pub headless: bool,
}

pub struct WebDriverSession {
    agent: ureq::Agent,
    endpoint: String,
    session_id: Option<String>,
    page_timeout_ms: u64,
}

impl WebDriverSession {
    pub fn start(options: &WebDriverOptions, config: &HarvestConfig) -> Result<Self> {
        // Page loads are bounded by the driver's own timeout; leave headroom.
        let agent = build_agent(&config.user_agent, config.page_timeout_secs.saturating_add(30));
        let endpoint = options.endpoint.trim_end_matches('/').to_string();
        let mut session = Self {
            agent,
            endpoint,
            session_id: None,
            page_timeout_ms: config.page_timeout_secs.saturating_mul(1000),
        };

        let created = session.command(
            "POST",
            "/session",
            Some(capabilities(options.browser, options.headless, &config.user_agent)),
        )?;
        let session_id = created
            .pointer("/value/sessionId")
            .and_then(|v| v.as_str())
            .or_else(|| created.pointer("/sessionId").and_then(|v| v.as_str()))
            .ok_or_else(|| HarvestError::WebDriver("session id missing in response".to_string()))?
            .to_string();
        session.session_id = Some(session_id);

        let timeout_ms = session.page_timeout_ms;
        session.session_command("POST", "/timeouts", Some(json!({ "pageLoad": timeout_ms })))?;
        Ok(session)
    }

    fn session_command(&self, method: &str, suffix: &str, body: Option<Value>) -> Result<Value> {
        let id = self
            .session_id
            .as_deref()
            .ok_or_else(|| HarvestError::WebDriver("session is closed".to_string()))?;
        self.command(method, &format!("/session/{id}{suffix}"), body)
    }

    fn command(&self, method: &str, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{path}", self.endpoint);
        let response = match method {
            "POST" => self
                .agent
                .post(&url)
                .header("Content-Type", "application/json")
                .send(body.unwrap_or_else(|| json!({})).to_string()),
            "DELETE" => self.agent.delete(&url).call(),
            _ => self.agent.get(&url).call(),
        };
        let mut response = response.map_err(|err| {
            HarvestError::WebDriver(format!("{method} {path} failed: {err}"))
        })?;

        let status = response.status().as_u16();
        let mut text = String::new();
        response
            .body_mut()
            .as_reader()
            .read_to_string(&mut text)
            .map_err(|err| HarvestError::WebDriver(format!("{method} {path} read failed: {err}")))?;

        let value: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|err| {
                HarvestError::WebDriver(format!("{method} {path} returned invalid json: {err}"))
            })?
        };
        if let Some(message) = webdriver_error(&value) {
            return Err(HarvestError::WebDriver(format!("{method} {path}: {message}")));
        }
        if status >= 400 {
            return Err(HarvestError::WebDriver(format!("{method} {path}: http {status}")));
        }
        Ok(value)
    }
}

impl BrowserSession for WebDriverSession {
    fn navigate(&mut self, url: &str) -> Result<()> {
        self.session_command("POST", "/url", Some(json!({ "url": url })))
            .map(|_| ())
            .map_err(|err| HarvestError::Transport {
                url: redact_url_for_log(url),
                message: err.to_string(),
            })
    }

    fn current_url(&mut self) -> Result<String> {
        let value = self.session_command("GET", "/url", None)?;
        string_value(&value, "url")
    }

    fn page_source(&mut self) -> Result<String> {
        let value = self.session_command("GET", "/source", None)?;
        string_value(&value, "source")
    }

    fn scroll_to_bottom(&mut self) -> Result<()> {
        self.session_command(
            "POST",
            "/execute/sync",
            Some(json!({ "script": SCROLL_SCRIPT, "args": [] })),
        )?;
        Ok(())
    }

    fn wait(&mut self, ms: u64) {
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms));
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.session_id.is_none() {
            return Ok(());
        }
        let result = self.session_command("DELETE", "", None).map(|_| ());
        self.session_id = None;
        result
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn string_value(value: &Value, what: &str) -> Result<String> {
    value
        .get("value")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HarvestError::WebDriver(format!("{what} missing in response")))
}

/// `error: message` from a W3C error payload, if the payload is one.
pub fn webdriver_error(value: &Value) -> Option<String> {
    let error = value.pointer("/value/error").and_then(|v| v.as_str())?;
    let message = value
        .pointer("/value/message")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    Some(format!("{error}: {message}"))
}

pub fn capabilities(browser: DriverBrowser, headless: bool, user_agent: &str) -> Value {
    match browser {
        DriverBrowser::Firefox => {
            let mut args = Vec::<String>::new();
            if headless {
                args.push("-headless".to_string());
            }
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "firefox",
                        "acceptInsecureCerts": true,
                        "moz:firefoxOptions": {
                            "args": args,
                            "prefs": { "general.useragent.override": user_agent }
                        }
                    }
                }
            })
        }
        DriverBrowser::Chrome => {
            let mut args = Vec::<String>::new();
            if headless {
                args.push("--headless=new".to_string());
            }
            args.push("--window-size=1400,1200".to_string());
            args.push("--disable-gpu".to_string());
            args.push("--disable-dev-shm-usage".to_string());
            args.push("--no-first-run".to_string());
            args.push(format!("--user-agent={user_agent}"));
            if !cfg!(target_os = "macos") {
                args.push("--no-sandbox".to_string());
            }
            json!({
                "capabilities": {
                    "alwaysMatch": {
                        "browserName": "chrome",
                        "acceptInsecureCerts": true,
                        "goog:chromeOptions": { "args": args }
                    }
                }
            })
        }
    }
}
