use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("invalid date {value:?}: expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("existing output at {path} is unreadable: {message}")]
    UnreadableOutput { path: String, message: String },

    #[error("transport failed for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("webdriver error: {0}")]
    WebDriver(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl HarvestError {
    /// Input/setup failures that must abort a run before any page is visited.
    pub fn is_fatal_input(&self) -> bool {
        matches!(
            self,
            HarvestError::InvalidDate { .. }
                | HarvestError::InvalidTarget(_)
                | HarvestError::Config(_)
                | HarvestError::UnreadableOutput { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
