use crate::paths::OutputPaths;
use crate::{HarvestError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub platform: String,
    pub site_base: String,
    /// `{city}` is replaced with the target's slug.
    pub listing_path_template: String,
    pub detail_path_template: String,

    /// Consecutive non-productive reveal rounds before the listing is considered complete.
    pub stability_rounds: usize,
    pub max_reveal_rounds: usize,
    pub scroll_wait_ms: u64,
    pub settle_wait_ms: u64,
    pub request_delay_ms: u64,
    pub page_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub user_agent: String,
    pub consent_cookie: Option<String>,

    pub primary_cdn_host: String,
    pub primary_cdn_path_prefix: String,
    pub max_size_token: String,
    pub social_cdn_markers: Vec<String>,
    pub social_post_markers: Vec<String>,
    pub excluded_ancestor_class_markers: Vec<String>,
    pub credit_testid_markers: Vec<String>,
    pub page_credit_class_markers: Vec<String>,
    pub raster_extensions: Vec<String>,

    pub headshot_strong_markers: Vec<String>,
    /// Regexes matched against the lowercased URL.
    pub headshot_weak_patterns: Vec<String>,
    pub headshot_min_weak_hits: usize,
    pub headshot_min_hits_with_name: usize,

    pub city_countries: BTreeMap<String, String>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        let city_countries = [
            ("london", "GB"),
            ("manchester", "GB"),
            ("edinburgh", "GB"),
            ("new-york", "US"),
            ("san-francisco", "US"),
            ("los-angeles", "US"),
            ("chicago", "US"),
            ("austin", "US"),
            ("toronto", "CA"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            platform: "theinfatuation".to_string(),
            site_base: "https://www.theinfatuation.com".to_string(),
            listing_path_template: "/{city}/reviews".to_string(),
            detail_path_template: "/{city}/reviews/".to_string(),
            stability_rounds: 3,
            max_reveal_rounds: 400,
            scroll_wait_ms: 1_200,
            settle_wait_ms: 600,
            request_delay_ms: 200,
            page_timeout_secs: 60,
            download_timeout_secs: 40,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            consent_cookie: None,
            primary_cdn_host: "res.cloudinary.com".to_string(),
            primary_cdn_path_prefix: "/the-infatuation/".to_string(),
            max_size_token: "w_3840".to_string(),
            social_cdn_markers: strings(&["cdninstagram", "fbcdn.net", "instagram"]),
            social_post_markers: strings(&["instagram.com/p/", "instagram.com/reel/"]),
            excluded_ancestor_class_markers: strings(&[
                "styles_story__",
                "styles_featuredInContainer__",
            ]),
            credit_testid_markers: strings(&["photoCreds", "photoCredit"]),
            page_credit_class_markers: strings(&["flatplan_photoCredit"]),
            raster_extensions: strings(&[".jpg", ".jpeg", ".png", ".webp"]),
            headshot_strong_markers: strings(&["/images/editorial_team_headshots_"]),
            headshot_weak_patterns: strings(&[
                r"/images/editorial_team_headshots_",
                r"/c_thumb,",
                r"\bar_1:1\b",
                r"\bg_face\b",
            ]),
            headshot_min_weak_hits: 3,
            headshot_min_hits_with_name: 2,
            city_countries,
        }
    }
}

impl HarvestConfig {
    pub fn listing_url(&self, city_slug: &str) -> String {
        format!(
            "{}{}",
            self.site_base.trim_end_matches('/'),
            self.listing_path_template.replace("{city}", city_slug)
        )
    }

    pub fn detail_prefix(&self, city_slug: &str) -> String {
        self.detail_path_template.replace("{city}", city_slug)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stability_rounds == 0 {
            return Err(HarvestError::Config(
                "stability_rounds must be at least 1".to_string(),
            ));
        }
        if !self.detail_path_template.contains("{city}") {
            return Err(HarvestError::Config(
                "detail_path_template must contain {city}".to_string(),
            ));
        }
        for pattern in &self.headshot_weak_patterns {
            Regex::new(pattern).map_err(|e| {
                HarvestError::Config(format!("invalid headshot pattern {pattern:?}: {e}"))
            })?;
        }
        url::Url::parse(&self.site_base)
            .map_err(|e| HarvestError::Config(format!("invalid site_base: {e}")))?;
        Ok(())
    }
}

pub fn load_config(paths: &OutputPaths) -> Result<HarvestConfig> {
    let path = paths.config_path();
    if !path.exists() {
        return Ok(HarvestConfig::default());
    }
    let bytes = std::fs::read(&path)?;
    let parsed: HarvestConfig = serde_json::from_slice(&bytes).map_err(|e| {
        HarvestError::Config(format!(
            "failed to parse config at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    parsed.validate()?;
    Ok(parsed)
}

pub fn save_config(paths: &OutputPaths, config: &HarvestConfig) -> Result<()> {
    let path = paths.config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, format!("{json}\n"))?;
    Ok(())
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = OutputPaths::new(dir.path().to_path_buf());
        let cfg = load_config(&paths).expect("load");
        assert_eq!(cfg.stability_rounds, 3);
        assert_eq!(cfg.headshot_min_weak_hits, 3);
        assert_eq!(cfg.listing_url("london"), "https://www.theinfatuation.com/london/reviews");
        assert_eq!(cfg.detail_prefix("new-york"), "/new-york/reviews/");
    }

    #[test]
    fn partial_config_keeps_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = OutputPaths::new(dir.path().to_path_buf());
        std::fs::create_dir_all(paths.config_dir()).expect("mkdir");
        std::fs::write(paths.config_path(), r#"{"stability_rounds": 5}"#).expect("write");

        let cfg = load_config(&paths).expect("load");
        assert_eq!(cfg.stability_rounds, 5);
        assert_eq!(cfg.max_size_token, "w_3840");
    }

    #[test]
    fn invalid_pattern_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = OutputPaths::new(dir.path().to_path_buf());
        let cfg = HarvestConfig {
            headshot_weak_patterns: vec!["(unclosed".to_string()],
            ..HarvestConfig::default()
        };
        save_config(&paths, &cfg).expect("save");
        let err = load_config(&paths).expect_err("must fail");
        assert!(err.is_fatal_input());
    }
}
