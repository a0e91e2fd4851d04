use crate::canonical::host_of;
use crate::config::HarvestConfig;
use crate::models::Provenance;
use crate::{HarvestError, Result};
use regex::Regex;
use scraper::ElementRef;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleHit {
    Strong,
    Weak,
    Miss,
}

/// One independent headshot signal, evaluated against the lowercased URL.
pub trait HeadshotRule: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, url_lower: &str) -> RuleHit;
}

pub struct MarkerRule {
    marker: String,
}

impl MarkerRule {
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_ascii_lowercase(),
        }
    }
}

impl HeadshotRule for MarkerRule {
    fn name(&self) -> &str {
        &self.marker
    }

    fn evaluate(&self, url_lower: &str) -> RuleHit {
        if !self.marker.is_empty() && url_lower.contains(&self.marker) {
            RuleHit::Strong
        } else {
            RuleHit::Miss
        }
    }
}

pub struct PatternRule {
    source: String,
    pattern: Regex,
}

impl PatternRule {
    pub fn new(pattern: &str) -> Result<Self> {
        let lowered = pattern.to_ascii_lowercase();
        let compiled = Regex::new(&lowered).map_err(|e| {
            HarvestError::Config(format!("invalid headshot pattern {pattern:?}: {e}"))
        })?;
        Ok(Self {
            source: lowered,
            pattern: compiled,
        })
    }
}

impl HeadshotRule for PatternRule {
    fn name(&self) -> &str {
        &self.source
    }

    fn evaluate(&self, url_lower: &str) -> RuleHit {
        if self.pattern.is_match(url_lower) {
            RuleHit::Weak
        } else {
            RuleHit::Miss
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadshotVerdict {
    pub strong: bool,
    pub weak_hits: usize,
    pub alt_looks_like_name: bool,
}

pub struct HeadshotFilter {
    rules: Vec<Box<dyn HeadshotRule>>,
    min_weak_hits: usize,
    min_hits_with_name: usize,
}

impl HeadshotFilter {
    pub fn new(
        rules: Vec<Box<dyn HeadshotRule>>,
        min_weak_hits: usize,
        min_hits_with_name: usize,
    ) -> Self {
        Self {
            rules,
            min_weak_hits,
            min_hits_with_name,
        }
    }

    pub fn from_config(config: &HarvestConfig) -> Result<Self> {
        let mut rules: Vec<Box<dyn HeadshotRule>> = Vec::new();
        for marker in &config.headshot_strong_markers {
            rules.push(Box::new(MarkerRule::new(marker)));
        }
        for pattern in &config.headshot_weak_patterns {
            rules.push(Box::new(PatternRule::new(pattern)?));
        }
        Ok(Self::new(
            rules,
            config.headshot_min_weak_hits,
            config.headshot_min_hits_with_name,
        ))
    }

    pub fn score(&self, url: &str, alt: &str) -> HeadshotVerdict {
        let url_lower = url.to_ascii_lowercase();
        let mut verdict = HeadshotVerdict {
            alt_looks_like_name: looks_like_person_name(alt),
            ..HeadshotVerdict::default()
        };
        for rule in &self.rules {
            match rule.evaluate(&url_lower) {
                RuleHit::Strong => verdict.strong = true,
                RuleHit::Weak => verdict.weak_hits += 1,
                RuleHit::Miss => {}
            }
        }
        verdict
    }

    pub fn is_headshot(&self, url: &str, alt: &str) -> bool {
        let verdict = self.score(url, alt);
        verdict.strong
            || verdict.weak_hits >= self.min_weak_hits
            || (verdict.weak_hits >= self.min_hits_with_name && verdict.alt_looks_like_name)
    }
}

/// Two or three purely alphabetic words, e.g. "Sam Smith" or "Ana De-Souza".
pub fn looks_like_person_name(alt: &str) -> bool {
    let alt = alt.trim();
    let word_count = alt.split_whitespace().count();
    if !(2..=3).contains(&word_count) {
        return false;
    }
    alt.replace('\u{2019}', "'")
        .replace('-', " ")
        .split_whitespace()
        .all(|part| part.chars().all(char::is_alphabetic))
}

pub struct AncestorFilter {
    markers: Vec<String>,
}

impl AncestorFilter {
    pub fn new(markers: Vec<String>) -> Self {
        Self { markers }
    }

    pub fn excludes(&self, element: &ElementRef<'_>) -> bool {
        element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|ancestor| {
                ancestor
                    .value()
                    .classes()
                    .any(|class| self.markers.iter().any(|m| class.contains(m.as_str())))
            })
    }
}

pub struct MediaClassifier {
    primary_host: String,
    primary_path_prefix: String,
    size_pattern: Regex,
    max_size_token: String,
    social_cdn_markers: Vec<String>,
    raster_extensions: Vec<String>,
    pub headshots: HeadshotFilter,
    pub ancestors: AncestorFilter,
}

impl MediaClassifier {
    pub fn from_config(config: &HarvestConfig) -> Result<Self> {
        let size_pattern = Regex::new(r"([/,])w_\d+\b").expect("valid size regex");
        Ok(Self {
            primary_host: config.primary_cdn_host.to_ascii_lowercase(),
            primary_path_prefix: config.primary_cdn_path_prefix.clone(),
            size_pattern,
            max_size_token: config.max_size_token.clone(),
            social_cdn_markers: config
                .social_cdn_markers
                .iter()
                .map(|m| m.to_ascii_lowercase())
                .collect(),
            raster_extensions: config
                .raster_extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            headshots: HeadshotFilter::from_config(config)?,
            ancestors: AncestorFilter::new(config.excluded_ancestor_class_markers.clone()),
        })
    }

    /// `None` means the URL is not worth keeping as an image.
    pub fn classify(&self, url: &str) -> Option<Provenance> {
        if self.is_primary(url) {
            return Some(Provenance::PrimarySite);
        }
        let lower = url.to_ascii_lowercase();
        if self.social_cdn_markers.iter().any(|m| lower.contains(m)) {
            return Some(Provenance::SocialCdn);
        }
        if self.has_raster_extension(url) {
            return Some(Provenance::Other);
        }
        None
    }

    pub fn is_primary(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        host_of(url).as_deref() == Some(self.primary_host.as_str())
            && parsed.path().starts_with(&self.primary_path_prefix)
    }

    /// Rewrites every width token to the maximum size. Idempotent.
    pub fn upgrade_size(&self, url: &str) -> String {
        let replacement = format!("${{1}}{}", self.max_size_token);
        self.size_pattern
            .replace_all(url, replacement.as_str())
            .into_owned()
    }

    pub fn has_raster_extension(&self, url: &str) -> bool {
        let path = match Url::parse(url) {
            Ok(parsed) => parsed.path().to_ascii_lowercase(),
            Err(_) => url
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase(),
        };
        self.raster_extensions.iter().any(|ext| path.ends_with(ext))
    }
}
