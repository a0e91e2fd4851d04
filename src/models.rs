use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    PrimarySite,
    SocialCdn,
    Other,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::PrimarySite => "primary_site",
            Provenance::SocialCdn => "social_cdn",
            Provenance::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    SocialPostLink,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaCandidate {
    pub raw_url: String,
    pub resolved_url: String,
    pub provenance: Provenance,
    pub alt_text: Option<String>,
    pub credit: Option<String>,
    pub kind: MediaKind,
    pub note: Option<String>,
}

/// A candidate as persisted inside a [`ScrapedItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMedia {
    #[serde(flatten)]
    pub candidate: MediaCandidate,
    #[serde(default)]
    pub downloaded: bool,
    #[serde(default)]
    pub local_path: Option<String>,
}

impl From<MediaCandidate> for ItemMedia {
    fn from(candidate: MediaCandidate) -> Self {
        Self {
            candidate,
            downloaded: false,
            local_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadResult {
    pub candidate: MediaCandidate,
    /// Set only when the bytes are on disk, fetched now or by an earlier run.
    pub local_path: Option<String>,
    pub success: bool,
    pub bytes: u64,
    pub sha256: Option<String>,
    pub reused: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RundownEntry {
    pub name: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub image_credit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CtaLinks {
    pub website: Option<String>,
    pub directions: Option<String>,
    pub reserve: Option<String>,
}

/// One detail page. Unknown fields from older output files survive a
/// load/save cycle through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapedItem {
    pub source_id: String,
    pub source_platform: String,
    pub item_id: String,
    pub dedup_id: Option<String>,
    pub url: String,
    pub city_slug: String,
    pub title: Option<String>,
    /// `YYYY-MM-DDT00:00:00`
    pub published_at: Option<String>,
    pub published_date_text: Option<String>,

    pub street: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,

    pub rating: Option<f64>,
    pub price: Option<String>,
    pub cuisine: Option<String>,
    pub neighborhood: Option<String>,
    pub perfect_for: Vec<String>,
    pub cuisines: Vec<String>,
    pub neighborhoods: Vec<String>,
    pub author: Option<Author>,
    pub review_text: Option<String>,
    pub food_rundown: Vec<RundownEntry>,
    pub reservation_url: Option<String>,
    pub cta_links: CtaLinks,

    pub media: Vec<ItemMedia>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ScrapedItem {
    /// The `YYYY-MM-DD` prefix of `published_at`, if any.
    pub fn published_date(&self) -> Option<&str> {
        let value = self.published_at.as_deref()?;
        let date = value.get(..10)?;
        chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .ok()
            .map(|_| date)
    }
}

pub fn item_id_for(platform: &str, source_id: &str) -> String {
    format!("{platform}:{source_id}")
}

/// Stable 32-hex id for cross-source deduplication.
pub fn dedup_id_for(platform: &str, source_id: &str) -> Option<String> {
    if platform.trim().is_empty() || source_id.trim().is_empty() {
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(format!("src:{platform}:{source_id}").as_bytes());
    let digest = hex::encode(hasher.finalize());
    Some(digest[..32].to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub primary_rows: usize,
    pub media_rows: usize,
    pub bad_rows: usize,
    pub indexed_by_canonical: usize,
    pub indexed_by_path: usize,
    pub matched_by_canonical: usize,
    pub matched_by_path: usize,
    pub missing: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_survive_round_trip() {
        let raw = r#"{"source_id":"london/reviews/a","url":"https://x/london/reviews/a","legacy_field":{"k":1}}"#;
        let item: ScrapedItem = serde_json::from_str(raw).expect("parse");
        assert_eq!(item.source_id, "london/reviews/a");
        let back = serde_json::to_value(&item).expect("to value");
        assert_eq!(back["legacy_field"]["k"], 1);
    }

    #[test]
    fn media_is_flattened_with_snake_case_enums() {
        let media = ItemMedia::from(MediaCandidate {
            raw_url: "https://cdn/a.jpg".to_string(),
            resolved_url: "https://cdn/a.jpg".to_string(),
            provenance: Provenance::SocialCdn,
            alt_text: None,
            credit: None,
            kind: MediaKind::Image,
            note: None,
        });
        let value = serde_json::to_value(&media).expect("to value");
        assert_eq!(value["provenance"], "social_cdn");
        assert_eq!(value["kind"], "image");
        assert_eq!(value["downloaded"], false);
    }

    #[test]
    fn dedup_id_is_stable_and_32_hex() {
        let a = dedup_id_for("theinfatuation", "london/reviews/a").expect("id");
        let b = dedup_id_for("theinfatuation", "london/reviews/a").expect("id");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(dedup_id_for("theinfatuation", " ").is_none());
    }

    #[test]
    fn published_date_requires_valid_prefix() {
        let mut item = ScrapedItem {
            published_at: Some("2024-03-09T00:00:00".to_string()),
            ..ScrapedItem::default()
        };
        assert_eq!(item.published_date(), Some("2024-03-09"));
        item.published_at = Some("March 9".to_string());
        assert_eq!(item.published_date(), None);
    }
}
