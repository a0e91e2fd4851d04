use crate::canonical::{is_inline_data, join_url};
use crate::classify::MediaClassifier;
use crate::config::HarvestConfig;
use crate::embedded::{deep_find_first, first_string_field};
use crate::models::{MediaCandidate, MediaKind, Provenance};
use crate::srcset::{parse_srcset, SrcsetCandidate};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

const SRCSET_ATTRS: &[&str] = &["srcset", "data-srcset"];
const LAZY_ATTRS: &[&str] = &["data-src", "data-lazy-src", "data-original"];
const EMBEDDED_MEDIA_KEYS: &[&str] = &["images", "media", "gallery"];

const NOTE_POST_ONLY: &str = "social post link; direct download unavailable";
const NOTE_POST_WITH_CDN: &str =
    "social post link; a CDN image from this page was collected separately";

pub struct MediaResolver<'a> {
    config: &'a HarvestConfig,
    classifier: &'a MediaClassifier,
}

impl<'a> MediaResolver<'a> {
    pub fn new(config: &'a HarvestConfig, classifier: &'a MediaClassifier) -> Self {
        Self { config, classifier }
    }

    /// Images first (embedded list, then DOM order), then social post links.
    pub fn resolve(
        &self,
        document: &Html,
        embedded: Option<&Value>,
        page_url: &str,
    ) -> Vec<MediaCandidate> {
        let Ok(base) = Url::parse(page_url) else {
            return Vec::new();
        };

        let mut images: Vec<MediaCandidate> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut push = |candidate: MediaCandidate, images: &mut Vec<MediaCandidate>| {
            if seen.insert(candidate.resolved_url.clone()) {
                images.push(candidate);
            }
        };

        if let Some(tree) = embedded {
            for candidate in self.embedded_images(tree, &base) {
                push(candidate, &mut images);
            }
        }

        let img_selector = Selector::parse("img").expect("valid selector");
        for img in document.select(&img_selector) {
            if self.classifier.ancestors.excludes(&img) {
                continue;
            }
            if let Some(candidate) = self.image_for_element(&img, &base) {
                push(candidate, &mut images);
            }
        }

        if let Some(first) = images.first_mut() {
            if first.credit.is_none() {
                first.credit = self.page_level_credit(document);
            }
        }

        let has_social_image = images
            .iter()
            .any(|c| c.provenance == Provenance::SocialCdn);
        let links = self.social_post_links(document, &base, has_social_image);

        images.extend(links);
        images
    }

    /// One DOM image, fully resolved, filtered and credited. Ancestor
    /// exclusion is left to the caller.
    pub fn image_for_element(&self, img: &ElementRef<'_>, base: &Url) -> Option<MediaCandidate> {
        let alt = img.value().attr("alt").map(str::trim).unwrap_or("");
        let raw = best_image_source(img)?;
        let resolved = join_url(&raw, base)?;
        self.accept(raw, resolved, alt, local_credit(img, &self.config.credit_testid_markers))
    }

    /// Rewrites the size token of primary-site URLs; others pass through.
    pub fn upgrade_if_primary(&self, url: &str) -> String {
        if self.classifier.is_primary(url) {
            self.classifier.upgrade_size(url)
        } else {
            url.to_string()
        }
    }

    fn accept(
        &self,
        raw: String,
        resolved: String,
        alt: &str,
        credit: Option<String>,
    ) -> Option<MediaCandidate> {
        if self.classifier.headshots.is_headshot(&resolved, alt) {
            return None;
        }
        let provenance = self.classifier.classify(&resolved)?;
        let resolved = match provenance {
            Provenance::PrimarySite => self.classifier.upgrade_size(&resolved),
            _ => resolved,
        };
        Some(MediaCandidate {
            raw_url: raw,
            resolved_url: resolved,
            provenance,
            alt_text: non_empty(alt),
            credit,
            kind: MediaKind::Image,
            note: None,
        })
    }

    fn embedded_images(&self, tree: &Value, base: &Url) -> Vec<MediaCandidate> {
        let Some(Value::Array(entries)) = deep_find_first(tree, EMBEDDED_MEDIA_KEYS) else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|entry| {
                let map = entry.as_object()?;
                let kind = first_string_field(map, &["type", "mediaType"]).unwrap_or_default();
                if kind.to_ascii_lowercase().contains("video") {
                    return None;
                }
                let raw = first_string_field(map, &["url", "src"])?;
                let resolved = join_url(&raw, base)?;
                let alt = first_string_field(map, &["alt", "altText"]).unwrap_or_default();
                let credit = first_string_field(map, &["credit", "attribution"])
                    .map(|c| strip_credit_label(&c))
                    .and_then(|c| non_empty(&c));
                self.accept(raw, resolved, &alt, credit)
            })
            .collect()
    }

    /// The single page-wide credit block, if there is exactly one.
    fn page_level_credit(&self, document: &Html) -> Option<String> {
        let selector = Selector::parse("[class]").expect("valid selector");
        let mut credits: Vec<String> = Vec::new();
        for el in document.select(&selector) {
            let matches = el.value().classes().any(|class| {
                self.config
                    .page_credit_class_markers
                    .iter()
                    .any(|m| class.contains(m.as_str()))
            });
            if !matches {
                continue;
            }
            let credit = strip_credit_label(&element_text(&el));
            if !credit.is_empty() && !credits.contains(&credit) {
                credits.push(credit);
            }
        }
        if credits.len() == 1 {
            credits.pop()
        } else {
            None
        }
    }

    fn social_post_links(
        &self,
        document: &Html,
        base: &Url,
        has_social_image: bool,
    ) -> Vec<MediaCandidate> {
        let selector = Selector::parse("a[href]").expect("valid selector");
        let note = if has_social_image {
            NOTE_POST_WITH_CDN
        } else {
            NOTE_POST_ONLY
        };
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for anchor in document.select(&selector) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Some(link) = join_url(href, base) else {
                continue;
            };
            let lower = link.to_ascii_lowercase();
            if !self
                .config
                .social_post_markers
                .iter()
                .any(|m| lower.contains(&m.to_ascii_lowercase()))
            {
                continue;
            }
            if !seen.insert(link.clone()) {
                continue;
            }
            out.push(MediaCandidate {
                raw_url: href.trim().to_string(),
                resolved_url: link,
                provenance: Provenance::SocialCdn,
                alt_text: None,
                credit: None,
                kind: MediaKind::SocialPostLink,
                note: Some(note.to_string()),
            });
        }
        out
    }
}

/// Raw (unjoined) source for an `<img>`: responsive candidates, then lazy
/// placeholders, then a CSS background when `src` is inline data, then `src`.
pub fn best_image_source(img: &ElementRef<'_>) -> Option<String> {
    let el = img.value();

    let mut responsive: Vec<SrcsetCandidate> = Vec::new();
    for attr in SRCSET_ATTRS {
        if let Some(value) = el.attr(attr) {
            responsive.extend(parse_srcset(value));
        }
    }
    if let Some(picture) = img.parent().and_then(ElementRef::wrap) {
        if picture.value().name() == "picture" {
            for source in picture
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|c| c.value().name() == "source")
            {
                for attr in SRCSET_ATTRS {
                    if let Some(value) = source.value().attr(attr) {
                        responsive.extend(parse_srcset(value));
                    }
                }
            }
        }
    }
    let mut best: Option<&SrcsetCandidate> = None;
    for candidate in &responsive {
        if best.map_or(true, |b| candidate.descriptor.score() > b.descriptor.score()) {
            best = Some(candidate);
        }
    }
    if let Some(best) = best {
        return Some(best.url.clone());
    }

    for attr in LAZY_ATTRS {
        if let Some(value) = el.attr(attr).map(str::trim) {
            if !value.is_empty() && !is_inline_data(value) {
                return Some(value.to_string());
            }
        }
    }

    let src = el.attr("src").map(str::trim).unwrap_or("");
    if is_inline_data(src) {
        let parent_style = img
            .parent()
            .and_then(ElementRef::wrap)
            .and_then(|p| p.value().attr("style"));
        return [el.attr("style"), parent_style]
            .into_iter()
            .flatten()
            .find_map(background_image_url);
    }
    non_empty(src)
}

pub fn background_image_url(style: &str) -> Option<String> {
    static BG: OnceLock<Regex> = OnceLock::new();
    let re = BG.get_or_init(|| {
        Regex::new(r#"(?i)background-image\s*:\s*url\(\s*["']?([^"')]*?)["']?\s*\)"#)
            .expect("valid regex")
    });
    let url = re.captures(style)?.get(1)?.as_str().trim();
    if url.is_empty() || is_inline_data(url) {
        None
    } else {
        Some(url.to_string())
    }
}

/// Credit text near an image: its container first, then the container's parent.
pub fn local_credit(img: &ElementRef<'_>, testid_markers: &[String]) -> Option<String> {
    let parent = img.parent().and_then(ElementRef::wrap)?;
    let grandparent = parent
        .parent()
        .and_then(ElementRef::wrap)
        .filter(|g| !matches!(g.value().name(), "body" | "html"));
    [Some(parent), grandparent]
        .into_iter()
        .flatten()
        .find_map(|container| credit_within(&container, testid_markers))
}

fn credit_within(container: &ElementRef<'_>, testid_markers: &[String]) -> Option<String> {
    let selector = Selector::parse("[data-testid]").expect("valid selector");
    container.select(&selector).find_map(|el| {
        let testid = el.value().attr("data-testid").unwrap_or("");
        if !testid_markers.iter().any(|m| testid.contains(m.as_str())) {
            return None;
        }
        non_empty(&strip_credit_label(&element_text(&el)))
    })
}

/// Drops a leading "photo credit:" label, case-insensitively.
pub fn strip_credit_label(text: &str) -> String {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    let re = LABEL.get_or_init(|| {
        Regex::new(r"(?i)^\s*photo\s*credits?\s*:\s*").expect("valid regex")
    });
    re.replace(text.trim(), "").trim().to_string()
}

pub(crate) fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PAGE: &str = "https://www.theinfatuation.com/london/reviews/dishoom";
    const CDN: &str = "https://res.cloudinary.com/the-infatuation/image/upload";

    fn resolve(html: &str, embedded: Option<&Value>) -> Vec<MediaCandidate> {
        let config = HarvestConfig::default();
        let classifier = MediaClassifier::from_config(&config).expect("classifier");
        let resolver = MediaResolver::new(&config, &classifier);
        resolver.resolve(&Html::parse_document(html), embedded, PAGE)
    }

    fn images(out: &[MediaCandidate]) -> Vec<&MediaCandidate> {
        out.iter().filter(|c| c.kind == MediaKind::Image).collect()
    }

    #[test]
    fn srcset_beats_lazy_and_src_and_is_upgraded() {
        let html = format!(
            r#"<figure><img alt="Dal" src="{CDN}/w_100/a.jpg" data-src="{CDN}/w_200/b.jpg"
                  srcset="{CDN}/c_fill,w_640/c.jpg 640w, {CDN}/c_fill,w_1280/c.jpg 1280w"></figure>"#
        );
        let out = resolve(&html, None);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].resolved_url, format!("{CDN}/c_fill,w_3840/c.jpg"));
        assert_eq!(out[0].raw_url, format!("{CDN}/c_fill,w_1280/c.jpg"));
        assert_eq!(out[0].provenance, Provenance::PrimarySite);
        assert_eq!(out[0].alt_text.as_deref(), Some("Dal"));
    }

    #[test]
    fn picture_sources_and_lazy_placeholders_are_used() {
        let html = r#"
            <picture>
              <source srcset="https://cdn.example.com/p-small.webp 1x, https://cdn.example.com/p-big.webp 2x">
              <img src="data:image/gif;base64,R0lGOD">
            </picture>
            <img src="data:image/gif;base64,R0lGOD" data-lazy-src="/media/lazy.png">
            <img src="data:image/gif;base64,R0lGOD" style="background-image: url('https://cdn.example.com/bg.jpg')">
            <img src="data:image/gif;base64,R0lGOD">
        "#;
        let out = resolve(html, None);
        let urls: Vec<&str> = out.iter().map(|c| c.resolved_url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://cdn.example.com/p-big.webp",
                "https://www.theinfatuation.com/media/lazy.png",
                "https://cdn.example.com/bg.jpg",
            ]
        );
    }

    #[test]
    fn strong_headshot_marker_is_dropped_without_alt() {
        let html = format!(
            r#"<img src="{CDN}/v1/images/Editorial_Team_Headshots_Sam.jpg">
               <img src="{CDN}/v1/images/room.jpg">"#
        );
        let out = resolve(&html, None);
        assert_eq!(out.len(), 1);
        assert!(out[0].resolved_url.ends_with("room.jpg"));
    }

    #[test]
    fn suggested_reading_widgets_are_skipped() {
        let html = format!(
            r#"<div class="styles_story__x9"><a href="/london/guides/x"><img src="{CDN}/v1/images/other.jpg"></a></div>
               <div class="styles_featuredInContainer__q1"><img src="https://cdn.example.com/press.png"></div>"#
        );
        assert!(resolve(&html, None).is_empty());
    }

    #[test]
    fn provenance_filters_other_urls_by_extension() {
        let html = r#"
            <img src="https://scontent.cdninstagram.com/v/t51/123_n?stp=dst">
            <img src="https://cdn.example.com/sprite.svg">
            <img src="https://cdn.example.com/photo.JPG?width=100">
        "#;
        let out = resolve(html, None);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].provenance, Provenance::SocialCdn);
        assert_eq!(out[1].provenance, Provenance::Other);
    }

    #[test]
    fn embedded_list_comes_first_and_duplicates_collapse() {
        let tree = json!({"props": {"pageProps": {"review": {
            "images": [
                {"url": format!("{CDN}/w_600/v1/images/a.jpg"), "credit": "Photo credit: Jo Lee", "alt": "Room"},
                {"url": "https://cdn.example.com/clip.mp4", "type": "video"}
            ]
        }}}});
        let html = format!(
            r#"<img src="{CDN}/w_1200/v1/images/a.jpg"><img src="{CDN}/w_1200/v1/images/b.jpg">"#
        );
        let out = resolve(&html, Some(&tree));
        let urls: Vec<String> = out.iter().map(|c| c.resolved_url.clone()).collect();
        assert_eq!(
            urls,
            vec![
                format!("{CDN}/w_3840/v1/images/a.jpg"),
                format!("{CDN}/w_3840/v1/images/b.jpg"),
            ]
        );
        assert_eq!(out[0].credit.as_deref(), Some("Jo Lee"));
    }

    #[test]
    fn credits_come_from_container_then_page_fallback() {
        let html = format!(
            r#"<p class="flatplan_photoCredit">Photo credit: Karolina Wiercigroch</p>
               <div class="media"><div><img src="{CDN}/v1/images/one.jpg"></div>
                   <span data-testid="richTextMultimedia-photoCreds">photo credit: Jake Cohen</span></div>
               <div><img src="{CDN}/v1/images/two.jpg"></div>"#
        );
        let out = resolve(&html, None);
        assert_eq!(out[0].credit.as_deref(), Some("Jake Cohen"));
        assert_eq!(out[1].credit, None);

        let html = format!(
            r#"<p class="flatplan_photoCredit">Photo credit: Karolina Wiercigroch</p>
               <div><img src="{CDN}/v1/images/one.jpg"></div>
               <div><img src="{CDN}/v1/images/two.jpg"></div>"#
        );
        let out = resolve(&html, None);
        assert_eq!(out[0].credit.as_deref(), Some("Karolina Wiercigroch"));
        assert_eq!(out[1].credit, None);
    }

    #[test]
    fn social_post_links_are_separate_from_images() {
        let html = r#"
            <img src="https://scontent.cdninstagram.com/v/abc.jpg">
            <a href="https://www.instagram.com/p/Cxyz/">post</a>
            <a href="https://www.instagram.com/p/Cxyz/">again</a>
            <a href="https://www.instagram.com/reel/R1/">reel</a>
            <a href="https://www.instagram.com/dishoom/">profile</a>
        "#;
        let out = resolve(html, None);
        assert_eq!(images(&out).len(), 1);
        let links: Vec<&MediaCandidate> = out
            .iter()
            .filter(|c| c.kind == MediaKind::SocialPostLink)
            .collect();
        assert_eq!(links.len(), 2);
        assert!(links[0]
            .note
            .as_deref()
            .expect("note")
            .contains("collected separately"));
    }

    #[test]
    fn no_two_images_share_a_resolved_url() {
        let html = format!(
            r#"<img src="{CDN}/w_100/x.jpg"><img src="{CDN}/w_200/x.jpg">
               <img data-src="{CDN}/w_300/x.jpg" src="data:image/gif;base64,AAA">"#
        );
        let out = resolve(&html, None);
        let mut seen = HashSet::new();
        for c in images(&out) {
            assert!(seen.insert(c.resolved_url.clone()), "duplicate {}", c.resolved_url);
        }
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn background_style_parsing() {
        assert_eq!(
            background_image_url(r#"color: red; background-image:url("/a b.jpg")"#).as_deref(),
            Some("/a b.jpg")
        );
        assert!(background_image_url("background-image: url(data:image/png;base64,AA)").is_none());
        assert!(background_image_url("color: red").is_none());
    }
}
