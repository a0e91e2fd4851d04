use crate::canonical::{join_url, source_id};
use crate::config::HarvestConfig;
use crate::embedded::{
    deep_find_first, find_objects, first_string_field, json_ld_blocks, next_data, pick_number,
    pick_string,
};
use crate::media::{element_text, MediaResolver};
use crate::models::{
    dedup_id_for, item_id_for, Author, CtaLinks, ItemMedia, RundownEntry, ScrapedItem,
};
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

/// Everything extractable from one detail page. Missing fields stay `None`.
pub fn build_item(
    config: &HarvestConfig,
    resolver: &MediaResolver<'_>,
    html: &str,
    page_url: &str,
    city_slug: &str,
) -> ScrapedItem {
    let document = Html::parse_document(html);
    let next = next_data(&document);
    let ld = json_ld_blocks(&document);
    let base = Url::parse(page_url).ok();

    let sid = source_id(page_url);
    let (published_date_text, published) = published_date(&document, next.as_ref());
    let place = place_from_json_ld(&ld);
    let tags = tags(&document, next.as_ref());
    let reservation_url = base.as_ref().and_then(|b| reservation_url(&document, b));
    let mut cta_links = base
        .as_ref()
        .map(|b| cta_links(&document, b))
        .unwrap_or_default();
    cta_links.reserve = reservation_url.clone();

    let city = place.city.clone().or_else(|| city_from_slug(city_slug));
    let country = place
        .country
        .clone()
        .or_else(|| config.city_countries.get(city_slug).cloned());

    let media = resolver
        .resolve(&document, next.as_ref(), page_url)
        .into_iter()
        .map(ItemMedia::from)
        .collect();

    ScrapedItem {
        item_id: item_id_for(&config.platform, &sid),
        dedup_id: dedup_id_for(&config.platform, &sid),
        source_id: sid,
        source_platform: config.platform.clone(),
        url: page_url.to_string(),
        city_slug: city_slug.to_string(),
        title: title(&document),
        published_at: published.map(|d| format!("{}T00:00:00", d.format("%Y-%m-%d"))),
        published_date_text,
        street: place.street,
        city,
        postal_code: place.postal_code,
        country,
        phone: place.phone,
        lat: place.lat,
        lng: place.lng,
        rating: rating(&ld, next.as_ref(), html),
        price: price(&document, &ld, next.as_ref()),
        cuisine: tags.cuisines.first().cloned(),
        neighborhood: tags.neighborhoods.first().cloned(),
        perfect_for: tags.perfect_for,
        cuisines: tags.cuisines,
        neighborhoods: tags.neighborhoods,
        author: author(&document, next.as_ref()),
        review_text: review_text(&document, next.as_ref()),
        food_rundown: base
            .as_ref()
            .map(|b| food_rundown(&document, next.as_ref(), resolver, b))
            .unwrap_or_default(),
        reservation_url,
        cta_links,
        media,
        extra: serde_json::Map::new(),
    }
}

fn select_first<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next()
}

fn text_of(document: &Html, css: &str) -> Option<String> {
    select_first(document, css)
        .map(|el| element_text(&el))
        .filter(|t| !t.is_empty())
}

pub fn title(document: &Html) -> Option<String> {
    text_of(document, "h1").or_else(|| text_of(document, "title"))
}

/// Accepts ISO dates and datetimes plus the long English forms the site prints.
pub fn parse_date_any(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(prefix) = text.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(date);
        }
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(text) {
        return Some(dt.date_naive());
    }
    ["%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%d %b %Y", "%B %d %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

/// (display text, parsed date) from `<time>`, article meta tags, then embedded keys.
pub fn published_date(document: &Html, next: Option<&Value>) -> (Option<String>, Option<NaiveDate>) {
    let mut time_text = None;
    if let Some(time) = select_first(document, "time") {
        let datetime = time.value().attr("datetime").map(str::trim).unwrap_or("");
        let text = element_text(&time);
        let display = if text.is_empty() { datetime.to_string() } else { text.clone() };
        let display = (!display.is_empty()).then_some(display);
        if let Some(date) = parse_date_any(datetime).or_else(|| parse_date_any(&text)) {
            return (display, Some(date));
        }
        time_text = display;
    }

    for key in ["article:published_time", "og:updated_time", "article:modified_time"] {
        let css = format!(r#"meta[property="{key}"]"#);
        let content = select_first(document, &css).and_then(|m| m.value().attr("content"));
        if let Some(content) = content {
            if let Some(date) = parse_date_any(content) {
                return (Some(content.trim().to_string()), Some(date));
            }
        }
    }

    if let Some(next) = next {
        let raw = deep_find_first(
            next,
            &["publishedDate", "published_at", "publishedAt", "date", "published_date"],
        );
        if let Some(raw) = raw.and_then(|v| pick_string(Some(v))) {
            if let Some(date) = parse_date_any(&raw) {
                return (Some(raw), Some(date));
            }
            time_text = time_text.or(Some(raw));
        }
    }
    (time_text, None)
}

pub fn author(document: &Html, next: Option<&Value>) -> Option<Author> {
    if let Some(next) = next {
        let candidates = find_objects(next, |m| {
            m.contains_key("name") && ["title", "role", "jobTitle"].iter().any(|k| m.contains_key(*k))
        });
        for candidate in candidates {
            let name = first_string_field(candidate, &["name"]);
            if let Some(name) = name.filter(|n| n.split_whitespace().count() >= 2) {
                return Some(Author {
                    name: Some(name),
                    role: first_string_field(candidate, &["title", "role", "jobTitle"]),
                });
            }
        }
        let name = pick_string(deep_find_first(next, &["authorName", "author_name"]));
        if let Some(name) = name.filter(|n| n.split_whitespace().count() >= 2) {
            return Some(Author {
                name: Some(name),
                role: pick_string(deep_find_first(next, &["authorTitle", "author_title"])),
            });
        }
    }

    let name = text_of(document, r#"[data-testid="contributorName"]"#)
        .or_else(|| text_of(document, ".flatplan_authorName"))?;
    Some(Author {
        name: Some(name),
        role: None,
    })
}

pub fn rating(ld: &[Value], next: Option<&Value>, html: &str) -> Option<f64> {
    static RAW: OnceLock<Regex> = OnceLock::new();

    if let Some(value) = next.and_then(|n| pick_number(deep_find_first(n, &["rating", "score", "numericRating"]))) {
        return Some(value);
    }
    for block in ld {
        let found = find_objects(block, |m| m.get("aggregateRating").is_some_and(Value::is_object))
            .into_iter()
            .find_map(|m| {
                let agg = m.get("aggregateRating")?.as_object()?;
                pick_number(agg.get("ratingValue").or_else(|| agg.get("rating")))
            });
        if found.is_some() {
            return found;
        }
    }
    let re = RAW.get_or_init(|| {
        Regex::new(r#""rating"\s*:\s*(\d+(?:\.\d+)?)"#).expect("valid regex")
    });
    re.captures(html)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

pub fn price(document: &Html, ld: &[Value], next: Option<&Value>) -> Option<String> {
    static SYMBOLS: OnceLock<Regex> = OnceLock::new();
    let re = SYMBOLS.get_or_init(|| Regex::new(r"(£{1,4}|\${1,4}|€{1,4})").expect("valid regex"));

    if let Some(value) = next.and_then(|n| pick_string(deep_find_first(n, &["price", "priceRange", "price_range"]))) {
        return Some(value);
    }
    for block in ld {
        if let Some(value) = pick_string(deep_find_first(block, &["priceRange"])) {
            return Some(value);
        }
    }
    if let Some(caption) = text_of(document, r#"[data-testid="caption-venue-price"]"#) {
        let compact: String = caption.split_whitespace().collect();
        if let Some(m) = re.find(&compact) {
            return Some(m.as_str().to_string());
        }
    }
    let text = visible_text(document);
    re.find(&text).map(|m| m.as_str().to_string())
}

/// Document text outside `<script>`, `<style>` and `<noscript>`.
fn visible_text(document: &Html) -> String {
    let mut out = String::new();
    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|el| matches!(el.value().name(), "script" | "style" | "noscript"));
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    out
}

#[derive(Debug, Default)]
pub struct Tags {
    pub perfect_for: Vec<String>,
    pub cuisines: Vec<String>,
    pub neighborhoods: Vec<String>,
}

pub fn tags(document: &Html, next: Option<&Value>) -> Tags {
    let mut perfect_for = Vec::new();
    let mut cuisines = tag_texts_by_href(document, "/cuisines/");
    let mut neighborhoods = tag_texts_by_href(document, "/neighborhoods/");

    if let Some(next) = next {
        match deep_find_first(next, &["perfectFor", "perfect_for", "occasions"]) {
            Some(Value::Array(items)) => {
                perfect_for = items.iter().filter_map(tag_name).collect();
            }
            Some(Value::String(s)) => {
                perfect_for = s
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => {}
        }
        if let Some(cuisine) = pick_string(deep_find_first(next, &["cuisine", "cuisineName", "primaryCuisine"])) {
            if !cuisines.contains(&cuisine) {
                cuisines.insert(0, cuisine);
            }
        }
        if let Some(hood) = pick_string(deep_find_first(
            next,
            &["neighborhood", "neighbourhood", "neighborhoodName"],
        )) {
            if !neighborhoods.contains(&hood) {
                neighborhoods.insert(0, hood);
            }
        }
    }
    if perfect_for.is_empty() {
        perfect_for = tag_texts_by_href(document, "/perfect-for/");
    }

    Tags {
        perfect_for: dedupe_ci(perfect_for),
        cuisines: dedupe_ci(cuisines),
        neighborhoods: dedupe_ci(neighborhoods),
    }
}

fn tag_name(value: &Value) -> Option<String> {
    match value {
        Value::String(_) => pick_string(Some(value)),
        Value::Object(map) => first_string_field(map, &["name", "label", "title"]),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn tag_texts_by_href(document: &Html, href_fragment: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(&format!(r#"a[href*="{href_fragment}"]"#)) else {
        return Vec::new();
    };
    dedupe_ci(
        document
            .select(&selector)
            .map(|a| element_text(&a))
            .filter(|t| !t.is_empty())
            .collect(),
    )
}

fn dedupe_ci(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.to_lowercase()))
        .collect()
}

pub fn review_text(document: &Html, next: Option<&Value>) -> Option<String> {
    if let Some(next) = next {
        let raw = pick_string(deep_find_first(
            next,
            &["reviewText", "review_text", "body", "content", "description"],
        ));
        if let Some(raw) = raw.filter(|r| r.len() > 80) {
            return Some(raw.split_whitespace().collect::<Vec<_>>().join(" "));
        }
    }

    let rich_selector = Selector::parse("div[class]").expect("valid selector");
    let p_selector = Selector::parse("p").expect("valid selector");
    let rich = document
        .select(&rich_selector)
        .find(|div| div.value().classes().any(|c| c.starts_with("styles_richText__")));
    if let Some(rich) = rich {
        let text = rich
            .select(&p_selector)
            .map(|p| element_text(&p))
            .filter(|t| t.len() >= 20 && !is_credit_line(t))
            .collect::<Vec<_>>()
            .join("\n\n");
        if text.len() > 120 {
            return Some(text);
        }
    }

    let article = select_first(document, "article")?;
    let text = article
        .select(&p_selector)
        .map(|p| element_text(&p))
        .filter(|t| !t.is_empty() && !is_credit_line(t))
        .collect::<Vec<_>>()
        .join("\n\n");
    (text.len() > 200).then_some(text)
}

fn is_credit_line(text: &str) -> bool {
    text.trim_start().to_ascii_lowercase().starts_with("photo credit")
}

pub fn food_rundown(
    document: &Html,
    next: Option<&Value>,
    resolver: &MediaResolver<'_>,
    base: &Url,
) -> Vec<RundownEntry> {
    if let Some(Value::Array(items)) =
        next.and_then(|n| deep_find_first(n, &["foodRundown", "food_rundown", "dishes", "menuItems"]))
    {
        let out: Vec<RundownEntry> = items
            .iter()
            .filter_map(|item| match item {
                Value::Object(map) => {
                    let image_url = first_string_field(map, &["image", "imageUrl", "url"])
                        .and_then(|raw| join_url(&raw, base))
                        .map(|url| resolver.upgrade_if_primary(&url));
                    let entry = RundownEntry {
                        name: first_string_field(map, &["name", "title"]),
                        description: first_string_field(map, &["description", "body", "text"]),
                        image_url,
                        image_credit: first_string_field(map, &["credit", "attribution"]),
                    };
                    (entry.name.is_some() || entry.description.is_some() || entry.image_url.is_some())
                        .then_some(entry)
                }
                Value::String(s) if !s.trim().is_empty() => Some(RundownEntry {
                    name: Some(s.trim().to_string()),
                    ..RundownEntry::default()
                }),
                _ => None,
            })
            .collect();
        if !out.is_empty() {
            return out;
        }
    }

    let Some(section) = select_first(document, "#foodRundown") else {
        return Vec::new();
    };
    let heading_selector = Selector::parse("h2, h3").expect("valid selector");
    let p_selector = Selector::parse("p").expect("valid selector");
    let img_selector = Selector::parse("img").expect("valid selector");

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for heading in section.select(&heading_selector) {
        let Some(block) = heading.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        let name = Some(element_text(&heading)).filter(|t| t.len() >= 2);
        let description = block
            .select(&p_selector)
            .map(|p| element_text(&p))
            .find(|t| !t.is_empty() && !is_credit_line(t));
        let image = block
            .select(&img_selector)
            .next()
            .and_then(|img| resolver.image_for_element(&img, base));

        let entry = RundownEntry {
            name,
            description,
            image_url: image.as_ref().map(|c| c.resolved_url.clone()),
            image_credit: image.and_then(|c| c.credit),
        };
        if entry.name.is_none() && entry.description.is_none() && entry.image_url.is_none() {
            continue;
        }
        let key = (
            entry.name.clone().unwrap_or_default(),
            entry.description.clone().unwrap_or_default(),
            entry.image_url.clone().unwrap_or_default(),
        );
        if seen.insert(key) {
            out.push(entry);
        }
    }
    out
}

pub fn reservation_url(document: &Html, base: &Url) -> Option<String> {
    let anchor = select_first(document, r#"a[data-testid="reservation-reserveButton"]"#)?;
    join_url(anchor.value().attr("href")?, base)
}

pub fn cta_links(document: &Html, base: &Url) -> CtaLinks {
    let selector = Selector::parse("a[href]").expect("valid selector");
    let mut out = CtaLinks::default();
    for anchor in document.select(&selector) {
        let text = element_text(&anchor).to_ascii_lowercase();
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if out.website.is_none() && text.contains("website") {
            out.website = join_url(href, base);
        }
        if out.directions.is_none() && text.contains("directions") {
            out.directions = join_url(href, base);
        }
    }
    out
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Place {
    pub street: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub phone: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// First JSON-LD object carrying an address, phone or coordinates.
pub fn place_from_json_ld(blocks: &[Value]) -> Place {
    for block in blocks {
        let objects = find_objects(block, |m| {
            m.contains_key("address") || m.contains_key("geo") || m.contains_key("telephone")
        });
        for obj in objects {
            let mut place = Place {
                phone: first_string_field(obj, &["telephone", "phone"]),
                ..Place::default()
            };
            if let Some(geo) = obj.get("geo").and_then(Value::as_object) {
                place.lat = pick_number(geo.get("latitude"));
                place.lng = pick_number(geo.get("longitude"));
            }
            match obj.get("address") {
                Some(Value::Object(addr)) => {
                    place.street = first_string_field(addr, &["streetAddress"]);
                    place.city = first_string_field(addr, &["addressLocality"]);
                    place.postal_code = first_string_field(addr, &["postalCode"]);
                    place.country = match addr.get("addressCountry") {
                        Some(Value::Object(c)) => first_string_field(c, &["name", "identifier"]),
                        other => pick_string(other),
                    };
                }
                Some(line @ Value::String(_)) => place.street = pick_string(Some(line)),
                _ => {}
            }
            let has_coords = place.lat.is_some() && place.lng.is_some();
            if place.street.is_some()
                || place.city.is_some()
                || place.postal_code.is_some()
                || place.country.is_some()
                || place.phone.is_some()
                || has_coords
            {
                return place;
            }
        }
    }
    Place::default()
}

/// `new-york` -> `New York`
pub fn city_from_slug(slug: &str) -> Option<String> {
    let words: Vec<String> = slug
        .split('-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    (!words.is_empty()).then(|| words.join(" "))
}
