use crate::canonical::{canonical_key, host_of, join_url};
use crate::config::HarvestConfig;
use crate::eventlog::redact_url_for_log;
use crate::session::BrowserSession;
use crate::Result;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingTarget {
    pub city_slug: String,
    pub start_url: String,
    pub max_items: Option<usize>,
}

/// Consecutive reveal rounds that added nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityCounter {
    rounds: usize,
    threshold: usize,
}

impl StabilityCounter {
    pub fn new(threshold: usize) -> Self {
        Self {
            rounds: 0,
            threshold: threshold.max(1),
        }
    }

    /// Records one reveal round; true once the threshold is reached.
    pub fn observe(&mut self, added: usize) -> bool {
        if added == 0 {
            self.rounds += 1;
        } else {
            self.rounds = 0;
        }
        self.is_stable()
    }

    pub fn is_stable(&self) -> bool {
        self.rounds >= self.threshold
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagerDecision {
    Follow(String),
    /// The target was already followed once; following it again would loop.
    Repeated(String),
    SelfLink(String),
}

/// Remembers every "next page" target already followed.
#[derive(Debug, Clone, Default)]
pub struct PagerGuard {
    visited: HashSet<String>,
}

impl PagerGuard {
    /// A guard that already counts `start` as visited, so a later page
    /// linking back to the listing's first page stops the crawl.
    pub fn starting_at(start: &str) -> Self {
        let mut guard = Self::default();
        guard.visited.insert(pager_key(start));
        guard
    }

    pub fn check(&mut self, next: &str, current: &str) -> PagerDecision {
        let key = pager_key(next);
        if !self.visited.insert(key.clone()) {
            return PagerDecision::Repeated(next.to_string());
        }
        if key == pager_key(current) {
            return PagerDecision::SelfLink(next.to_string());
        }
        PagerDecision::Follow(next.to_string())
    }

    pub fn visited(&self) -> usize {
        self.visited.len()
    }
}

// Query strings carry the page number here, so only the trailing slash is ignored.
fn pager_key(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Insertion-ordered set of discovered links. Membership only grows.
#[derive(Debug, Clone, Default)]
pub struct LinkSet {
    seen: HashSet<String>,
    order: Vec<String>,
}

impl LinkSet {
    pub fn insert(&mut self, link: String) -> bool {
        if self.seen.contains(&link) {
            return false;
        }
        self.seen.insert(link.clone());
        self.order.push(link);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.order
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    MaxItems,
    Converged,
    PagerRepeated,
    PagerSelfLink,
    RevealCap,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::MaxItems => "max_items",
            StopReason::Converged => "converged",
            StopReason::PagerRepeated => "pager_repeated",
            StopReason::PagerSelfLink => "pager_self_link",
            StopReason::RevealCap => "reveal_cap",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlOutcome {
    pub links: Vec<String>,
    pub stop: StopReason,
    pub reveal_rounds: usize,
    pub failed_reveals: usize,
}

enum RevealStep {
    Revealed,
    Failed(String),
    Stop(StopReason),
}

pub struct ListingCrawler<'a> {
    config: &'a HarvestConfig,
}

impl<'a> ListingCrawler<'a> {
    pub fn new(config: &'a HarvestConfig) -> Self {
        Self { config }
    }

    pub fn crawl<S, F>(
        &self,
        session: &mut S,
        target: &ListingTarget,
        log_line: &mut F,
    ) -> Result<CrawlOutcome>
    where
        S: BrowserSession + ?Sized,
        F: FnMut(&str, &str, serde_json::Value) -> Result<()>,
    {
        session.navigate(&target.start_url)?;
        session.wait(self.config.settle_wait_ms);

        let mut links = LinkSet::default();
        let mut counter = StabilityCounter::new(self.config.stability_rounds);
        let mut pager = PagerGuard::starting_at(&target.start_url);
        let mut current_url = target.start_url.clone();
        let mut reveal_rounds = 0usize;
        let mut failed_reveals = 0usize;

        let mut source = session.page_source().unwrap_or_default();
        let added = self.absorb(&source, &current_url, target, &mut links);
        log_line(
            "info",
            "listing_round",
            serde_json::json!({ "round": 0, "added": added, "total": links.len() }),
        )?;

        let stop = loop {
            if reached_max(&links, target.max_items) {
                break StopReason::MaxItems;
            }
            if reveal_rounds >= self.config.max_reveal_rounds {
                break StopReason::RevealCap;
            }
            reveal_rounds += 1;

            let added = match self.reveal(session, &source, &mut current_url, &mut pager) {
                RevealStep::Stop(reason) => break reason,
                RevealStep::Failed(message) => {
                    failed_reveals += 1;
                    log_line(
                        "warn",
                        "listing_reveal_failed",
                        serde_json::json!({ "round": reveal_rounds, "error": message }),
                    )?;
                    0
                }
                RevealStep::Revealed => {
                    source = session.page_source().unwrap_or_default();
                    self.absorb(&source, &current_url, target, &mut links)
                }
            };

            let stable = counter.observe(added);
            log_line(
                "info",
                "listing_round",
                serde_json::json!({
                    "round": reveal_rounds,
                    "added": added,
                    "total": links.len(),
                    "stable_rounds": counter.rounds(),
                }),
            )?;
            if reached_max(&links, target.max_items) {
                break StopReason::MaxItems;
            }
            if stable {
                break StopReason::Converged;
            }
        };

        let mut out = links.as_slice().to_vec();
        if let Some(max) = target.max_items {
            out.truncate(max);
        }
        log_line(
            "info",
            "listing_stop",
            serde_json::json!({
                "reason": stop.as_str(),
                "links": out.len(),
                "reveal_rounds": reveal_rounds,
                "failed_reveals": failed_reveals,
                "pages_seen": pager.visited(),
            }),
        )?;

        Ok(CrawlOutcome {
            links: out,
            stop,
            reveal_rounds,
            failed_reveals,
        })
    }

    fn reveal<S>(
        &self,
        session: &mut S,
        source: &str,
        current_url: &mut String,
        pager: &mut PagerGuard,
    ) -> RevealStep
    where
        S: BrowserSession + ?Sized,
    {
        if let Some(next) = self.find_load_more(source, current_url) {
            if let Ok(actual) = session.current_url() {
                if !actual.trim().is_empty() {
                    *current_url = actual;
                }
            }
            return match pager.check(&next, current_url) {
                PagerDecision::Repeated(_) => RevealStep::Stop(StopReason::PagerRepeated),
                PagerDecision::SelfLink(_) => RevealStep::Stop(StopReason::PagerSelfLink),
                PagerDecision::Follow(next) => match session.navigate(&next) {
                    Ok(()) => {
                        *current_url = next;
                        session.wait(self.config.settle_wait_ms);
                        RevealStep::Revealed
                    }
                    Err(err) => RevealStep::Failed(format!(
                        "{}: {err}",
                        redact_url_for_log(&next)
                    )),
                },
            };
        }

        match session.scroll_to_bottom() {
            Ok(()) => {
                session.wait(self.config.scroll_wait_ms);
                RevealStep::Revealed
            }
            Err(err) => RevealStep::Failed(err.to_string()),
        }
    }

    fn absorb(
        &self,
        source: &str,
        page_url: &str,
        target: &ListingTarget,
        links: &mut LinkSet,
    ) -> usize {
        let mut added = 0;
        for link in self.scan_links(source, page_url, &target.city_slug) {
            if reached_max(links, target.max_items) {
                break;
            }
            if links.insert(link) {
                added += 1;
            }
        }
        added
    }

    /// Canonical detail-page links for `city_slug`, in document order.
    pub fn scan_links(&self, html: &str, page_url: &str, city_slug: &str) -> Vec<String> {
        let Ok(base) = Url::parse(page_url) else {
            return Vec::new();
        };
        let site_host = host_of(&self.config.site_base).or_else(|| host_of(page_url));
        let prefix = self.config.detail_prefix(city_slug);
        let selector = Selector::parse("a[href]").expect("valid selector");
        let document = Html::parse_document(html);

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for anchor in document.select(&selector) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Some(absolute) = join_url(href, &base) else {
                continue;
            };
            let Ok(parsed) = Url::parse(&absolute) else {
                continue;
            };
            if site_host.is_some() && host_of(&absolute) != site_host {
                continue;
            }
            let Some(rest) = parsed.path().strip_prefix(prefix.as_str()) else {
                continue;
            };
            if rest.trim_matches('/').is_empty() {
                continue;
            }
            let key = canonical_key(&absolute);
            if seen.insert(key.clone()) {
                out.push(key);
            }
        }
        out
    }

    /// Absolute href of an enabled "load more" pagination link, if any.
    pub fn find_load_more(&self, html: &str, page_url: &str) -> Option<String> {
        let base = Url::parse(page_url).ok()?;
        let selector = Selector::parse("a[href]").expect("valid selector");
        let document = Html::parse_document(html);
        document.select(&selector).find_map(|anchor| {
            let el = anchor.value();
            if el.attr("aria-disabled") == Some("true") {
                return None;
            }
            let text = anchor
                .text()
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_ascii_lowercase();
            let by_class = el.classes().any(|c| c.contains("loadMoreButton"));
            if text.contains("load more") || by_class {
                join_url(el.attr("href")?, &base)
            } else {
                None
            }
        })
    }
}

fn reached_max(links: &LinkSet, max: Option<usize>) -> bool {
    matches!(max, Some(max) if links.len() >= max)
}
