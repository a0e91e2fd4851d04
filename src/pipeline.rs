//! One run per listing target: crawl, visit each detail page in discovery
//! order, filter, download, persist after every item.

use crate::canonical::source_id;
use crate::classify::MediaClassifier;
use crate::config::HarvestConfig;
use crate::crawler::{ListingCrawler, ListingTarget};
use crate::details::build_item;
use crate::download::AssetDownloader;
use crate::eventlog::{redact_url_for_log, EventLog};
use crate::media::MediaResolver;
use crate::paths::OutputPaths;
use crate::session::{with_session, AssetFetcher, BrowserSession};
use crate::store::IncrementalStore;
use crate::{HarvestError, Result};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub max_items: Option<usize>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub incremental: bool,
    pub download: bool,
}

impl RunOptions {
    /// Validates the date bounds; both are `YYYY-MM-DD` and inclusive.
    pub fn new(
        max_items: Option<usize>,
        start_date: Option<&str>,
        end_date: Option<&str>,
        incremental: bool,
        no_download: bool,
    ) -> Result<Self> {
        let start_date = start_date.map(parse_date_bound).transpose()?;
        let end_date = end_date.map(parse_date_bound).transpose()?;
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if start > end {
                return Err(HarvestError::InvalidDate {
                    value: format!("{start}..{end}"),
                });
            }
        }
        Ok(Self {
            max_items,
            start_date,
            end_date,
            incremental,
            download: !no_download,
        })
    }

    pub fn has_date_bounds(&self) -> bool {
        self.start_date.is_some() || self.end_date.is_some()
    }

    /// Without bounds everything passes. With any bound, an undated item fails.
    pub fn accepts_date(&self, date: Option<&str>) -> bool {
        if !self.has_date_bounds() {
            return true;
        }
        let Some(date) = date.and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()) else {
            return false;
        };
        self.start_date.map_or(true, |start| date >= start)
            && self.end_date.map_or(true, |end| date <= end)
    }
}

pub fn parse_date_bound(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| HarvestError::InvalidDate {
        value: value.to_string(),
    })
}

/// City slugs are lowercase ASCII words joined by `-`.
pub fn listing_target(config: &HarvestConfig, city_slug: &str, max_items: Option<usize>) -> Result<ListingTarget> {
    let slug = city_slug.trim();
    let valid = !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid {
        return Err(HarvestError::InvalidTarget(city_slug.to_string()));
    }
    Ok(ListingTarget {
        city_slug: slug.to_string(),
        start_url: config.listing_url(slug),
        max_items,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetSummary {
    pub city_slug: String,
    pub stop_reason: String,
    pub links_found: usize,
    pub skipped_existing: usize,
    pub fetch_failed: usize,
    pub date_filtered: usize,
    pub saved: usize,
    pub assets_downloaded: usize,
    pub assets_failed: usize,
    pub total_items: usize,
}

pub fn run_target<S, F, L>(
    config: &HarvestConfig,
    paths: &OutputPaths,
    target: &ListingTarget,
    session: &mut S,
    fetcher: &F,
    options: &RunOptions,
    log_line: &mut L,
) -> Result<TargetSummary>
where
    S: BrowserSession + ?Sized,
    F: AssetFetcher + ?Sized,
    L: FnMut(&str, &str, serde_json::Value) -> Result<()>,
{
    // Everything that can reject the run happens before the first request.
    let items_path = paths.items_path(&target.city_slug);
    let mut store = if options.incremental {
        IncrementalStore::open(items_path)?
    } else {
        IncrementalStore::fresh(items_path)
    };
    let classifier = MediaClassifier::from_config(config)?;
    let resolver = MediaResolver::new(config, &classifier);
    let downloader = AssetDownloader::new(paths, fetcher);

    let crawl = ListingCrawler::new(config).crawl(session, target, log_line)?;
    let mut summary = TargetSummary {
        city_slug: target.city_slug.clone(),
        stop_reason: crawl.stop.as_str().to_string(),
        links_found: crawl.links.len(),
        ..TargetSummary::default()
    };

    for link in &crawl.links {
        let sid = source_id(link);
        if options.incremental && store.contains(&sid) {
            summary.skipped_existing += 1;
            log_line("info", "detail_skip_existing", json!({ "source_id": sid }))?;
            continue;
        }

        session.wait(config.request_delay_ms);
        let html = match session
            .navigate(link)
            .and_then(|_| session.page_source())
        {
            Ok(html) => html,
            Err(err) => {
                summary.fetch_failed += 1;
                log_line(
                    "warn",
                    "detail_fetch_failed",
                    json!({ "url": redact_url_for_log(link), "error": err.to_string() }),
                )?;
                continue;
            }
        };

        let mut item = build_item(config, &resolver, &html, link, &target.city_slug);
        if !options.accepts_date(item.published_date()) {
            summary.date_filtered += 1;
            log_line(
                "info",
                "detail_date_filtered",
                json!({ "source_id": item.source_id, "published_at": item.published_at }),
            )?;
            continue;
        }

        if options.download {
            for result in downloader.download_item(&mut item, log_line) {
                if result.success {
                    summary.assets_downloaded += 1;
                } else {
                    summary.assets_failed += 1;
                }
            }
        }

        let media_count = item.media.len();
        let saved_id = item.source_id.clone();
        store.upsert(item);
        store.save()?;
        summary.saved += 1;
        log_line(
            "info",
            "detail_saved",
            json!({ "source_id": saved_id, "media": media_count, "total": store.items().len() }),
        )?;
    }

    store.save()?;
    summary.total_items = store.items().len();
    log_line("info", "target_done", serde_json::to_value(&summary)?)?;
    Ok(summary)
}

/// Runs each target on its own thread with its own session. A failure in
/// one target never stops the others; results come back in input order.
pub fn run_targets_concurrently<S, M, F>(
    config: &HarvestConfig,
    paths: &OutputPaths,
    targets: &[ListingTarget],
    options: &RunOptions,
    make_session: M,
    fetcher: &F,
) -> Vec<(String, Result<TargetSummary>)>
where
    S: BrowserSession,
    M: Fn(&ListingTarget) -> Result<S> + Sync,
    F: AssetFetcher + Sync + ?Sized,
{
    std::thread::scope(|scope| {
        let handles: Vec<_> = targets
            .iter()
            .map(|target| {
                let make_session = &make_session;
                scope.spawn(move || {
                    let log = EventLog::new(paths.target_log_path(&target.city_slug), &target.city_slug)
                        .with_stderr_warnings(true);
                    let mut log_line = |level: &str, event: &str, data: serde_json::Value| {
                        log.line(level, event, data)
                    };
                    let result = make_session(target).and_then(|mut session| {
                        with_session(&mut session, |s| {
                            run_target(config, paths, target, s, fetcher, options, &mut log_line)
                        })
                    });
                    if let Err(err) = &result {
                        let _ = log.line("error", "target_failed", json!({ "error": err.to_string() }));
                    }
                    result
                })
            })
            .collect();

        targets
            .iter()
            .zip(handles)
            .map(|(target, handle)| {
                let result = handle.join().unwrap_or_else(|_| {
                    Err(HarvestError::InvalidTarget(format!(
                        "{}: worker thread panicked",
                        target.city_slug
                    )))
                });
                (target.city_slug.clone(), result)
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_bounds_are_validated_and_inclusive() {
        assert!(matches!(
            RunOptions::new(None, Some("2024-13-01"), None, false, false),
            Err(HarvestError::InvalidDate { .. })
        ));
        assert!(RunOptions::new(None, Some("2024-05-02"), Some("2024-05-01"), false, false).is_err());

        let options = RunOptions::new(None, Some("2024-01-01"), Some("2024-01-31"), false, true).expect("options");
        assert!(!options.download);
        assert!(options.accepts_date(Some("2024-01-01")));
        assert!(options.accepts_date(Some("2024-01-31")));
        assert!(!options.accepts_date(Some("2024-02-01")));
        assert!(!options.accepts_date(None));
    }

    #[test]
    fn undated_items_pass_without_bounds() {
        let options = RunOptions::new(Some(5), None, None, true, false).expect("options");
        assert!(options.accepts_date(None));
        assert!(options.download);
        assert_eq!(options.max_items, Some(5));

        let open_ended = RunOptions::new(None, Some("2024-06-01"), None, false, false).expect("options");
        assert!(open_ended.accepts_date(Some("2030-01-01")));
        assert!(!open_ended.accepts_date(Some("2024-05-31")));
    }

    #[test]
    fn targets_need_plain_slugs() {
        let config = HarvestConfig::default();
        let target = listing_target(&config, "new-york", Some(3)).expect("target");
        assert_eq!(target.start_url, "https://www.theinfatuation.com/new-york/reviews");
        assert_eq!(target.max_items, Some(3));
        for bad in ["", "London", "../etc", "-x", "new york"] {
            assert!(matches!(
                listing_target(&config, bad, None),
                Err(HarvestError::InvalidTarget(_))
            ));
        }
    }
}
