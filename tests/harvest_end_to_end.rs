use review_harvest::config::HarvestConfig;
use review_harvest::models::MediaKind;
use review_harvest::paths::OutputPaths;
use review_harvest::pipeline::{listing_target, run_target, RunOptions};
use review_harvest::session::{AssetFetcher, BrowserSession, FetchedAsset};
use review_harvest::store::load_existing_items;
use review_harvest::{HarvestError, Result};
use std::collections::{HashMap, HashSet};

const SITE: &str = "https://www.theinfatuation.com";

struct FakeSite {
    pages: HashMap<String, String>,
    current: Option<String>,
    navigations: Vec<String>,
}

impl FakeSite {
    fn new(pages: &[(&str, String)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(path, html)| (format!("{SITE}{path}"), html.clone()))
                .collect(),
            current: None,
            navigations: Vec::new(),
        }
    }
}

impl BrowserSession for FakeSite {
    fn navigate(&mut self, url: &str) -> Result<()> {
        self.navigations.push(url.to_string());
        if !self.pages.contains_key(url) {
            return Err(HarvestError::Transport {
                url: url.to_string(),
                message: "timed out".to_string(),
            });
        }
        self.current = Some(url.to_string());
        Ok(())
    }

    fn current_url(&mut self) -> Result<String> {
        Ok(self.current.clone().unwrap_or_default())
    }

    fn page_source(&mut self) -> Result<String> {
        Ok(self
            .current
            .as_ref()
            .and_then(|u| self.pages.get(u))
            .cloned()
            .unwrap_or_default())
    }

    fn scroll_to_bottom(&mut self) -> Result<()> {
        Ok(())
    }

    fn wait(&mut self, _ms: u64) {}

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct JpegFetcher;

impl AssetFetcher for JpegFetcher {
    fn fetch(&self, _url: &str) -> Result<FetchedAsset> {
        Ok(FetchedAsset {
            status: 200,
            content_type: "image/jpeg".to_string(),
            bytes: vec![0xff, 0xd8, 0xff, 0xe0],
        })
    }
}

fn listing() -> String {
    r#"<html><body>
        <a href="/london/reviews/alpha">Alpha</a>
        <a href="/london/reviews/beta?ref=list">Beta</a>
        <a href="/london/reviews/alpha/">Alpha again</a>
        <a href="/london/reviews/gamma">Gamma</a>
        <a href="/london/guides/best-pizza">Guide</a>
    </body></html>"#
        .to_string()
}

fn detail(name: &str, date: &str) -> String {
    format!(
        r#"<html><body>
        <h1>{name}</h1>
        <time datetime="{date}">{date}</time>
        <img alt="Dining room" srcset="https://res.cloudinary.com/the-infatuation/image/upload/w_400/v1/{name}.jpg 400w, https://res.cloudinary.com/the-infatuation/image/upload/w_1200/v1/{name}.jpg 1200w">
        <img src="https://res.cloudinary.com/the-infatuation/image/upload/w_1200/v1/{name}.jpg">
        <img alt="Jane Doe" src="https://res.cloudinary.com/the-infatuation/image/upload/c_thumb,ar_1:1,g_face/images/editorial_team_headshots_jane.jpg">
        <a href="https://www.instagram.com/p/{name}123/">on instagram</a>
        </body></html>"#
    )
}

fn site() -> FakeSite {
    FakeSite::new(&[
        ("/london/reviews", listing()),
        ("/london/reviews/alpha", detail("alpha", "2024-03-01")),
        ("/london/reviews/beta", detail("beta", "2024-04-15")),
    ])
}

fn no_log(_: &str, _: &str, _: serde_json::Value) -> Result<()> {
    Ok(())
}

#[test]
fn max_items_two_yields_two_items_with_unique_media() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = OutputPaths::new(dir.path().to_path_buf());
    let config = HarvestConfig::default();
    let target = listing_target(&config, "london", Some(2)).expect("target");
    let options = RunOptions::new(Some(2), None, None, false, false).expect("options");

    let mut session = site();
    let summary = run_target(&config, &paths, &target, &mut session, &JpegFetcher, &options, &mut no_log)
        .expect("run");

    assert_eq!(summary.links_found, 2);
    assert_eq!(summary.saved, 2);
    assert_eq!(summary.stop_reason, "max_items");

    let items = load_existing_items(&paths.items_path("london")).expect("items");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].source_id, "london/reviews/alpha");
    assert_eq!(items[1].source_id, "london/reviews/beta");
    for item in &items {
        assert!(!item.source_id.is_empty());
        let urls: Vec<&str> = item
            .media
            .iter()
            .map(|m| m.candidate.resolved_url.as_str())
            .collect();
        let unique: HashSet<&str> = urls.iter().copied().collect();
        assert_eq!(unique.len(), urls.len());

        let images: Vec<_> = item
            .media
            .iter()
            .filter(|m| m.candidate.kind == MediaKind::Image)
            .collect();
        assert_eq!(images.len(), 1);
        assert!(images[0].candidate.resolved_url.contains("/w_3840/"));
        assert!(images[0].downloaded);
        let local = images[0].local_path.as_deref().expect("local path");
        assert!(local.ends_with("01_dining-room.jpg"));
        assert!(paths.city_dir("london").join(local).is_file());
        assert!(item
            .media
            .iter()
            .any(|m| m.candidate.kind == MediaKind::SocialPostLink && m.local_path.is_none()));
    }
}

#[test]
fn incremental_run_skips_saved_pages_and_survives_a_dead_link() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = OutputPaths::new(dir.path().to_path_buf());
    let config = HarvestConfig::default();

    let first = RunOptions::new(None, None, None, true, true).expect("options");
    let target = listing_target(&config, "london", Some(1)).expect("target");
    run_target(&config, &paths, &target, &mut site(), &JpegFetcher, &first, &mut no_log).expect("first run");

    let target = listing_target(&config, "london", None).expect("target");
    let mut session = site();
    let mut events = Vec::new();
    let mut capture = |_: &str, event: &str, _: serde_json::Value| -> Result<()> {
        events.push(event.to_string());
        Ok(())
    };
    let summary = run_target(&config, &paths, &target, &mut session, &JpegFetcher, &first, &mut capture)
        .expect("second run");

    assert_eq!(summary.links_found, 3);
    assert_eq!(summary.skipped_existing, 1);
    assert_eq!(summary.fetch_failed, 1);
    assert_eq!(summary.saved, 1);
    assert_eq!(summary.total_items, 2);
    assert_eq!(summary.stop_reason, "converged");
    assert!(!session
        .navigations
        .iter()
        .any(|u| u == &format!("{SITE}/london/reviews/alpha")));
    assert!(events.iter().any(|e| e == "detail_fetch_failed"));
    assert_eq!(events.last().map(String::as_str), Some("target_done"));
}

#[test]
fn date_window_keeps_only_items_inside_it() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = OutputPaths::new(dir.path().to_path_buf());
    let config = HarvestConfig::default();
    let target = listing_target(&config, "london", Some(2)).expect("target");
    let options = RunOptions::new(None, Some("2024-04-01"), Some("2024-04-30"), false, true).expect("options");

    let summary = run_target(&config, &paths, &target, &mut site(), &JpegFetcher, &options, &mut no_log)
        .expect("run");
    assert_eq!(summary.saved, 1);
    assert_eq!(summary.date_filtered, 1);
    let items = load_existing_items(&paths.items_path("london")).expect("items");
    assert_eq!(items[0].published_at.as_deref(), Some("2024-04-15T00:00:00"));
}

#[test]
fn unreadable_output_aborts_before_any_navigation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let paths = OutputPaths::new(dir.path().to_path_buf());
    std::fs::write(paths.items_path("london"), "{ broken").expect("write");
    let config = HarvestConfig::default();
    let target = listing_target(&config, "london", None).expect("target");
    let options = RunOptions::new(None, None, None, true, true).expect("options");

    let mut session = site();
    let err = run_target(&config, &paths, &target, &mut session, &JpegFetcher, &options, &mut no_log)
        .expect_err("must fail");
    assert!(err.is_fatal_input());
    assert!(session.navigations.is_empty());
}
