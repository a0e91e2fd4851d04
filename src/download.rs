use crate::canonical::safe_slug;
use crate::eventlog::redact_url_for_log;
use crate::models::{DownloadResult, MediaCandidate, MediaKind, ScrapedItem};
use crate::paths::OutputPaths;
use crate::session::AssetFetcher;
use crate::Result;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

const KNOWN_EXTENSIONS: &[&str] = &[".jpg", ".png", ".webp"];

/// Maps a declared content type to a file extension. The URL suffix is
/// never consulted.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    let ct = content_type.to_ascii_lowercase();
    if ct.contains("png") {
        ".png"
    } else if ct.contains("webp") {
        ".webp"
    } else {
        ".jpg"
    }
}

#[derive(Debug, Serialize)]
struct ManifestRow<'a> {
    source_id: &'a str,
    url: &'a str,
    provenance: &'a str,
    status: &'a str,
    local_path: &'a str,
    bytes: u64,
    sha256: &'a str,
}

pub struct AssetDownloader<'a, F: AssetFetcher + ?Sized> {
    paths: &'a OutputPaths,
    fetcher: &'a F,
}

impl<'a, F: AssetFetcher + ?Sized> AssetDownloader<'a, F> {
    pub fn new(paths: &'a OutputPaths, fetcher: &'a F) -> Self {
        Self { paths, fetcher }
    }

    /// Downloads every image of `item` and records the outcome on its media
    /// entries. Social post links are left alone. Never fails: a broken asset
    /// just has no local copy.
    pub fn download_item<L>(&self, item: &mut ScrapedItem, log_line: &mut L) -> Vec<DownloadResult>
    where
        L: FnMut(&str, &str, serde_json::Value) -> Result<()>,
    {
        let item_slug = safe_slug(&item.source_id);
        let mut results = Vec::new();
        let mut index = 0usize;

        for media in item.media.iter_mut() {
            if media.candidate.kind != MediaKind::Image {
                continue;
            }
            index += 1;
            let dir = self.paths.item_media_dir(
                &item.city_slug,
                media.candidate.provenance.as_str(),
                &item_slug,
            );
            let result = self.download(&item.city_slug, &dir, index, &media.candidate, log_line);
            media.downloaded = result.success;
            media.local_path = result.local_path.clone();

            if let Err(err) = self.append_manifest(&item.city_slug, &item.source_id, &result) {
                let _ = log_line(
                    "warn",
                    "asset_download_failed",
                    json!({ "stage": "manifest", "error": err.to_string() }),
                );
            }
            results.push(result);
        }
        results
    }

    /// `<dir>/<NN>_<slug><ext>`; an existing file under any known extension
    /// is reused without a request.
    pub fn download<L>(
        &self,
        city_slug: &str,
        dir: &Path,
        index: usize,
        candidate: &MediaCandidate,
        log_line: &mut L,
    ) -> DownloadResult
    where
        L: FnMut(&str, &str, serde_json::Value) -> Result<()>,
    {
        let label = candidate
            .alt_text
            .as_deref()
            .or(candidate.credit.as_deref())
            .unwrap_or("image");
        let stem = format!("{index:02}_{}", safe_slug(label));
        let url = candidate.resolved_url.as_str();

        if let Some(existing) = existing_file(dir, &stem) {
            let local_path = self.paths.relative_to_city(city_slug, &existing);
            let (bytes, sha256) = match std::fs::read(&existing) {
                Ok(data) => (data.len() as u64, Some(sha256_hex(&data))),
                Err(_) => (0, None),
            };
            let _ = log_line(
                "info",
                "asset_exists",
                json!({ "url": redact_url_for_log(url), "local_path": local_path }),
            );
            return DownloadResult {
                candidate: candidate.clone(),
                local_path: Some(local_path),
                success: true,
                bytes,
                sha256,
                reused: true,
            };
        }

        let failed = |reason: String, log_line: &mut L| {
            let _ = log_line(
                "warn",
                "asset_download_failed",
                json!({ "url": redact_url_for_log(url), "error": reason }),
            );
            DownloadResult {
                candidate: candidate.clone(),
                local_path: None,
                success: false,
                bytes: 0,
                sha256: None,
                reused: false,
            }
        };

        let fetched = match self.fetcher.fetch(url) {
            Ok(fetched) => fetched,
            Err(err) => return failed(err.to_string(), log_line),
        };
        if !(200..300).contains(&fetched.status) {
            return failed(format!("http {}", fetched.status), log_line);
        }
        if fetched.bytes.is_empty() {
            return failed("empty body".to_string(), log_line);
        }
        if fetched.content_type.starts_with("text/") {
            return failed(format!("not an image ({})", fetched.content_type), log_line);
        }

        let final_path = dir.join(format!(
            "{stem}{}",
            extension_for_content_type(&fetched.content_type)
        ));
        if let Err(err) = write_atomically(&final_path, &fetched.bytes) {
            return failed(err.to_string(), log_line);
        }

        let local_path = self.paths.relative_to_city(city_slug, &final_path);
        let sha256 = sha256_hex(&fetched.bytes);
        let _ = log_line(
            "info",
            "asset_downloaded",
            json!({
                "url": redact_url_for_log(url),
                "local_path": local_path,
                "bytes": fetched.bytes.len(),
                "content_type": fetched.content_type,
            }),
        );
        DownloadResult {
            candidate: candidate.clone(),
            local_path: Some(local_path),
            success: true,
            bytes: fetched.bytes.len() as u64,
            sha256: Some(sha256),
            reused: false,
        }
    }

    fn append_manifest(&self, city_slug: &str, source_id: &str, result: &DownloadResult) -> Result<()> {
        let path = self.paths.manifest_path(city_slug);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let is_new = !path.exists();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        let status = match (result.success, result.reused) {
            (true, true) => "exists",
            (true, false) => "downloaded",
            (false, _) => "failed",
        };
        writer.serialize(ManifestRow {
            source_id,
            url: &result.candidate.resolved_url,
            provenance: result.candidate.provenance.as_str(),
            status,
            local_path: result.local_path.as_deref().unwrap_or(""),
            bytes: result.bytes,
            sha256: result.sha256.as_deref().unwrap_or(""),
        })?;
        writer.flush()?;
        Ok(())
    }
}

fn existing_file(dir: &Path, stem: &str) -> Option<PathBuf> {
    KNOWN_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{stem}{ext}")))
        .find(|p| p.is_file())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn write_atomically(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("part");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(data)?;
        file.flush()?;
    }
    if std::fs::rename(&tmp_path, path).is_err() {
        std::fs::copy(&tmp_path, path)?;
        let _ = std::fs::remove_file(&tmp_path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemMedia, Provenance};
    use crate::session::FetchedAsset;
    use crate::HarvestError;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeFetcher {
        responses: HashMap<String, FetchedAsset>,
        calls: RefCell<Vec<String>>,
    }

    impl FakeFetcher {
        fn new(entries: &[(&str, u16, &str, &[u8])]) -> Self {
            let responses = entries
                .iter()
                .map(|(url, status, ct, bytes)| {
                    (
                        url.to_string(),
                        FetchedAsset {
                            status: *status,
                            content_type: ct.to_string(),
                            bytes: bytes.to_vec(),
                        },
                    )
                })
                .collect();
            Self {
                responses,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl AssetFetcher for FakeFetcher {
        fn fetch(&self, url: &str) -> Result<FetchedAsset> {
            self.calls.borrow_mut().push(url.to_string());
            self.responses.get(url).cloned().ok_or_else(|| HarvestError::Transport {
                url: url.to_string(),
                message: "timed out".to_string(),
            })
        }
    }

    fn image(url: &str, alt: Option<&str>, provenance: Provenance) -> ItemMedia {
        ItemMedia::from(MediaCandidate {
            raw_url: url.to_string(),
            resolved_url: url.to_string(),
            provenance,
            alt_text: alt.map(str::to_string),
            credit: None,
            kind: MediaKind::Image,
            note: None,
        })
    }

    fn item(media: Vec<ItemMedia>) -> ScrapedItem {
        ScrapedItem {
            source_id: "london/reviews/dishoom".to_string(),
            city_slug: "london".to_string(),
            media,
            ..ScrapedItem::default()
        }
    }

    fn no_log(_: &str, _: &str, _: serde_json::Value) -> Result<()> {
        Ok(())
    }

    #[test]
    fn extension_follows_content_type_not_url() {
        assert_eq!(extension_for_content_type("image/jpeg"), ".jpg");
        assert_eq!(extension_for_content_type("image/png"), ".png");
        assert_eq!(extension_for_content_type("image/webp; charset=binary"), ".webp");
        assert_eq!(extension_for_content_type(""), ".jpg");
    }

    #[test]
    fn downloads_land_under_provenance_and_item_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = OutputPaths::new(dir.path().to_path_buf());
        let fetcher = FakeFetcher::new(&[("https://cdn.example/a.jpg", 200, "image/webp", b"RIFFWEBP")]);
        let downloader = AssetDownloader::new(&paths, &fetcher);

        let mut item = item(vec![image("https://cdn.example/a.jpg", Some("The Dining Room"), Provenance::Other)]);
        let results = downloader.download_item(&mut item, &mut no_log);

        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        let expected = "images/other/london-reviews-dishoom/01_the-dining-room.webp";
        assert_eq!(results[0].local_path.as_deref(), Some(expected));
        assert_eq!(item.media[0].local_path.as_deref(), Some(expected));
        assert!(item.media[0].downloaded);
        assert!(paths.city_dir("london").join(expected).is_file());
        assert_eq!(results[0].sha256.as_deref().map(str::len), Some(64));
    }

    #[test]
    fn second_run_reuses_files_without_fetching_or_touching_them() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = OutputPaths::new(dir.path().to_path_buf());
        let fetcher = FakeFetcher::new(&[("https://cdn.example/a", 200, "image/png", b"\x89PNG....")]);
        let downloader = AssetDownloader::new(&paths, &fetcher);

        let mut first = item(vec![image("https://cdn.example/a", None, Provenance::PrimarySite)]);
        downloader.download_item(&mut first, &mut no_log);
        let local = paths
            .city_dir("london")
            .join(first.media[0].local_path.as_deref().expect("local path"));

        let old = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&local, old).expect("set mtime");

        let mut second = item(vec![image("https://cdn.example/a", None, Provenance::PrimarySite)]);
        let mut events = Vec::new();
        let results = downloader.download_item(&mut second, &mut |_: &str, event: &str, _| {
            events.push(event.to_string());
            Ok(())
        });

        assert_eq!(fetcher.calls.borrow().len(), 1);
        assert!(results[0].reused);
        assert_eq!(results[0].local_path, first.media[0].local_path);
        assert_eq!(events, vec!["asset_exists"]);
        let meta = std::fs::metadata(&local).expect("metadata");
        assert_eq!(filetime::FileTime::from_last_modification_time(&meta), old);
    }

    #[test]
    fn failures_are_contained_and_links_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = OutputPaths::new(dir.path().to_path_buf());
        let fetcher = FakeFetcher::new(&[
            ("https://cdn.example/gone", 404, "text/html", b"nope"),
            ("https://cdn.example/ok", 200, "image/jpeg", b"\xff\xd8\xff"),
        ]);
        let downloader = AssetDownloader::new(&paths, &fetcher);

        let mut link = image("https://www.instagram.com/p/abc/", None, Provenance::SocialCdn);
        link.candidate.kind = MediaKind::SocialPostLink;
        let mut item = item(vec![
            image("https://cdn.example/gone", None, Provenance::Other),
            link,
            image("https://cdn.example/timeout", None, Provenance::Other),
            image("https://cdn.example/ok", None, Provenance::Other),
        ]);

        let results = downloader.download_item(&mut item, &mut no_log);
        assert_eq!(results.len(), 3);
        assert!(!results[0].success && results[0].local_path.is_none());
        assert!(!results[1].success);
        assert!(results[2].success);
        assert_eq!(
            results[2].local_path.as_deref(),
            Some("images/other/london-reviews-dishoom/03_image.jpg")
        );
        assert!(item.media[1].local_path.is_none());
        assert!(!item.media[0].downloaded);

        let manifest = std::fs::read_to_string(paths.manifest_path("london")).expect("manifest");
        let lines: Vec<&str> = manifest.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("source_id,url,provenance,status"));
        assert!(lines[1].contains(",failed,"));
        assert!(lines[3].contains(",downloaded,"));
    }
}
