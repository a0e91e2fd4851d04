use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub base_dir: PathBuf,
}

impl OutputPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir().join("harvest.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn target_log_path(&self, city_slug: &str) -> PathBuf {
        self.logs_dir().join(format!("{city_slug}.jsonl"))
    }

    /// One JSON array per target: `<base>/<city>.json`.
    pub fn items_path(&self, city_slug: &str) -> PathBuf {
        self.base_dir.join(format!("{city_slug}.json"))
    }

    pub fn city_dir(&self, city_slug: &str) -> PathBuf {
        self.base_dir.join(city_slug)
    }

    pub fn images_dir(&self, city_slug: &str) -> PathBuf {
        self.city_dir(city_slug).join("images")
    }

    /// `<base>/<city>/images/<provenance>/<item-slug>/`
    pub fn item_media_dir(&self, city_slug: &str, provenance: &str, item_slug: &str) -> PathBuf {
        self.images_dir(city_slug).join(provenance).join(item_slug)
    }

    pub fn manifest_path(&self, city_slug: &str) -> PathBuf {
        self.images_dir(city_slug).join("manifest.csv")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }

    /// Path of `path` relative to the city directory, with forward slashes.
    pub fn relative_to_city(&self, city_slug: &str, path: &Path) -> String {
        let city_dir = self.city_dir(city_slug);
        let rel = path.strip_prefix(&city_dir).unwrap_or(path);
        rel.to_string_lossy().replace('\\', "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_per_city_and_per_provenance() {
        let paths = OutputPaths::new(PathBuf::from("/out"));
        assert_eq!(paths.items_path("london"), PathBuf::from("/out/london.json"));
        assert_eq!(
            paths.item_media_dir("london", "primary_site", "london-reviews-dishoom"),
            PathBuf::from("/out/london/images/primary_site/london-reviews-dishoom")
        );
        let rel = paths.relative_to_city(
            "london",
            Path::new("/out/london/images/other/x/01_image.jpg"),
        );
        assert_eq!(rel, "images/other/x/01_image.jpg");
    }
}
