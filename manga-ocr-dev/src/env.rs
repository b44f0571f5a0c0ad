use std::path::{Path, PathBuf};

/// Locations of fonts, generated data and Manga109 on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub assets: PathBuf,
    pub fonts_root: PathBuf,
    pub synthetic_root: PathBuf,
    pub background_dir: PathBuf,
    pub manga109_root: PathBuf,
    pub train_root: PathBuf,
}

impl DataPaths {
    /// Defaults under the home directory, each overridable by a `MANGA_OCR_*` variable.
    pub fn from_env() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::resolve(&home, |key| std::env::var(key).ok())
    }

    fn resolve(home: &Path, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str, default: PathBuf| lookup(key).map(PathBuf::from).unwrap_or(default);
        let data = home.join("data");
        Self {
            assets: path("MANGA_OCR_ASSETS", PathBuf::from("assets")),
            fonts_root: path("MANGA_OCR_FONTS_ROOT", data.join("jp_fonts")),
            synthetic_root: path("MANGA_OCR_SYNTHETIC_ROOT", data.join("manga/synthetic")),
            background_dir: path(
                "MANGA_OCR_BACKGROUND_DIR",
                data.join("manga/Manga109s/background"),
            ),
            manga109_root: path("MANGA_OCR_MANGA109_ROOT", data.join("manga/Manga109s")),
            train_root: path("MANGA_OCR_TRAIN_ROOT", data.join("manga/out")),
        }
    }

    pub fn vocab_csv(&self) -> PathBuf {
        self.assets.join("vocab.csv")
    }

    pub fn fonts_csv(&self) -> PathBuf {
        self.assets.join("fonts.csv")
    }

    pub fn len_to_p_csv(&self) -> PathBuf {
        self.assets.join("len_to_p.csv")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let paths = DataPaths::resolve(Path::new("/home/u"), |_| None);
        assert_eq!(paths.fonts_root, PathBuf::from("/home/u/data/jp_fonts"));
        assert_eq!(
            paths.background_dir,
            PathBuf::from("/home/u/data/manga/Manga109s/background")
        );
        assert_eq!(paths.vocab_csv(), PathBuf::from("assets/vocab.csv"));
    }

    #[test]
    fn test_env_override() {
        let paths = DataPaths::resolve(Path::new("/home/u"), |key| {
            (key == "MANGA_OCR_SYNTHETIC_ROOT").then(|| "/mnt/synthetic".to_string())
        });
        assert_eq!(paths.synthetic_root, PathBuf::from("/mnt/synthetic"));
        assert_eq!(paths.train_root, PathBuf::from("/home/u/data/manga/out"));
    }
}
