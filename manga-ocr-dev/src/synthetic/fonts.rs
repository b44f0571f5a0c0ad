use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::Result;

/// One line of `fonts.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontRow {
    /// Relative to the fonts root.
    pub font_path: String,
    pub supported_chars: Option<String>,
    pub num_chars: usize,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct FontInfo {
    pub path: PathBuf,
    pub chars: HashSet<char>,
    pub num_chars: usize,
    pub label: String,
}

impl FontInfo {
    /// True when every non-whitespace character of `text` has a glyph.
    pub fn supports(&self, text: &str) -> bool {
        text.chars()
            .filter(|c| !c.is_whitespace())
            .all(|c| self.chars.contains(&c))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FontCatalog {
    fonts_root: PathBuf,
    fonts: Vec<FontInfo>,
}

impl FontCatalog {
    pub fn load(fonts_csv: &Path, fonts_root: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(fonts_csv)?;
        let mut rows = Vec::new();
        for row in reader.deserialize::<FontRow>() {
            rows.push(row?);
        }
        Ok(Self::from_rows(rows, fonts_root))
    }

    /// Fonts without any supported characters are left out.
    pub fn from_rows(rows: Vec<FontRow>, fonts_root: &Path) -> Self {
        let fonts = rows
            .into_iter()
            .filter_map(|row| {
                let chars: HashSet<char> = row.supported_chars?.chars().collect();
                if chars.is_empty() {
                    return None;
                }
                Some(FontInfo {
                    path: fonts_root.join(&row.font_path),
                    chars,
                    num_chars: row.num_chars,
                    label: row.label,
                })
            })
            .collect();
        Self {
            fonts_root: fonts_root.to_path_buf(),
            fonts,
        }
    }

    pub fn fonts(&self) -> &[FontInfo] {
        &self.fonts
    }

    pub fn get(&self, path: &Path) -> Option<&FontInfo> {
        self.fonts.iter().find(|f| f.path == path)
    }

    /// Distinct labels in order of first appearance.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = Vec::new();
        for font in &self.fonts {
            if !labels.contains(&font.label.as_str()) {
                labels.push(&font.label);
            }
        }
        labels
    }

    pub fn with_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a FontInfo> + 'a {
        self.fonts.iter().filter(move |f| f.label == label)
    }

    /// Path relative to the fonts root, as stored in generated metadata.
    pub fn relative_path<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.fonts_root).unwrap_or(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("fonts.csv");
        std::fs::write(
            &csv_path,
            "font_path,supported_chars,num_chars,label\n\
             a/A.ttf,あいう,3,regular\n\
             B.otf,,0,regular\n\
             C.ttc,あ漢,2,special\n",
        )
        .unwrap();

        let catalog = FontCatalog::load(&csv_path, Path::new("/fonts")).unwrap();
        assert_eq!(catalog.fonts().len(), 2);
        assert_eq!(catalog.labels(), vec!["regular", "special"]);

        let font = catalog.get(Path::new("/fonts/a/A.ttf")).unwrap();
        assert!(font.supports("あ い"));
        assert!(!font.supports("あ漢"));
        assert_eq!(
            catalog.relative_path(&font.path),
            Path::new("a/A.ttf")
        );
        assert_eq!(catalog.with_label("special").count(), 1);
    }
}
