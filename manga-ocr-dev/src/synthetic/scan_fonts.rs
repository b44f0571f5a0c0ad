//! Find which vocabulary characters each font can actually draw.
//!
//! A font's character map is not trusted on its own: a character is kept only
//! when it maps to a glyph and that glyph puts at least one pixel on the canvas.
//! Some fonts still draw a placeholder box for characters they lack.

use std::path::{Path, PathBuf};

use ab_glyph::{point, Font, FontRef, PxScale};
use rayon::prelude::*;

use super::fonts::FontRow;
use crate::{progress_bar, DevError, Result};

const FONT_EXTENSIONS: &[&str] = &["ttf", "TTF", "otf", "ttc"];
const PROBE_SIZE: f32 = 24.0;

/// Font files under `root`, sorted.
pub fn find_fonts(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| FONT_EXTENSIONS.contains(&e))
            {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

fn has_pixels(font: &FontRef, ch: char) -> bool {
    let id = font.glyph_id(ch);
    if id.0 == 0 {
        return false;
    }
    let glyph = id.with_scale_and_position(PxScale::from(PROBE_SIZE), point(10.0, PROBE_SIZE));
    let Some(outlined) = font.outline_glyph(glyph) else {
        return false;
    };
    let mut drawn = false;
    outlined.draw(|_, _, coverage| {
        if coverage > 0.0 {
            drawn = true;
        }
    });
    drawn
}

/// Characters of `vocab` that `font_data` can draw, in vocab order.
pub fn supported_chars(font_data: &[u8], vocab: &[char]) -> Result<String> {
    let font = FontRef::try_from_slice_and_index(font_data, 0)
        .map_err(|e| DevError::Font(e.to_string()))?;
    Ok(vocab.iter().copied().filter(|&c| has_pixels(&font, c)).collect())
}

/// Empty when the font cannot be read.
pub fn process_font(path: &Path, vocab: &[char]) -> String {
    let result = std::fs::read(path)
        .map_err(DevError::from)
        .and_then(|data| supported_chars(&data, vocab));
    match result {
        Ok(chars) => chars,
        Err(e) => {
            tracing::warn!("Error while processing {}: {}", path.display(), e);
            String::new()
        }
    }
}

/// Scan every font under `fonts_root` and write `fonts.csv`.
pub fn scan_fonts(fonts_root: &Path, vocab: &[char], out_csv: &Path) -> Result<Vec<FontRow>> {
    let paths = find_fonts(fonts_root)?;
    tracing::info!("Scanning {} fonts in {}", paths.len(), fonts_root.display());

    let pb = progress_bar(paths.len(), "fonts");
    let rows: Vec<FontRow> = paths
        .par_iter()
        .map(|path| {
            let chars = process_font(path, vocab);
            pb.inc(1);
            FontRow {
                font_path: path
                    .strip_prefix(fonts_root)
                    .unwrap_or(path)
                    .to_string_lossy()
                    .into_owned(),
                num_chars: chars.chars().count(),
                supported_chars: Some(chars),
                label: "regular".into(),
            }
        })
        .collect();
    pb.finish();

    let mut writer = csv::Writer::from_path(out_csv)?;
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_fonts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        for name in ["a.ttf", "sub/b.TTF", "sub/c.otf", "d.ttc", "readme.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let fonts = find_fonts(dir.path()).unwrap();
        assert_eq!(fonts.len(), 4);
    }

    #[test]
    fn test_unreadable_font_has_no_chars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ttf");
        std::fs::write(&path, "not a font").unwrap();
        assert_eq!(process_font(&path, &['あ', 'A']), "");
    }

    #[test]
    fn test_scan_writes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let fonts = dir.path().join("fonts");
        std::fs::create_dir(&fonts).unwrap();
        std::fs::write(fonts.join("broken.ttf"), "").unwrap();
        let out = dir.path().join("fonts.csv");

        let rows = scan_fonts(&fonts, &['あ'], &out).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].font_path, "broken.ttf");
        assert_eq!(rows[0].num_chars, 0);

        let written = std::fs::read_to_string(&out).unwrap();
        assert!(written.starts_with("font_path,supported_chars,num_chars,label\n"));
        assert!(written.contains("broken.ttf,,0,regular"));
    }
}
