use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, Result};
use image::{DynamicImage, RgbaImage};

/// Something polled for new images.
pub trait ImageSource {
    /// Images that appeared since the last poll. Per-item failures are logged, not returned.
    fn poll(&mut self) -> Vec<DynamicImage>;
}

/// Last image seen on the clipboard, so an unchanged clipboard is not reported twice.
#[derive(Default)]
struct LastImage(Option<RgbaImage>);

impl LastImage {
    /// `None` means the clipboard holds something other than an image, which
    /// forgets the last one.
    fn update(&mut self, current: Option<RgbaImage>) -> Option<RgbaImage> {
        match current {
            None => {
                self.0 = None;
                None
            }
            Some(img) if self.0.as_ref() == Some(&img) => None,
            Some(img) => {
                self.0 = Some(img.clone());
                Some(img)
            }
        }
    }
}

pub struct ClipboardSource {
    clipboard: arboard::Clipboard,
    previous: LastImage,
    verbose: bool,
}

impl ClipboardSource {
    pub fn new(verbose: bool) -> Result<Self> {
        let clipboard = arboard::Clipboard::new().context("failed to open clipboard")?;
        Ok(Self {
            clipboard,
            previous: LastImage::default(),
            verbose,
        })
    }
}

impl ImageSource for ClipboardSource {
    fn poll(&mut self) -> Vec<DynamicImage> {
        let data = match self.clipboard.get_image() {
            Ok(data) => data,
            Err(arboard::Error::ContentNotAvailable) => {
                if self.verbose {
                    tracing::info!("No image in clipboard");
                }
                self.previous.update(None);
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!("Error while reading from clipboard: {}", e);
                return Vec::new();
            }
        };

        let Some(img) =
            RgbaImage::from_raw(data.width as u32, data.height as u32, data.bytes.into_owned())
        else {
            tracing::warn!("Clipboard image has an unexpected buffer size");
            return Vec::new();
        };

        self.previous
            .update(Some(img))
            .map(DynamicImage::ImageRgba8)
            .into_iter()
            .collect()
    }
}

type PathKey = (PathBuf, Option<SystemTime>);

fn path_key(path: &Path) -> PathKey {
    let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();
    (path.to_path_buf(), mtime)
}

fn list_dir(dir: &Path) -> Vec<PathBuf> {
    let mut paths = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect::<Vec<_>>(),
        Err(e) => {
            tracing::warn!("Failed to list {}: {}", dir.display(), e);
            Vec::new()
        }
    };
    paths.sort();
    paths
}

/// Reports files whose `(path, mtime)` was not present when the source was created
/// or at an earlier poll.
pub struct DirectorySource {
    dir: PathBuf,
    seen: HashSet<PathKey>,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let seen = list_dir(&dir).iter().map(|p| path_key(p)).collect();
        Self { dir, seen }
    }
}

impl ImageSource for DirectorySource {
    fn poll(&mut self) -> Vec<DynamicImage> {
        let mut images = Vec::new();
        for path in list_dir(&self.dir) {
            let key = path_key(&path);
            if self.seen.contains(&key) {
                continue;
            }
            self.seen.insert(key);

            match image::open(&path) {
                Ok(img) => {
                    tracing::debug!("New image {}", path.display());
                    images.push(img);
                }
                Err(e) => tracing::warn!("Error while loading file {}: {}", path.display(), e),
            }
        }
        images
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_image_is_reported_again_after_other_content() {
        let page = RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]));
        let mut last = LastImage::default();

        assert!(last.update(Some(page.clone())).is_some());
        assert!(last.update(Some(page.clone())).is_none(), "unchanged clipboard");
        // text copied in between
        assert!(last.update(None).is_none());
        assert_eq!(last.update(Some(page.clone())), Some(page));
    }

    #[test]
    fn test_directory_source_ignores_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        image::GrayImage::new(4, 4).save(dir.path().join("old.png")).unwrap();

        let mut source = DirectorySource::new(dir.path());
        assert!(source.poll().is_empty());

        image::GrayImage::new(6, 3).save(dir.path().join("new.png")).unwrap();
        let images = source.poll();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].width(), 6);

        assert!(source.poll().is_empty(), "each file is reported once");
    }

    #[test]
    fn test_directory_source_skips_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = DirectorySource::new(dir.path());

        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
        image::GrayImage::new(2, 2).save(dir.path().join("ok.png")).unwrap();

        let images = source.poll();
        assert_eq!(images.len(), 1);
    }
}
