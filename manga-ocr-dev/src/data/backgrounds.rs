//! Text-free background crops cut from Manga109 pages.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use ndarray::{s, Array2};
use rand::{rngs::StdRng, seq::IndexedRandom, Rng, SeedableRng};
use rayon::prelude::*;

use super::manga109::{read_csv, FrameRow, TextRow};
use crate::{progress_bar, Result};

pub const ASPECT_RATIO_RANGE: (f32, f32) = (0.33, 3.0);

/// Grow a box around `(y, x)` one pixel per side per step until each side hits
/// the mask or the border, or the aspect ratio leaves `ratio_range`.
/// Returns `(ymin, ymax, xmin, xmax)`.
pub fn find_rectangle(
    mask: &Array2<bool>,
    y: usize,
    x: usize,
    ratio_range: (f32, f32),
) -> (usize, usize, usize, usize) {
    let (h, w) = mask.dim();
    let last_row = h.saturating_sub(1) as isize;
    let last_col = w.saturating_sub(1) as isize;

    let (mut ymin_, mut ymax_) = (y as isize, y as isize);
    let (mut xmin_, mut xmax_) = (x as isize, x as isize);
    let (mut ymin, mut ymax, mut xmin, mut xmax) = (None, None, None, None);

    let row_hit = |row: isize, x0: isize, x1: isize| {
        x1 > x0 && mask.slice(s![row, x0..x1]).iter().any(|&m| m)
    };
    let col_hit = |col: isize, y0: isize, y1: isize| {
        y1 > y0 && mask.slice(s![y0..y1, col]).iter().any(|&m| m)
    };

    loop {
        if ymin.is_none() {
            ymin_ -= 1;
            if ymin_ <= 0 {
                ymin_ = 0;
                ymin = Some(ymin_);
            } else if row_hit(ymin_, xmin_, xmax_) {
                ymin = Some(ymin_);
            }
        }

        if ymax.is_none() {
            ymax_ += 1;
            if ymax_ >= last_row {
                ymax_ = last_row;
                ymax = Some(ymax_);
            } else if row_hit(ymax_, xmin_, xmax_) {
                ymax = Some(ymax_);
            }
        }

        if xmin.is_none() {
            xmin_ -= 1;
            if xmin_ <= 0 {
                xmin_ = 0;
                xmin = Some(xmin_);
            } else if col_hit(xmin_, ymin_, ymax_) {
                xmin = Some(xmin_);
            }
        }

        if xmax.is_none() {
            xmax_ += 1;
            if xmax_ >= last_col {
                xmax_ = last_col;
                xmax = Some(xmax_);
            } else if col_hit(xmax_, ymin_, ymax_) {
                xmax = Some(xmax_);
            }
        }

        let bh = ymax_ - ymin_;
        let bw = xmax_ - xmin_;
        if bh > 1 && bw > 1 {
            let ratio = bw as f32 / bh as f32;
            if ratio < ratio_range.0 || ratio > ratio_range.1 {
                return (
                    ymin_ as usize,
                    ymax_ as usize,
                    xmin_ as usize,
                    xmax_ as usize,
                );
            }
        }

        if let (Some(y0), Some(y1), Some(x0), Some(x1)) = (ymin, ymax, xmin, xmax) {
            return (y0 as usize, y1 as usize, x0 as usize, x1 as usize);
        }
    }
}

/// Mask of pixels that must not appear in a background: text boxes and
/// everything outside the panel frames.
pub fn page_mask(h: usize, w: usize, texts: &[&TextRow], frames: &[&FrameRow]) -> Array2<bool> {
    let clip = |v: u32, max: usize| (v as usize).min(max);

    let mut frames_mask = Array2::from_elem((h, w), false);
    for f in frames {
        let (y0, y1) = (clip(f.ymin, h), clip(f.ymax, h));
        let (x0, x1) = (clip(f.xmin, w), clip(f.xmax, w));
        if y1 > y0 && x1 > x0 {
            frames_mask.slice_mut(s![y0..y1, x0..x1]).fill(true);
        }
    }

    let mut mask = frames_mask.mapv(|inside| !inside);
    for t in texts {
        let (y0, y1) = (clip(t.ymin, h), clip(t.ymax, h));
        let (x0, x1) = (clip(t.xmin, w), clip(t.xmax, w));
        if y1 > y0 && x1 > x0 {
            mask.slice_mut(s![y0..y1, x0..x1]).fill(true);
        }
    }
    mask
}

/// `<book>_<page>_<ymin>_<ymax>_<xmin>_<xmax>.png`
pub fn background_filename(page_path: &str, rect: (usize, usize, usize, usize)) -> String {
    let stem = Path::new(page_path).with_extension("");
    let parts: Vec<String> = stem
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let tail = parts[parts.len().saturating_sub(2)..].join("_");
    let (ymin, ymax, xmin, xmax) = rect;
    format!("{tail}_{ymin}_{ymax}_{xmin}_{xmax}.png")
}

pub struct BackgroundOptions {
    pub crops_per_page: usize,
    pub min_size: usize,
}

impl Default for BackgroundOptions {
    fn default() -> Self {
        Self {
            crops_per_page: 5,
            min_size: 40,
        }
    }
}

/// Cut background crops from every page listed in `data.csv` into `background_dir`.
pub fn generate_backgrounds<R: Rng + ?Sized>(
    manga109_root: &Path,
    background_dir: &Path,
    options: &BackgroundOptions,
    rng: &mut R,
) -> Result<usize> {
    let data: Vec<TextRow> = read_csv(&manga109_root.join("data.csv"))?;
    let frames: Vec<FrameRow> = read_csv(&manga109_root.join("frames.csv"))?;
    std::fs::create_dir_all(background_dir)?;

    let mut texts_by_page: BTreeMap<&str, Vec<&TextRow>> = BTreeMap::new();
    for row in &data {
        texts_by_page.entry(row.page_path.as_str()).or_default().push(row);
    }
    let mut frames_by_page: BTreeMap<&str, Vec<&FrameRow>> = BTreeMap::new();
    for row in &frames {
        frames_by_page.entry(row.page_path.as_str()).or_default().push(row);
    }

    let jobs: Vec<(&str, &Vec<&TextRow>, u64)> = texts_by_page
        .iter()
        .map(|(page, texts)| (*page, texts, rng.random()))
        .collect();

    let pb = progress_bar(jobs.len(), "backgrounds");
    let saved: usize = jobs
        .par_iter()
        .map(|(page_path, texts, seed)| {
            let page_frames = frames_by_page.get(page_path).map(Vec::as_slice).unwrap_or(&[]);
            let mut page_rng = StdRng::seed_from_u64(*seed);
            let n = crop_page(
                manga109_root,
                background_dir,
                page_path,
                texts,
                page_frames,
                options,
                &mut page_rng,
            )
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to process {}: {}", page_path, e);
                0
            });
            pb.inc(1);
            n
        })
        .sum();
    pb.finish();

    tracing::info!("Saved {} backgrounds to {}", saved, background_dir.display());
    Ok(saved)
}

fn crop_page(
    manga109_root: &Path,
    background_dir: &Path,
    page_path: &str,
    texts: &[&TextRow],
    frames: &[&FrameRow],
    options: &BackgroundOptions,
    rng: &mut StdRng,
) -> Result<usize> {
    let page = image::open(manga109_root.join(page_path))?;
    let (w, h) = (page.width() as usize, page.height() as usize);
    let mask = page_mask(h, w, texts, frames);

    let unmasked: Vec<(usize, usize)> = mask
        .indexed_iter()
        .filter(|(_, &m)| !m)
        .map(|(idx, _)| idx)
        .collect();
    if unmasked.is_empty() {
        return Ok(0);
    }

    let mut saved = 0;
    for _ in 0..options.crops_per_page {
        let Some(&(y, x)) = unmasked.choose(rng) else {
            break;
        };
        let rect @ (ymin, ymax, xmin, xmax) = find_rectangle(&mask, y, x, ASPECT_RATIO_RANGE);
        if ymax - ymin >= options.min_size && xmax - xmin >= options.min_size {
            let crop = page.crop_imm(
                xmin as u32,
                ymin as u32,
                (xmax - xmin) as u32,
                (ymax - ymin) as u32,
            );
            crop.save(background_dir.join(background_filename(page_path, rect)))?;
            saved += 1;
        }
    }
    Ok(saved)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Background {
    pub path: PathBuf,
    pub h: u32,
    pub w: u32,
    pub ratio: f32,
}

/// Background crops available for compositing.
#[derive(Debug, Clone, Default)]
pub struct BackgroundCatalog {
    entries: Vec<Background>,
}

impl BackgroundCatalog {
    /// Read every crop in `dir`, taking its size from the trailing
    /// `_<ymin>_<ymax>_<xmin>_<xmax>` of the file name.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            match parse_background(&path) {
                Some(bg) => entries.push(bg),
                None => tracing::warn!("Skipping background {}", path.display()),
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!("{} backgrounds in {}", entries.len(), dir.display());
        Ok(Self { entries })
    }

    pub fn from_entries(entries: Vec<Background>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[Background] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Background> {
        self.entries.choose(rng)
    }
}

fn parse_background(path: &Path) -> Option<Background> {
    let stem = path.file_stem()?.to_str()?;
    let nums: Vec<u32> = stem
        .rsplitn(5, '_')
        .take(4)
        .map(|v| v.parse().ok())
        .collect::<Option<_>>()?;
    if nums.len() != 4 {
        return None;
    }
    // rsplitn yields from the end: xmax, xmin, ymax, ymin
    let (xmax, xmin, ymax, ymin) = (nums[0], nums[1], nums[2], nums[3]);
    let h = ymax.checked_sub(ymin).filter(|&h| h > 0)?;
    let w = xmax.checked_sub(xmin)?;
    Some(Background {
        path: path.to_path_buf(),
        h,
        w,
        ratio: w as f32 / h as f32,
    })
}
