//! Export of Manga109 annotations to flat CSV tables and text-box crops.

use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};
use rand::{seq::SliceRandom, Rng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{progress_bar, DevError, Result};

pub const RELEASE_DIR: &str = "Manga109s_released_2021_02_28";
const CROP_MARGIN: u32 = 10;
const TEST_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    pub name: String,
    pub annotations: PathBuf,
    pub images: PathBuf,
}

pub fn get_books(manga109_root: &Path) -> Result<Vec<Book>> {
    let root = manga109_root.join(RELEASE_DIR);
    let list = std::fs::read_to_string(root.join("books.txt"))?;
    Ok(list
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|name| Book {
            name: name.to_string(),
            annotations: root.join("annotations").join(format!("{name}.xml")),
            images: root.join("images").join(name),
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxAnnotation {
    pub id: String,
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextAnnotation {
    pub bbox: BoxAnnotation,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Page {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub frames: Vec<BoxAnnotation>,
    pub texts: Vec<TextAnnotation>,
}

fn attributes(e: &BytesStart) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

fn number(attrs: &HashMap<String, String>, key: &str) -> Result<u32> {
    let value = attrs
        .get(key)
        .ok_or_else(|| DevError::Data(format!("missing attribute {key}")))?;
    value
        .parse()
        .map_err(|_| DevError::Data(format!("invalid {key}: {value}")))
}

fn bbox(attrs: &HashMap<String, String>) -> Result<BoxAnnotation> {
    Ok(BoxAnnotation {
        id: attrs
            .get("id")
            .cloned()
            .ok_or_else(|| DevError::Data("missing attribute id".into()))?,
        xmin: number(attrs, "xmin")?,
        ymin: number(attrs, "ymin")?,
        xmax: number(attrs, "xmax")?,
        ymax: number(attrs, "ymax")?,
    })
}

#[derive(Default)]
struct AnnotationParser {
    pages: Vec<Page>,
    page: Option<Page>,
    text: Option<TextAnnotation>,
}

impl AnnotationParser {
    fn open(&mut self, e: &BytesStart, empty: bool) -> Result<()> {
        match e.name().as_ref() {
            b"page" => {
                let attrs = attributes(e)?;
                let page = Page {
                    index: number(&attrs, "index")?,
                    width: number(&attrs, "width")?,
                    height: number(&attrs, "height")?,
                    ..Default::default()
                };
                if empty {
                    self.pages.push(page);
                } else {
                    self.page = Some(page);
                }
            }
            b"frame" => {
                if let Some(page) = self.page.as_mut() {
                    page.frames.push(bbox(&attributes(e)?)?);
                }
            }
            b"text" => {
                let annotation = TextAnnotation {
                    bbox: bbox(&attributes(e)?)?,
                    text: None,
                };
                match (empty, self.page.as_mut()) {
                    (true, Some(page)) => page.texts.push(annotation),
                    (false, Some(_)) => self.text = Some(annotation),
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &[u8]) {
        match name {
            b"text" => {
                if let (Some(done), Some(page)) = (self.text.take(), self.page.as_mut()) {
                    page.texts.push(done);
                }
            }
            b"page" => {
                if let Some(done) = self.page.take() {
                    self.pages.push(done);
                }
            }
            _ => {}
        }
    }

    fn content(&mut self, content: &str) {
        if let Some(text) = self.text.as_mut() {
            text.text.get_or_insert_with(String::new).push_str(content);
        }
    }
}

/// Pages of a book annotation file with their frame and text boxes.
pub fn parse_annotations<R: std::io::BufRead>(mut reader: Reader<R>) -> Result<Vec<Page>> {
    reader.trim_text(true);

    let mut parser = AnnotationParser::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => parser.open(&e, false)?,
            Event::Empty(e) => parser.open(&e, true)?,
            Event::Text(t) => parser.content(&t.unescape()?),
            Event::End(e) => parser.close(e.name().as_ref()),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(parser.pages)
}

pub fn read_annotations(path: &Path) -> Result<Vec<Page>> {
    let reader = Reader::from_reader(BufReader::new(File::open(path)?));
    parse_annotations(reader)
}

/// Page image path relative to the Manga109 root.
fn page_path(book: &str, index: u32) -> String {
    format!("{RELEASE_DIR}/images/{book}/{index:03}.jpg")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRow {
    pub book: String,
    pub page_index: u32,
    pub page_path: String,
    pub page_width: u32,
    pub page_height: u32,
    pub id: String,
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRow {
    pub book: String,
    pub page_index: u32,
    pub page_path: String,
    pub page_width: u32,
    pub page_height: u32,
    pub id: String,
    pub text: Option<String>,
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
    pub split: String,
    pub crop_path: String,
}

pub fn frame_rows(book: &str, pages: &[Page]) -> Vec<FrameRow> {
    pages
        .iter()
        .flat_map(|page| {
            page.frames.iter().map(move |frame| FrameRow {
                book: book.to_string(),
                page_index: page.index,
                page_path: page_path(book, page.index),
                page_width: page.width,
                page_height: page.height,
                id: frame.id.clone(),
                xmin: frame.xmin,
                ymin: frame.ymin,
                xmax: frame.xmax,
                ymax: frame.ymax,
            })
        })
        .collect()
}

/// Text rows of a book; all start in the `train` split.
pub fn text_rows(book: &str, pages: &[Page]) -> Vec<TextRow> {
    pages
        .iter()
        .flat_map(|page| {
            page.texts.iter().map(move |t| TextRow {
                book: book.to_string(),
                page_index: page.index,
                page_path: page_path(book, page.index),
                page_width: page.width,
                page_height: page.height,
                id: t.bbox.id.clone(),
                text: t.text.clone(),
                xmin: t.bbox.xmin,
                ymin: t.bbox.ymin,
                xmax: t.bbox.xmax,
                ymax: t.bbox.ymax,
                split: "train".into(),
                crop_path: format!("crops/{}.png", t.bbox.id),
            })
        })
        .collect()
}

/// Mark a random 10% of the rows as `test`.
pub fn assign_splits<R: Rng + ?Sized>(rows: &mut [TextRow], rng: &mut R) {
    let n_test = (TEST_FRACTION * rows.len() as f64) as usize;
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.shuffle(rng);
    for &idx in &order[..n_test] {
        rows[idx].split = "test".into();
    }
}

pub(crate) fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_csv<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Write `frames.csv` with every annotated frame.
pub fn export_frames(manga109_root: &Path) -> Result<usize> {
    let books = get_books(manga109_root)?;
    let pb = progress_bar(books.len(), "frames");
    let mut rows = Vec::new();
    for book in &books {
        let pages = read_annotations(&book.annotations)?;
        rows.extend(frame_rows(&book.name, &pages));
        pb.inc(1);
    }
    pb.finish();

    write_csv(&manga109_root.join("frames.csv"), &rows)?;
    tracing::info!("Exported {} frames", rows.len());
    Ok(rows.len())
}

/// Write `data.csv` with every text box and save each box as `crops/<id>.png`.
pub fn export_crops<R: Rng + ?Sized>(manga109_root: &Path, rng: &mut R) -> Result<usize> {
    let crops_root = manga109_root.join("crops");
    std::fs::create_dir_all(&crops_root)?;

    let books = get_books(manga109_root)?;
    let pb = progress_bar(books.len(), "texts");
    let mut rows = Vec::new();
    for book in &books {
        let pages = read_annotations(&book.annotations)?;
        rows.extend(text_rows(&book.name, &pages));
        pb.inc(1);
    }
    pb.finish();

    assign_splits(&mut rows, rng);
    write_csv(&manga109_root.join("data.csv"), &rows)?;

    let mut by_page: BTreeMap<&str, Vec<&TextRow>> = BTreeMap::new();
    for row in &rows {
        by_page.entry(row.page_path.as_str()).or_default().push(row);
    }

    let pb = progress_bar(by_page.len(), "crops");
    by_page.par_iter().for_each(|(page_path, boxes)| {
        if let Err(e) = save_crops(manga109_root, page_path, boxes) {
            tracing::warn!("Failed to crop {}: {}", page_path, e);
        }
        pb.inc(1);
    });
    pb.finish();

    tracing::info!("Exported {} text boxes", rows.len());
    Ok(rows.len())
}

fn save_crops(manga109_root: &Path, page_path: &str, boxes: &[&TextRow]) -> Result<()> {
    let page = image::open(manga109_root.join(page_path))?;
    let (w, h) = (page.width(), page.height());
    for b in boxes {
        let xmin = b.xmin.saturating_sub(CROP_MARGIN);
        let ymin = b.ymin.saturating_sub(CROP_MARGIN);
        let xmax = (b.xmax + CROP_MARGIN).min(w);
        let ymax = (b.ymax + CROP_MARGIN).min(h);
        if xmax <= xmin || ymax <= ymin {
            tracing::warn!("Empty box {} on {}", b.id, page_path);
            continue;
        }
        let crop = page.crop_imm(xmin, ymin, xmax - xmin, ymax - ymin);
        crop.save(manga109_root.join(&b.crop_path))?;
    }
    Ok(())
}
