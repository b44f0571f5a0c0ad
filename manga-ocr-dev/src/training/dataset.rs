use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use image::DynamicImage;
use manga_ocr::{preprocess, OcrTokenizer, PreprocessorConfig};
use ndarray::{Array3, Axis};
use rand::{Rng, RngCore};
use serde::{Deserialize, Deserializer};

use crate::{
    augment::{self, Compose, Transform},
    data::{manga109::read_csv, TextRow},
    DataPaths, Result,
};

/// Label value ignored by the loss.
pub const IGNORE_INDEX: i64 = -100;

const MEDIUM_P: f64 = 0.8;
const HEAVY_P: f64 = 0.02;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: PathBuf,
    pub text: String,
    pub synthetic: bool,
}

#[derive(Debug, Clone)]
pub struct Item {
    /// `[3, H, W]`, normalized.
    pub pixel_values: Array3<f32>,
    pub labels: Vec<i64>,
}

// rows with a missing field are dropped
#[derive(Deserialize)]
struct MetaRecord {
    id: Option<String>,
    text: Option<String>,
    source: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    vertical: Option<bool>,
    font_path: Option<String>,
}

/// Accepts `true`/`false` in any case and `1`/`0`. Anything else is missing.
fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|v| match v.trim() {
        "1" => Some(true),
        "0" => Some(false),
        v if v.eq_ignore_ascii_case("true") => Some(true),
        v if v.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }))
}

fn synthetic_entries(synthetic_root: &Path, skip_packages: &HashSet<String>) -> Result<Vec<Entry>> {
    let meta_dir = synthetic_root.join("meta");
    if !meta_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut metas: Vec<PathBuf> = std::fs::read_dir(&meta_dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|e| e == "csv"))
        .collect();
    metas.sort();

    let mut entries = Vec::new();
    for path in metas {
        let Some(package) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if skip_packages.contains(package) {
            tracing::info!("Skipping package {}", path.display());
            continue;
        }
        let img_dir = synthetic_root.join("img").join(package);
        if !img_dir.is_dir() {
            tracing::warn!("Missing image data for package {}, skipping", path.display());
            continue;
        }
        for record in read_csv::<MetaRecord>(&path)? {
            let (Some(id), Some(text), Some(_), Some(_), Some(_)) = (
                record.id,
                record.text,
                record.source,
                record.vertical,
                record.font_path,
            ) else {
                continue;
            };
            entries.push(Entry {
                path: img_dir.join(format!("{id}.jpg")),
                text,
                synthetic: true,
            });
        }
    }
    Ok(entries)
}

fn manga109_entries(manga109_root: &Path, split: &str) -> Result<Vec<Entry>> {
    let rows: Vec<TextRow> = read_csv(&manga109_root.join("data.csv"))?;
    Ok(rows
        .into_iter()
        .filter(|row| row.split == split)
        .filter_map(|row| {
            Some(Entry {
                text: row.text?,
                path: manga109_root.join(&row.crop_path),
                synthetic: false,
            })
        })
        .collect())
}

/// Synthetic packages followed by Manga109 crops of `split`.
pub fn load_entries(paths: &DataPaths, split: &str, skip_packages: &[u32]) -> Result<Vec<Entry>> {
    let skip: HashSet<String> = skip_packages.iter().map(|p| format!("{p:04}")).collect();
    let mut entries = synthetic_entries(&paths.synthetic_root, &skip)?;
    entries.extend(manga109_entries(&paths.manga109_root, split)?);
    Ok(entries)
}

pub struct MangaDataset<'a> {
    tokenizer: &'a OcrTokenizer,
    preprocessor: &'a PreprocessorConfig,
    max_target_length: usize,
    entries: Vec<Entry>,
    augment: bool,
    medium: Compose,
    heavy: Compose,
}

impl<'a> MangaDataset<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tokenizer: &'a OcrTokenizer,
        preprocessor: &'a PreprocessorConfig,
        paths: &DataPaths,
        split: &str,
        max_target_length: usize,
        limit: Option<usize>,
        augment: bool,
        skip_packages: &[u32],
    ) -> Result<Self> {
        tracing::info!("Initializing dataset {}...", split);
        let entries = load_entries(paths, split, skip_packages)?;
        let dataset = Self::from_entries(
            tokenizer,
            preprocessor,
            entries,
            max_target_length,
            limit,
            augment,
        );
        tracing::info!("Dataset {}: {}", split, dataset.len());
        Ok(dataset)
    }

    pub fn from_entries(
        tokenizer: &'a OcrTokenizer,
        preprocessor: &'a PreprocessorConfig,
        mut entries: Vec<Entry>,
        max_target_length: usize,
        limit: Option<usize>,
        augment: bool,
    ) -> Self {
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Self {
            tokenizer,
            preprocessor,
            max_target_length,
            entries,
            augment,
            medium: augment::medium(),
            heavy: augment::heavy(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, idx: usize) -> Result<Item> {
        self.get_with_rng(idx, &mut rand::rng())
    }

    pub fn get_with_rng(&self, idx: usize, rng: &mut dyn RngCore) -> Result<Item> {
        let entry = self.entries.get(idx).ok_or_else(|| {
            crate::DevError::Data(format!("index {idx} out of range for {} samples", self.len()))
        })?;

        let transform = if self.augment {
            let roll: f64 = rng.random();
            if roll < MEDIUM_P {
                Some(&self.medium)
            } else if roll < MEDIUM_P + HEAVY_P {
                Some(&self.heavy)
            } else {
                None
            }
        } else {
            None
        };

        let pixel_values = self.read_image(&entry.path, transform, rng)?;
        let labels = self
            .tokenizer
            .encode_label(&entry.text, self.max_target_length)
            .into_iter()
            .map(|id| {
                if id == self.tokenizer.pad_id() {
                    IGNORE_INDEX
                } else {
                    id as i64
                }
            })
            .collect();

        Ok(Item {
            pixel_values,
            labels,
        })
    }

    fn read_image(
        &self,
        path: &Path,
        transform: Option<&Compose>,
        rng: &mut dyn RngCore,
    ) -> Result<Array3<f32>> {
        let mut img = image::open(path)?.to_luma8();
        if let Some(transform) = transform {
            img = transform.apply(&img, rng);
        }
        let pixel_values = preprocess(&DynamicImage::ImageLuma8(img), self.preprocessor);
        Ok(pixel_values.index_axis_move(Axis(0), 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::manga109::write_csv;

    fn text_row(id: &str, text: Option<&str>, split: &str) -> TextRow {
        TextRow {
            book: "ARMS".into(),
            page_index: 3,
            page_path: "x.jpg".into(),
            page_width: 100,
            page_height: 100,
            id: id.into(),
            text: text.map(Into::into),
            xmin: 0,
            ymin: 0,
            xmax: 10,
            ymax: 10,
            split: split.into(),
            crop_path: format!("crops/{id}.png"),
        }
    }

    fn paths(root: &Path) -> DataPaths {
        DataPaths {
            assets: root.join("assets"),
            fonts_root: root.join("fonts"),
            synthetic_root: root.join("synthetic"),
            background_dir: root.join("bg"),
            manga109_root: root.join("manga109"),
            train_root: root.join("out"),
        }
    }

    #[test]
    fn test_load_entries() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());

        let meta = paths.synthetic_root.join("meta");
        std::fs::create_dir_all(&meta).unwrap();
        std::fs::create_dir_all(paths.synthetic_root.join("img/0000")).unwrap();
        std::fs::create_dir_all(paths.synthetic_root.join("img/0002")).unwrap();
        let header = "source,id,text,vertical,font_path\n";
        std::fs::write(
            meta.join("0000.csv"),
            format!("{header}cc-100,a,あいう,true,A.ttf\nrandom,b,,false,A.ttf\n"),
        )
        .unwrap();
        // no image directory
        std::fs::write(meta.join("0001.csv"), format!("{header}cc-100,c,えお,true,A.ttf\n")).unwrap();
        std::fs::write(meta.join("0002.csv"), format!("{header}cc-100,d,かき,true,A.ttf\n")).unwrap();

        std::fs::create_dir_all(&paths.manga109_root).unwrap();
        write_csv(
            &paths.manga109_root.join("data.csv"),
            &[
                text_row("t1", Some("テスト"), "train"),
                text_row("t2", Some("評価"), "test"),
                text_row("t3", None, "train"),
            ],
        )
        .unwrap();

        let entries = load_entries(&paths, "train", &[2]).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, paths.synthetic_root.join("img/0000/a.jpg"));
        assert!(entries[0].synthetic);
        assert_eq!(entries[1].text, "テスト");
        assert_eq!(entries[1].path, paths.manga109_root.join("crops/t1.png"));
        assert!(!entries[1].synthetic);

        let entries = load_entries(&paths, "test", &[]).unwrap();
        let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["あいう", "かき", "評価"]);
    }

    #[test]
    fn test_meta_accepts_capitalised_bools() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths(dir.path());
        let meta = paths.synthetic_root.join("meta");
        std::fs::create_dir_all(&meta).unwrap();
        std::fs::create_dir_all(paths.synthetic_root.join("img/0000")).unwrap();
        std::fs::write(
            meta.join("0000.csv"),
            "source,id,text,vertical,font_path\n\
             cc-100,a,あいう,True,A.ttf\n\
             cc-100,b,えお,False,A.ttf\n\
             cc-100,c,かき,1,A.ttf\n\
             cc-100,d,くけ,maybe,A.ttf\n",
        )
        .unwrap();
        std::fs::create_dir_all(&paths.manga109_root).unwrap();
        std::fs::write(paths.manga109_root.join("data.csv"), "").unwrap();

        let entries = load_entries(&paths, "train", &[]).unwrap();
        let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["あいう", "えお", "かき"]);
    }

    fn tokenizer(dir: &Path) -> OcrTokenizer {
        let vocab = dir.join("vocab.txt");
        let specials = dir.join("special_tokens_map.json");
        std::fs::write(&vocab, "[PAD]\n[UNK]\n[CLS]\n[SEP]\nテ\nス\nト\n").unwrap();
        std::fs::write(
            &specials,
            r#"{"unk_token": "[UNK]", "sep_token": "[SEP]", "pad_token": "[PAD]", "cls_token": "[CLS]"}"#,
        )
        .unwrap();
        OcrTokenizer::load(&vocab, &specials).unwrap()
    }

    #[test]
    fn test_get_item() {
        let dir = tempfile::tempdir().unwrap();
        let tok = tokenizer(dir.path());
        let preprocessor = PreprocessorConfig::default();
        let img_path = dir.path().join("a.png");
        image::GrayImage::from_pixel(60, 40, image::Luma([255])).save(&img_path).unwrap();

        let entries = vec![Entry {
            path: img_path,
            text: "テスト".into(),
            synthetic: false,
        }];
        let ds = MangaDataset::from_entries(&tok, &preprocessor, entries, 8, None, true);
        assert_eq!(ds.len(), 1);

        let item = ds.get(0).unwrap();
        assert_eq!(item.pixel_values.shape(), &[3, 224, 224]);
        assert_eq!(item.labels, vec![2, 4, 5, 6, 3, -100, -100, -100]);
        assert!(ds.get(1).is_err());
    }

    #[test]
    fn test_limit() {
        let dir = tempfile::tempdir().unwrap();
        let tok = tokenizer(dir.path());
        let preprocessor = PreprocessorConfig::default();
        let entries = (0..5)
            .map(|i| Entry {
                path: PathBuf::from(format!("{i}.png")),
                text: String::new(),
                synthetic: true,
            })
            .collect();
        let ds = MangaDataset::from_entries(&tok, &preprocessor, entries, 8, Some(3), false);
        assert_eq!(ds.len(), 3);
    }
}
