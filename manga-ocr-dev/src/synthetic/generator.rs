//! Randomized text selection and markup for synthetic samples.

use std::path::{Path, PathBuf};

use image::GrayImage;
use rand::{
    distr::{weighted::WeightedIndex, Distribution},
    seq::IndexedRandom,
    Rng, RngCore,
};
use rand_distr::{Normal, Poisson};
use serde::Deserialize;

use super::{
    compose::Renderer,
    css::{CssOverrides, CssParams},
    fonts::{FontCatalog, FontInfo},
    renderer::ChromeRenderer,
    segmenter::{Segmenter, TinySegmenter},
};
use crate::{
    charsets::{is_ascii, is_kanji, Charsets},
    data::BackgroundCatalog,
    DataPaths, DevError, Result,
};

const FONT_LABEL_WEIGHTS: &[(&str, f64)] = &[("common", 0.2), ("regular", 0.75), ("special", 0.05)];
/// Fonts considered capable enough for text no font fully supports.
const MIN_FALLBACK_CHARS: usize = 4000;
const MAX_NUM_LINES: usize = 10;
const MAX_LINE_LEN: usize = 20;

pub struct Sample {
    pub image: GrayImage,
    pub text: String,
    pub params: CssParams,
}

#[derive(Deserialize)]
struct LenRow {
    len: usize,
    p: f64,
}

/// Distribution of target text lengths, read from `len_to_p.csv`.
#[derive(Debug, Clone)]
pub struct LengthDistribution {
    lens: Vec<usize>,
    index: WeightedIndex<f64>,
}

impl LengthDistribution {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut pairs = Vec::new();
        for row in reader.deserialize::<LenRow>() {
            let row = row?;
            pairs.push((row.len, row.p));
        }
        Self::new(pairs)
    }

    pub fn new(pairs: Vec<(usize, f64)>) -> Result<Self> {
        let (lens, weights): (Vec<usize>, Vec<f64>) = pairs.into_iter().unzip();
        let index = WeightedIndex::new(&weights)
            .map_err(|e| DevError::Data(format!("invalid length distribution: {e}")))?;
        Ok(Self { lens, index })
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        self.lens[self.index.sample(rng)]
    }
}

pub struct SyntheticDataGenerator {
    charsets: Charsets,
    lengths: LengthDistribution,
    segmenter: Box<dyn Segmenter>,
    fonts: FontCatalog,
    font_labels: Vec<String>,
    font_p: WeightedIndex<f64>,
    renderer: Renderer,
}

impl SyntheticDataGenerator {
    pub fn new(
        charsets: Charsets,
        lengths: LengthDistribution,
        fonts: FontCatalog,
        renderer: Renderer,
    ) -> Result<Self> {
        let mut font_labels = Vec::new();
        let mut weights = Vec::new();
        for label in fonts.labels() {
            match FONT_LABEL_WEIGHTS.iter().find(|(l, _)| *l == label) {
                Some((_, w)) => {
                    font_labels.push(label.to_string());
                    weights.push(*w);
                }
                None => tracing::warn!("Ignoring fonts with unknown label {}", label),
            }
        }
        let font_p = WeightedIndex::new(&weights)
            .map_err(|e| DevError::Data(format!("no usable fonts: {e}")))?;

        Ok(Self {
            charsets,
            lengths,
            segmenter: Box::new(TinySegmenter),
            fonts,
            font_labels,
            font_p,
            renderer,
        })
    }

    /// Everything read from the standard data locations, rendering with headless Chrome.
    pub fn from_paths(paths: &DataPaths) -> Result<Self> {
        let charsets = Charsets::load(&paths.vocab_csv())?;
        let lengths = LengthDistribution::load(&paths.len_to_p_csv())?;
        let fonts = FontCatalog::load(&paths.fonts_csv(), &paths.fonts_root)?;
        let backgrounds = BackgroundCatalog::load(&paths.background_dir)?;
        tracing::info!(
            "Loaded {} fonts and {} backgrounds",
            fonts.fonts().len(),
            backgrounds.len()
        );
        let renderer = Renderer::new(Box::new(ChromeRenderer::new()?), backgrounds);
        Self::new(charsets, lengths, fonts, renderer)
    }

    pub fn with_segmenter(mut self, segmenter: Box<dyn Segmenter>) -> Self {
        self.segmenter = segmenter;
        self
    }

    pub fn fonts(&self) -> &FontCatalog {
        &self.fonts
    }

    /// Generate an image and its ground truth. Uses `text` when given, otherwise
    /// random characters supported by the chosen font.
    pub fn process(
        &self,
        text: Option<&str>,
        overrides: &CssOverrides,
        rng: &mut dyn RngCore,
    ) -> Result<Sample> {
        let mut overrides = overrides.clone();

        let words = match text {
            None => {
                // pick the font first so the random text only uses its characters
                let font_path = match overrides.font_path.take() {
                    Some(path) => path,
                    None => self.random_font(None, rng)?,
                };
                let font = self.font(&font_path)?;
                overrides.font_path = Some(font_path);
                let mut vocab: Vec<char> = font.chars.iter().copied().collect();
                vocab.sort_unstable();
                self.random_words(&vocab, rng)
            }
            Some(text) => {
                let text = text.replace('\u{3000}', " ").replace('…', "...");
                self.split_into_words(&text, rng)
            }
        };

        let mut lines = words_to_lines(&words, rng);

        if overrides.font_path.is_none() {
            overrides.font_path = Some(self.random_font(Some(&lines.join("\n")), rng)?);
        }
        let font = match &overrides.font_path {
            Some(path) => self.font(path)?,
            None => return Err(DevError::Data("no font selected".into())),
        };

        // drop characters the font cannot draw
        for line in lines.iter_mut() {
            line.retain(|c| font.chars.contains(&c));
        }
        let text_gt = lines.join("\n");

        let mut vocab: Vec<char> = font.chars.iter().copied().collect();
        vocab.sort_unstable();

        let markup: Vec<String> = if rng.random::<f32>() < 0.5 {
            let word_prob = if rng.random::<f32>() < 0.3 { 0.33 } else { 1.0 };
            lines
                .iter()
                .map(|line| self.add_random_furigana(line, word_prob, &vocab, rng))
                .collect()
        } else {
            lines.iter().map(|line| escape_html(line)).collect()
        };

        let (image, params) = self.renderer.render(&markup, &overrides, rng)?;
        Ok(Sample {
            image,
            text: text_gt,
            params,
        })
    }

    fn font(&self, path: &Path) -> Result<&FontInfo> {
        self.fonts
            .get(path)
            .ok_or_else(|| DevError::Data(format!("font not in catalog: {}", path.display())))
    }

    pub fn random_words<R: Rng + ?Sized>(&self, vocab: &[char], rng: &mut R) -> Vec<String> {
        let max_text_len = self.lengths.sample(rng);
        let mut words = Vec::new();
        if vocab.is_empty() {
            return words;
        }
        let mut text_len = 0;
        loop {
            let word_len = rng.random_range(1..4);
            let word: String = (0..word_len)
                .filter_map(|_| vocab.choose(rng).copied())
                .collect();
            let len = word.chars().count();
            words.push(word);
            text_len += len;
            if text_len + len >= max_text_len {
                break;
            }
        }
        words
    }

    pub fn split_into_words<R: Rng + ?Sized>(&self, text: &str, rng: &mut R) -> Vec<String> {
        let max_text_len = self.lengths.sample(rng);
        let mut words = Vec::new();
        let mut text_len = 0;
        for chunk in self.segmenter.segment(text) {
            let len = chunk.chars().count();
            words.push(chunk);
            text_len += len;
            if text_len + len >= max_text_len {
                break;
            }
        }
        words
    }

    /// Wrap kanji runs in `<ruby>` with random readings and short ASCII runs in
    /// upright spans.
    pub fn add_random_furigana<R: Rng + ?Sized>(
        &self,
        line: &str,
        word_prob: f64,
        vocab: &[char],
        rng: &mut R,
    ) -> String {
        let vocab = if vocab.is_empty() {
            self.charsets.vocab.as_slice()
        } else {
            vocab
        };
        let chars: Vec<char> = line.chars().collect();
        let mut processed = String::new();
        let mut kanji_group = String::new();
        let mut ascii_group = String::new();

        for (i, &c) in chars.iter().enumerate() {
            let last = i + 1 == chars.len();
            let kanji = is_kanji(c);
            let ascii = !kanji && is_ascii(c);
            if kanji {
                kanji_group.push(c);
            } else if ascii {
                ascii_group.push(c);
            }

            if (!kanji || last) && !kanji_group.is_empty() {
                if rng.random::<f64>() < word_prob {
                    let furigana = self.random_furigana(&kanji_group, vocab, rng);
                    processed.push_str(&format!("<ruby>{kanji_group}<rt>{furigana}</rt></ruby>"));
                } else {
                    processed.push_str(&kanji_group);
                }
                kanji_group.clear();
            }

            if (!ascii || last) && !ascii_group.is_empty() {
                let escaped = escape_html(&ascii_group);
                if ascii_group.len() <= 3 && rng.random::<f32>() < 0.7 {
                    processed.push_str(&format!(
                        "<span style=\"text-combine-upright: all\">{escaped}</span>"
                    ));
                } else {
                    processed.push_str(&escaped);
                }
                ascii_group.clear();
            }

            if !kanji && !ascii {
                processed.push_str(&escape_html(&c.to_string()));
            }
        }
        processed
    }

    fn random_furigana<R: Rng + ?Sized>(&self, kanji: &str, vocab: &[char], rng: &mut R) -> String {
        let n_kanji = kanji.chars().count() as f64;
        let scale = Normal::<f64>::new(1.5, 0.5)
            .map(|n| n.sample(rng))
            .unwrap_or(1.5)
            .clamp(1.0, 4.0);
        let len = (scale * n_kanji) as usize;

        let roll: f64 = rng.random();
        let source = if roll < 0.8 {
            &self.charsets.hiragana
        } else if roll < 0.95 {
            &self.charsets.katakana
        } else {
            vocab
        };
        let source = if source.is_empty() { vocab } else { source };
        (0..len)
            .filter_map(|_| source.choose(rng).copied())
            .map(|c| escape_html(&c.to_string()))
            .collect()
    }

    /// Font path drawn by label weight. With `text`, only fonts supporting all of
    /// it are eligible, falling back to fonts with many characters.
    pub fn random_font<R: Rng + ?Sized>(&self, text: Option<&str>, rng: &mut R) -> Result<PathBuf> {
        let label = &self.font_labels[self.font_p.sample(rng)];
        let fonts: Vec<&FontInfo> = self.fonts.with_label(label).collect();

        let candidates: Vec<&FontInfo> = match text {
            None => fonts,
            Some(text) => {
                let supporting: Vec<&FontInfo> =
                    fonts.iter().copied().filter(|f| f.supports(text)).collect();
                if supporting.is_empty() {
                    fonts
                        .into_iter()
                        .filter(|f| f.num_chars >= MIN_FALLBACK_CHARS)
                        .collect()
                } else {
                    supporting
                }
            }
        };

        candidates
            .choose(rng)
            .map(|f| f.path.clone())
            .ok_or_else(|| DevError::Data(format!("no font with label {label} fits the text")))
    }
}

/// Join words into lines of at least `clip(Poisson(6), len / 10, 20)` characters.
pub fn words_to_lines<R: Rng + ?Sized>(words: &[String], rng: &mut R) -> Vec<String> {
    let total: usize = words.iter().map(|w| w.chars().count()).sum();
    let min_line_len = total / MAX_NUM_LINES;
    let drawn = Poisson::new(6.0).map(|p| p.sample(rng) as usize).unwrap_or(6);
    let max_line_len = drawn.max(min_line_len).min(MAX_LINE_LEN);

    let mut lines = Vec::new();
    let mut line = String::new();
    for word in words {
        line.push_str(word);
        if line.chars().count() >= max_line_len {
            lines.push(std::mem::take(&mut line));
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::Background,
        synthetic::{fonts::FontRow, renderer::HtmlRenderer},
    };
    use image::{Rgba, RgbaImage};
    use rand::{rngs::StdRng, SeedableRng};

    /// Draws a dark block per line instead of laying out HTML.
    struct BlockRenderer;

    impl HtmlRenderer for BlockRenderer {
        fn render(&self, html: &str, _css: &str, size: (u32, u32)) -> Result<RgbaImage> {
            let lines = html.matches("<p>").count() as u32;
            let mut img = RgbaImage::new(size.0.max(40), size.1.max(40));
            for i in 0..lines.max(1) {
                for x in 10..30 {
                    img.put_pixel(x, 10 + i, Rgba([0, 0, 0, 255]));
                }
            }
            Ok(img)
        }
    }

    fn generator(dir: &Path) -> SyntheticDataGenerator {
        let bg_path = dir.join("bg_0_0_50_0_50.png");
        image::GrayImage::from_pixel(50, 50, image::Luma([230]))
            .save(&bg_path)
            .unwrap();
        let backgrounds = BackgroundCatalog::from_entries(vec![Background {
            path: bg_path,
            h: 50,
            w: 50,
            ratio: 1.0,
        }]);

        let fonts = FontCatalog::from_rows(
            vec![
                FontRow {
                    font_path: "kana.ttf".into(),
                    supported_chars: Some("あいうえおかきくけこアイウ".into()),
                    num_chars: 13,
                    label: "regular".into(),
                },
                FontRow {
                    font_path: "full.ttf".into(),
                    supported_chars: Some("あいうえおかきくけこアイウ漢字AB".into()),
                    num_chars: 17,
                    label: "regular".into(),
                },
            ],
            Path::new("/fonts"),
        );
        let charsets = Charsets::from_vocab("あいうえおかきくけこさしすアイウエオカ漢字AB".chars().collect());
        let lengths = LengthDistribution::new(vec![(5, 0.5), (12, 0.5)]).unwrap();
        let renderer = Renderer::new(Box::new(BlockRenderer), backgrounds);
        SyntheticDataGenerator::new(charsets, lengths, fonts, renderer).unwrap()
    }

    #[test]
    fn test_words_to_lines_keeps_text() {
        let mut rng = StdRng::seed_from_u64(3);
        let words: Vec<String> = ["あい", "うえお", "か", "きくけこ"].iter().map(|s| s.to_string()).collect();
        for _ in 0..20 {
            let lines = words_to_lines(&words, &mut rng);
            assert_eq!(lines.concat(), "あいうえおかきくけこ");
            assert!(lines.len() <= 10);
        }
    }

    #[test]
    fn test_random_font_respects_support() {
        let dir = tempfile::tempdir().unwrap();
        let gen = generator(dir.path());
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..20 {
            let path = gen.random_font(Some("漢字"), &mut rng).unwrap();
            assert_eq!(path, PathBuf::from("/fonts/full.ttf"));
        }
        // nothing supports the text and no font is large enough for the fallback
        assert!(gen.random_font(Some("鬱"), &mut rng).is_err());
    }

    #[test]
    fn test_furigana_markup() {
        let dir = tempfile::tempdir().unwrap();
        let gen = generator(dir.path());
        let mut rng = StdRng::seed_from_u64(5);
        let vocab: Vec<char> = "あいう".chars().collect();

        let out = gen.add_random_furigana("あ漢字いAB", 1.0, &vocab, &mut rng);
        assert!(out.starts_with("あ<ruby>漢字<rt>"));
        assert!(out.contains("</rt></ruby>い"));
        assert!(out.ends_with("AB") || out.ends_with("AB</span>"));

        let plain = gen.add_random_furigana("あ漢字", 0.0, &vocab, &mut rng);
        assert_eq!(plain, "あ漢字");
    }

    #[test]
    fn test_random_words_use_font_vocab() {
        let dir = tempfile::tempdir().unwrap();
        let gen = generator(dir.path());
        let mut rng = StdRng::seed_from_u64(6);
        let vocab: Vec<char> = "アイウ".chars().collect();
        let words = gen.random_words(&vocab, &mut rng);
        assert!(!words.is_empty());
        assert!(words.iter().all(|w| (1..=3).contains(&w.chars().count())));
        assert!(words.concat().chars().all(|c| vocab.contains(&c)));
    }

    #[test]
    fn test_process_source_text() {
        let dir = tempfile::tempdir().unwrap();
        let gen = generator(dir.path());
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..5 {
            let sample = gen
                .process(Some("あいう漢字"), &CssOverrides::default(), &mut rng)
                .unwrap();
            assert!(!sample.text.is_empty());
            assert!("あいう漢字\n".contains(sample.text.lines().next().unwrap_or("")));
            assert!(sample.params.font_path.is_some());
            let (w, h) = sample.image.dimensions();
            assert!(w <= 600 && h <= 600);
        }
    }

    #[test]
    fn test_process_random_text() {
        let dir = tempfile::tempdir().unwrap();
        let gen = generator(dir.path());
        let mut rng = StdRng::seed_from_u64(8);
        let overrides = CssOverrides {
            font_path: Some(PathBuf::from("/fonts/kana.ttf")),
            ..Default::default()
        };
        let sample = gen.process(None, &overrides, &mut rng).unwrap();
        let font = gen.fonts().get(Path::new("/fonts/kana.ttf")).unwrap();
        assert!(sample.text.chars().filter(|c| *c != '\n').all(|c| font.chars.contains(&c)));
    }
}
